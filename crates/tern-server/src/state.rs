use tern::orchestrator::Orchestrator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::Arc;
    use tern::orchestrator::EngineConfig;
    use tern::providers::mock::MockProvider;
    use tern::registry::Registry;
    use tern::servers::error::ToolError;
    use tern::servers::memory::InMemoryToolServer;

    /// Two advertised models and one tool server whose only tool always fails
    pub async fn test_state(provider: MockProvider) -> AppState {
        let mut registry = Registry::new();
        registry.register_model("m1", "tern");
        registry.register_model("m2", "tern");
        registry
            .register_server(Arc::new(InMemoryToolServer::new("broken").with_tool(
                "explode",
                "Always fails",
                serde_json::json!({"type": "object", "properties": {}}),
                |_| async { Err(ToolError::ExecutionError("boom".to_string())) },
            )))
            .await;

        AppState::new(Orchestrator::new(
            Arc::new(registry),
            Arc::new(provider),
            EngineConfig::default(),
        ))
    }
}
