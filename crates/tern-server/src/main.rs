use std::sync::Arc;
use tern::orchestrator::Orchestrator;
use tern::providers::factory::get_provider;
use tern::registry::Registry;
use tern::servers::jsonrpc::JsonRpcToolServer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod configuration;
mod error;
mod routes;
mod state;

use configuration::Settings;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::new()?;
    let provider = get_provider(settings.provider.clone())?;

    let mut registry = Registry::new();
    for model in settings.engine.advertised_models(&settings.provider) {
        registry.register_model(model, settings.provider.owner());
    }

    // a server that cannot be reached at startup is left out entirely
    for server in &settings.tool_servers {
        match JsonRpcToolServer::connect(&server.name, &server.url, server.timeout()).await {
            Ok(client) => {
                let index = registry.register_server(Arc::new(client)).await;
                info!(server = %server.name, index, "registered tool server");
            }
            Err(e) => warn!(server = %server.name, "failed to connect tool server: {}", e),
        }
    }
    info!(
        "{} functions available from {} tool servers",
        registry.functions().len(),
        registry.server_count()
    );

    let orchestrator = Orchestrator::new(
        Arc::new(registry),
        provider,
        settings.engine.to_config(),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::configure(AppState::new(orchestrator))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(settings.server.socket_addr()?).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
