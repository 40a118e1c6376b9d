use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

use crate::models::api::{ModelList, ModelObject};
use crate::models::tool::FunctionDescriptor;
use crate::schema::{sanitize_name, translate, Capability, CapabilityKind};
use crate::servers::{PromptInfo, ResourceInfo, ResourceTemplateInfo, ToolServer};

/// Known models and the merged function set of every registered tool server.
///
/// Built once at startup and shared read-only afterwards. Server indices are
/// assigned in registration order and never reused.
#[derive(Default)]
pub struct Registry {
    models: Vec<ModelObject>,
    servers: Vec<Arc<dyn ToolServer>>,
    functions: Vec<FunctionDescriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_model<S: Into<String>, O: Into<String>>(&mut self, id: S, owned_by: O) {
        let id = id.into();
        if self.models.iter().any(|model| model.id == id) {
            return;
        }
        self.models.push(ModelObject {
            id,
            object: "model".to_string(),
            created: chrono::Utc::now().timestamp(),
            owned_by: owned_by.into(),
        });
    }

    /// Register a tool server and every capability it lists, returning its index.
    ///
    /// A capability whose schema cannot be translated is logged and skipped;
    /// the rest of the server still registers.
    pub async fn register_server(&mut self, server: Arc<dyn ToolServer>) -> usize {
        let index = self.servers.len();
        let capabilities = list_capabilities(server.as_ref()).await;

        let mut seen: HashSet<String> = self.functions.iter().map(|f| f.name.clone()).collect();
        let mut registered = 0;
        for capability in &capabilities {
            match translate(index, capability) {
                Ok(descriptor) => {
                    if !seen.insert(descriptor.name.clone()) {
                        tracing::warn!(
                            server = server.name(),
                            function = %descriptor.name,
                            "duplicate capability name, skipping"
                        );
                        continue;
                    }
                    self.functions.push(descriptor);
                    registered += 1;
                }
                Err(error) => {
                    tracing::warn!(
                        server = server.name(),
                        kind = %capability.kind,
                        capability = %capability.name,
                        "skipping capability: {}",
                        error
                    );
                }
            }
        }

        tracing::info!(
            server = server.name(),
            index,
            functions = registered,
            skipped = capabilities.len() - registered,
            "registered tool server"
        );
        self.servers.push(server);
        index
    }

    pub fn model_list(&self) -> ModelList {
        ModelList {
            object: "list".to_string(),
            data: self.models.clone(),
        }
    }

    pub fn model_detail(&self, id: &str) -> Option<ModelObject> {
        self.models.iter().find(|model| model.id == id).cloned()
    }

    pub fn has_model(&self, id: &str) -> bool {
        self.models.iter().any(|model| model.id == id)
    }

    pub fn functions(&self) -> &[FunctionDescriptor] {
        &self.functions
    }

    /// The full set when nothing is requested, otherwise exactly the functions
    /// whose name was requested. Unknown names are logged and ignored.
    pub fn filter_tools(&self, requested: &[String]) -> Vec<FunctionDescriptor> {
        if requested.is_empty() {
            return self.functions.clone();
        }
        for name in requested {
            if !self.functions.iter().any(|f| &f.name == name) {
                tracing::warn!(tool = %name, "requested tool is not registered");
            }
        }
        self.functions
            .iter()
            .filter(|f| requested.contains(&f.name))
            .cloned()
            .collect()
    }

    pub fn server(&self, index: usize) -> Option<&Arc<dyn ToolServer>> {
        self.servers.get(index)
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn server_names(&self) -> Vec<String> {
        self.servers.iter().map(|s| s.name().to_string()).collect()
    }
}

async fn list_capabilities(server: &dyn ToolServer) -> Vec<Capability> {
    let mut capabilities = Vec::new();

    match server.list_tools().await {
        Ok(tools) => capabilities.extend(tools.into_iter().map(|tool| {
            Capability::new(
                CapabilityKind::Tool,
                tool.name,
                tool.description,
                tool.input_schema,
            )
        })),
        Err(e) => tracing::warn!(server = server.name(), "failed to list tools: {}", e),
    }
    match server.list_resources().await {
        Ok(resources) => capabilities.extend(resources.iter().map(resource_capability)),
        Err(e) => tracing::warn!(server = server.name(), "failed to list resources: {}", e),
    }
    match server.list_resource_templates().await {
        Ok(templates) => capabilities.extend(templates.iter().map(template_capability)),
        Err(e) => tracing::warn!(
            server = server.name(),
            "failed to list resource templates: {}",
            e
        ),
    }
    match server.list_prompts().await {
        Ok(prompts) => capabilities.extend(prompts.iter().map(prompt_capability)),
        Err(e) => tracing::warn!(server = server.name(), "failed to list prompts: {}", e),
    }

    capabilities
}

fn uri_schema(description: String, choices: Option<Vec<String>>) -> Value {
    let mut uri = json!({
        "type": "string",
        "description": description,
    });
    if let Some(choices) = choices {
        uri["enum"] = json!(choices);
    }
    json!({
        "type": "object",
        "properties": {"uri": uri},
        "required": ["uri"],
    })
}

// Resource names are display names, so they are sanitized before encoding.
// Dispatch goes through the `uri` argument and never needs the original name.
fn resource_capability(resource: &ResourceInfo) -> Capability {
    let description = match &resource.description {
        Some(description) => format!("{} (resource at {})", description, resource.uri),
        None => format!("Read the resource at {}", resource.uri),
    };
    Capability::new(
        CapabilityKind::Resource,
        sanitize_name(&resource.name),
        description,
        uri_schema(
            "URI of the resource to read".to_string(),
            Some(vec![resource.uri.clone()]),
        ),
    )
}

fn template_capability(template: &ResourceTemplateInfo) -> Capability {
    let description = match &template.description {
        Some(description) => format!("{} (uri template {})", description, template.uri_template),
        None => format!("Read resources matching {}", template.uri_template),
    };
    Capability::new(
        CapabilityKind::ResourceTemplate,
        sanitize_name(&template.name),
        description,
        uri_schema(
            format!("URI expanded from the template {}", template.uri_template),
            None,
        ),
    )
}

fn prompt_capability(prompt: &PromptInfo) -> Capability {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for argument in &prompt.arguments {
        let mut property = json!({"type": "string"});
        if let Some(description) = &argument.description {
            property["description"] = json!(description);
        }
        properties.insert(argument.name.clone(), property);
        if argument.required {
            required.push(argument.name.clone());
        }
    }
    Capability::new(
        CapabilityKind::Prompt,
        prompt.name.clone(),
        prompt.description.clone().unwrap_or_default(),
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    )
}
