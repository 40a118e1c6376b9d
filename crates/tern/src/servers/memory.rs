use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use super::error::{ToolError, ToolResult};
use super::{
    PromptArgument, PromptInfo, PromptMessage, ResourceInfo, ResourceTemplateInfo, ToolInfo,
    ToolServer,
};
use crate::models::content::Content;

type ToolHandler =
    Arc<dyn Fn(Map<String, Value>) -> BoxFuture<'static, ToolResult<Vec<Content>>> + Send + Sync>;
type ResourceReader = Arc<dyn Fn(String) -> BoxFuture<'static, ToolResult<Vec<Content>>> + Send + Sync>;
type PromptHandler = Arc<
    dyn Fn(HashMap<String, String>) -> BoxFuture<'static, ToolResult<Vec<PromptMessage>>>
        + Send
        + Sync,
>;

/// A tool server living in the same process, backed by async closures.
///
/// Useful for embedding host capabilities next to remote servers, and as a
/// deterministic collaborator in tests.
#[derive(Clone)]
pub struct InMemoryToolServer {
    name: String,
    tools: Vec<(ToolInfo, ToolHandler)>,
    resources: Vec<(ResourceInfo, Vec<Content>)>,
    templates: Vec<(ResourceTemplateInfo, ResourceReader)>,
    prompts: Vec<(PromptInfo, PromptHandler)>,
    log: Arc<Mutex<Vec<String>>>,
}

impl InMemoryToolServer {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            tools: Vec::new(),
            resources: Vec::new(),
            templates: Vec::new(),
            prompts: Vec::new(),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_tool<F, Fut>(
        mut self,
        name: &str,
        description: &str,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult<Vec<Content>>> + Send + 'static,
    {
        let info = ToolInfo {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        };
        let handler: ToolHandler = Arc::new(move |args| Box::pin(handler(args)));
        self.tools.push((info, handler));
        self
    }

    pub fn with_resource(mut self, uri: &str, name: &str, contents: Vec<Content>) -> Self {
        let info = ResourceInfo {
            uri: uri.to_string(),
            name: name.to_string(),
            description: None,
            mime_type: None,
        };
        self.resources.push((info, contents));
        self
    }

    /// Serve every uri starting with the template's literal prefix (the part before `{`)
    pub fn with_resource_template<F, Fut>(mut self, uri_template: &str, name: &str, reader: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult<Vec<Content>>> + Send + 'static,
    {
        let info = ResourceTemplateInfo {
            uri_template: uri_template.to_string(),
            name: name.to_string(),
            description: None,
            mime_type: None,
        };
        let reader: ResourceReader = Arc::new(move |uri| Box::pin(reader(uri)));
        self.templates.push((info, reader));
        self
    }

    pub fn with_prompt<F, Fut>(
        mut self,
        name: &str,
        description: &str,
        arguments: Vec<PromptArgument>,
        handler: F,
    ) -> Self
    where
        F: Fn(HashMap<String, String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult<Vec<PromptMessage>>> + Send + 'static,
    {
        let info = PromptInfo {
            name: name.to_string(),
            description: Some(description.to_string()),
            arguments,
        };
        let handler: PromptHandler = Arc::new(move |args| Box::pin(handler(args)));
        self.prompts.push((info, handler));
        self
    }

    /// Every call served so far, as `kind:target` entries in arrival order
    pub fn invocations(&self) -> Vec<String> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    fn record(&self, entry: String) {
        if let Ok(mut log) = self.log.lock() {
            log.push(entry);
        }
    }
}

#[async_trait]
impl ToolServer for InMemoryToolServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> ToolResult<Vec<ToolInfo>> {
        Ok(self.tools.iter().map(|(info, _)| info.clone()).collect())
    }

    async fn list_resources(&self) -> ToolResult<Vec<ResourceInfo>> {
        Ok(self.resources.iter().map(|(info, _)| info.clone()).collect())
    }

    async fn list_resource_templates(&self) -> ToolResult<Vec<ResourceTemplateInfo>> {
        Ok(self.templates.iter().map(|(info, _)| info.clone()).collect())
    }

    async fn list_prompts(&self) -> ToolResult<Vec<PromptInfo>> {
        Ok(self.prompts.iter().map(|(info, _)| info.clone()).collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> ToolResult<Vec<Content>> {
        self.record(format!("tool:{}", name));
        let handler = self
            .tools
            .iter()
            .find(|(info, _)| info.name == name)
            .map(|(_, handler)| handler.clone())
            .ok_or_else(|| ToolError::ToolNotFound(name.to_string()))?;
        handler(arguments).await
    }

    async fn read_resource(&self, uri: &str) -> ToolResult<Vec<Content>> {
        self.record(format!("resource:{}", uri));
        if let Some((_, contents)) = self.resources.iter().find(|(info, _)| info.uri == uri) {
            return Ok(contents.clone());
        }
        let reader = self
            .templates
            .iter()
            .find(|(info, _)| {
                let prefix = info
                    .uri_template
                    .split('{')
                    .next()
                    .unwrap_or(&info.uri_template);
                uri.starts_with(prefix)
            })
            .map(|(_, reader)| reader.clone())
            .ok_or_else(|| ToolError::ToolNotFound(format!("no resource at {}", uri)))?;
        reader(uri.to_string()).await
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> ToolResult<Vec<PromptMessage>> {
        self.record(format!("prompt:{}", name));
        let (info, handler) = self
            .prompts
            .iter()
            .find(|(info, _)| info.name == name)
            .ok_or_else(|| ToolError::ToolNotFound(name.to_string()))?;
        if let Some(missing) = info
            .arguments
            .iter()
            .find(|arg| arg.required && !arguments.contains_key(&arg.name))
        {
            return Err(ToolError::InvalidParameters(format!(
                "missing required prompt argument '{}'",
                missing.name
            )));
        }
        handler(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::role::Role;
    use serde_json::json;

    fn echo_server() -> InMemoryToolServer {
        InMemoryToolServer::new("echo")
            .with_tool(
                "echo",
                "Echoes back the input",
                json!({"type": "object", "properties": {"x": {"type": "string"}}}),
                |args| async move {
                    let x = args
                        .get("x")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| ToolError::InvalidParameters("x is required".into()))?;
                    Ok::<_, ToolError>(vec![Content::text(x)])
                },
            )
            .with_resource("file:///notes.txt", "notes", vec![Content::text("remember")])
            .with_resource_template("db://rows/{id}", "row", |uri| async move {
                Ok(vec![Content::resource_text(uri, "row body")])
            })
            .with_prompt(
                "greet",
                "Greets someone",
                vec![PromptArgument {
                    name: "who".to_string(),
                    description: None,
                    required: true,
                }],
                |args| async move {
                    Ok(vec![PromptMessage {
                        role: Role::User,
                        content: Content::text(format!("Say hello to {}", args["who"])),
                    }])
                },
            )
    }

    #[tokio::test]
    async fn test_listings() {
        let server = echo_server();
        assert_eq!(server.list_tools().await.unwrap()[0].name, "echo");
        assert_eq!(server.list_resources().await.unwrap()[0].uri, "file:///notes.txt");
        assert_eq!(
            server.list_resource_templates().await.unwrap()[0].uri_template,
            "db://rows/{id}"
        );
        assert_eq!(server.list_prompts().await.unwrap()[0].name, "greet");
    }

    #[tokio::test]
    async fn test_call_tool_and_errors() {
        let server = echo_server();
        let mut args = Map::new();
        args.insert("x".to_string(), json!("a"));
        let result = server.call_tool("echo", args).await.unwrap();
        assert_eq!(result, vec![Content::text("a")]);

        let error = server.call_tool("echo", Map::new()).await.unwrap_err();
        assert!(matches!(error, ToolError::InvalidParameters(_)));

        let error = server.call_tool("missing", Map::new()).await.unwrap_err();
        assert!(matches!(error, ToolError::ToolNotFound(_)));

        assert_eq!(
            server.invocations(),
            vec!["tool:echo", "tool:echo", "tool:missing"]
        );
    }

    #[tokio::test]
    async fn test_read_static_and_templated_resources() {
        let server = echo_server();
        let notes = server.read_resource("file:///notes.txt").await.unwrap();
        assert_eq!(notes[0].as_text(), Some("remember"));

        let row = server.read_resource("db://rows/42").await.unwrap();
        assert_eq!(row[0].as_text(), Some("row body"));

        assert!(server.read_resource("http://elsewhere").await.is_err());
    }

    #[tokio::test]
    async fn test_prompt_requires_declared_arguments() {
        let server = echo_server();
        let error = server.get_prompt("greet", HashMap::new()).await.unwrap_err();
        assert!(matches!(error, ToolError::InvalidParameters(_)));

        let mut args = HashMap::new();
        args.insert("who".to_string(), "Ada".to_string());
        let messages = server.get_prompt("greet", args).await.unwrap();
        assert_eq!(messages[0].content.as_text(), Some("Say hello to Ada"));
    }
}
