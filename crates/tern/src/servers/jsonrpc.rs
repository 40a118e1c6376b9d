//! Tool server client speaking JSON-RPC 2.0 over HTTP POST, using the
//! Model Context Protocol method names.
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use url::Url;

use super::error::{ToolError, ToolResult};
use super::{
    PromptInfo, PromptMessage, ResourceInfo, ResourceTemplateInfo, ToolInfo, ToolServer,
};
use crate::models::content::{Content, EmbeddedResource};
use crate::models::role::Role;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
const MAX_LIST_PAGES: usize = 100;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Content items as they appear on the wire; resources are nested one level
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum WireContent {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    Image {
        data: String,
        mime_type: String,
    },
    Resource {
        resource: EmbeddedResource,
    },
    #[serde(other)]
    Unsupported,
}

impl WireContent {
    fn into_content(self) -> Option<Content> {
        match self {
            WireContent::Text { text } => Some(Content::text(text)),
            WireContent::Image { data, mime_type } => Some(Content::image(data, mime_type)),
            WireContent::Resource { resource } => Some(Content::Resource(resource)),
            WireContent::Unsupported => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallToolResult {
    #[serde(default)]
    content: Vec<WireContent>,
    #[serde(default)]
    is_error: bool,
}

#[derive(Debug, Deserialize)]
struct ReadResourceResult {
    #[serde(default)]
    contents: Vec<EmbeddedResource>,
}

#[derive(Debug, Deserialize)]
struct WirePromptMessage {
    role: Role,
    content: WireContent,
}

#[derive(Debug, Deserialize)]
struct GetPromptResult {
    #[serde(default)]
    messages: Vec<WirePromptMessage>,
}

pub struct JsonRpcToolServer {
    name: String,
    url: Url,
    client: Client,
    timeout: Duration,
    next_id: AtomicU64,
}

impl JsonRpcToolServer {
    /// Connect to a server and perform the `initialize` handshake
    pub async fn connect(name: &str, url: &str, timeout: Duration) -> ToolResult<Self> {
        let url = Url::parse(url)
            .map_err(|e| ToolError::Transport(format!("invalid url for {}: {}", name, e)))?;
        let client = Client::builder()
            .build()
            .map_err(|e| ToolError::Internal(e.to_string()))?;
        let server = Self {
            name: name.to_string(),
            url,
            client,
            timeout,
            next_id: AtomicU64::new(1),
        };

        let info = server
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "tern",
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                }),
            )
            .await?;
        tracing::info!(
            server = %server.name,
            remote = %info["serverInfo"]["name"].as_str().unwrap_or("unknown"),
            "connected to tool server"
        );
        Ok(server)
    }

    async fn request(&self, method: &str, params: Value) -> ToolResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        tracing::debug!(server = %self.name, method, id, "tool server request");

        let response = self
            .client
            .post(self.url.clone())
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(ToolError::Transport(format!(
                "{} answered {} to {}",
                self.name,
                response.status(),
                method
            )));
        }

        let rpc: JsonRpcResponse = response.json().await.map_err(|e| self.transport_error(e))?;
        if let Some(error) = rpc.error {
            return Err(match error.code {
                -32601 => ToolError::ToolNotFound(error.message),
                -32602 => ToolError::InvalidParameters(error.message),
                _ => ToolError::ExecutionError(error.message),
            });
        }
        rpc.result
            .ok_or_else(|| ToolError::Transport(format!("{} returned no result", method)))
    }

    /// Follow `nextCursor` until the listing is exhausted. Entries that do not
    /// parse are logged and skipped; the rest of the page still counts.
    async fn list_all<T: DeserializeOwned>(&self, method: &str, field: &str) -> ToolResult<Vec<T>> {
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_LIST_PAGES {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let mut page = self.request(method, params).await?;
            let entries: Vec<Value> = decode(method, page[field].take())?;
            for entry in entries {
                match serde_json::from_value::<T>(entry) {
                    Ok(item) => items.push(item),
                    Err(e) => tracing::warn!(
                        server = %self.name,
                        method,
                        "skipping malformed listing entry: {}",
                        e
                    ),
                }
            }

            cursor = page["nextCursor"].as_str().map(String::from);
            match &cursor {
                None => return Ok(items),
                Some(next) if !seen.insert(next.clone()) => {
                    tracing::warn!(server = %self.name, method, cursor = %next, "listing cursor repeated");
                    return Ok(items);
                }
                Some(_) => {}
            }
        }
        tracing::warn!(server = %self.name, method, "listing stopped after {} pages", MAX_LIST_PAGES);
        Ok(items)
    }

    fn transport_error(&self, error: reqwest::Error) -> ToolError {
        if error.is_timeout() {
            ToolError::Timeout(self.timeout.as_secs())
        } else {
            ToolError::Transport(format!("{}: {}", self.name, error))
        }
    }
}

fn decode<T: DeserializeOwned>(method: &str, value: Value) -> ToolResult<T> {
    serde_json::from_value(value)
        .map_err(|e| ToolError::Transport(format!("malformed {} response: {}", method, e)))
}

#[async_trait]
impl ToolServer for JsonRpcToolServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> ToolResult<Vec<ToolInfo>> {
        self.list_all("tools/list", "tools").await
    }

    async fn list_resources(&self) -> ToolResult<Vec<ResourceInfo>> {
        self.list_all("resources/list", "resources").await
    }

    async fn list_resource_templates(&self) -> ToolResult<Vec<ResourceTemplateInfo>> {
        self.list_all("resources/templates/list", "resourceTemplates")
            .await
    }

    async fn list_prompts(&self) -> ToolResult<Vec<PromptInfo>> {
        self.list_all("prompts/list", "prompts").await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> ToolResult<Vec<Content>> {
        let value = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        let result: CallToolResult = decode("tools/call", value)?;
        let content: Vec<Content> = result
            .content
            .into_iter()
            .filter_map(WireContent::into_content)
            .collect();

        if result.is_error {
            let message = content
                .iter()
                .map(Content::summary)
                .collect::<Vec<_>>()
                .join("\n");
            return Err(ToolError::ExecutionError(message));
        }
        Ok(content)
    }

    async fn read_resource(&self, uri: &str) -> ToolResult<Vec<Content>> {
        let value = self.request("resources/read", json!({ "uri": uri })).await?;
        let result: ReadResourceResult = decode("resources/read", value)?;
        Ok(result.contents.into_iter().map(Content::Resource).collect())
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> ToolResult<Vec<PromptMessage>> {
        let value = self
            .request("prompts/get", json!({ "name": name, "arguments": arguments }))
            .await?;
        let result: GetPromptResult = decode("prompts/get", value)?;
        Ok(result
            .messages
            .into_iter()
            .filter_map(|message| {
                message.content.into_content().map(|content| PromptMessage {
                    role: message.role,
                    content,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rpc_result(result: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": result
        }))
    }

    async fn setup_server() -> (MockServer, JsonRpcToolServer) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "initialize"})))
            .respond_with(rpc_result(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "mock", "version": "1.0"}
            })))
            .mount(&mock_server)
            .await;

        let server =
            JsonRpcToolServer::connect("mock", &mock_server.uri(), Duration::from_secs(5))
                .await
                .unwrap();
        (mock_server, server)
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let result = JsonRpcToolServer::connect("bad", "not a url", Duration::from_secs(1)).await;
        match result {
            Err(ToolError::Transport(message)) => assert!(message.contains("invalid url for bad")),
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("expected connect to fail"),
        }
    }

    #[tokio::test]
    async fn test_list_tools_follows_cursor() {
        let (mock_server, server) = setup_server().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "tools/list", "params": {}})))
            .respond_with(rpc_result(json!({
                "tools": [{"name": "echo", "description": "Echo", "inputSchema": {"type": "object"}}],
                "nextCursor": "page2"
            })))
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(
                json!({"method": "tools/list", "params": {"cursor": "page2"}}),
            ))
            .respond_with(rpc_result(json!({
                "tools": [{"name": "grep", "inputSchema": {"type": "object"}}]
            })))
            .with_priority(1)
            .mount(&mock_server)
            .await;

        let tools = server.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "grep"]);
        assert_eq!(tools[1].description, "");
    }

    #[tokio::test]
    async fn test_malformed_entries_are_skipped() {
        let (mock_server, server) = setup_server().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "tools/list"})))
            .respond_with(rpc_result(json!({
                "tools": [
                    {"name": "echo", "inputSchema": {"type": "object"}},
                    {"name": "broken", "description": null},
                    {"description": "no name at all"},
                    {"name": "grep", "description": "Search"}
                ]
            })))
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "resources/list"})))
            .respond_with(rpc_result(json!({
                "resources": [
                    {"uri": "file:///a.txt"},
                    {"uri": "file:///b.txt", "name": "b"}
                ]
            })))
            .mount(&mock_server)
            .await;

        let tools = server.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "grep"]);

        let resources = server.list_resources().await.unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].name, "b");
    }

    #[tokio::test]
    async fn test_repeated_cursor_ends_listing() {
        let (mock_server, server) = setup_server().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "prompts/list"})))
            .respond_with(rpc_result(json!({
                "prompts": [{"name": "review"}],
                "nextCursor": "again"
            })))
            .mount(&mock_server)
            .await;

        let prompts = tokio::time::timeout(Duration::from_secs(5), server.list_prompts())
            .await
            .expect("listing should stop on a repeated cursor")
            .unwrap();
        // the first page and the page behind the cursor, then the repeat is noticed
        assert_eq!(prompts.len(), 2);
        assert!(prompts.iter().all(|p| p.name == "review"));
    }

    #[tokio::test]
    async fn test_call_tool_maps_is_error() {
        let (mock_server, server) = setup_server().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "tools/call"})))
            .respond_with(rpc_result(json!({
                "content": [{"type": "text", "text": "permission denied"}],
                "isError": true
            })))
            .mount(&mock_server)
            .await;

        let error = server.call_tool("run", Map::new()).await.unwrap_err();
        assert_eq!(
            error,
            ToolError::ExecutionError("permission denied".to_string())
        );
    }

    #[tokio::test]
    async fn test_call_tool_returns_content() {
        let (mock_server, server) = setup_server().await;
        Mock::given(method("POST"))
            .and(body_partial_json(
                json!({"method": "tools/call", "params": {"name": "echo", "arguments": {"x": "a"}}}),
            ))
            .respond_with(rpc_result(json!({
                "content": [
                    {"type": "text", "text": "a"},
                    {"type": "audio", "data": "...", "mimeType": "audio/wav"}
                ]
            })))
            .mount(&mock_server)
            .await;

        let mut args = Map::new();
        args.insert("x".to_string(), json!("a"));
        let content = server.call_tool("echo", args).await.unwrap();
        assert_eq!(content, vec![Content::text("a")]);
    }

    #[tokio::test]
    async fn test_rpc_errors_are_classified() {
        let (mock_server, server) = setup_server().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "prompts/get"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": -32602, "message": "missing argument 'who'"}
            })))
            .mount(&mock_server)
            .await;

        let error = server.get_prompt("greet", HashMap::new()).await.unwrap_err();
        assert!(matches!(error, ToolError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn test_read_resource_and_http_failures() {
        let (mock_server, server) = setup_server().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "resources/read"})))
            .respond_with(rpc_result(json!({
                "contents": [{"uri": "file:///a.txt", "mimeType": "text/plain", "text": "hello"}]
            })))
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "resources/list"})))
            .respond_with(ResponseTemplate::new(502))
            .mount(&mock_server)
            .await;

        let contents = server.read_resource("file:///a.txt").await.unwrap();
        assert_eq!(contents[0].as_text(), Some("hello"));

        let error = server.list_resources().await.unwrap_err();
        assert!(matches!(error, ToolError::Transport(_)));
    }
}
