use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use url::{Position, Url};

use crate::models::content::Content;
use crate::models::message::{Message, MessageContent};
use crate::models::tool::{FunctionCall, FunctionResult};
use crate::registry::Registry;
use crate::schema::{decode_name, CapabilityKind, DecodedName};
use crate::servers::error::{ToolError, ToolResult};
use crate::servers::{PromptMessage, ToolServer};

/// Faults in the router itself. Unlike tool failures these abort the request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouterError {
    #[error("`{0}` is not a decodable function name")]
    UndecodableName(String),

    #[error("function `{name}` refers to tool server {index}, but only {count} are registered")]
    ServerIndexOutOfRange {
        name: String,
        index: usize,
        count: usize,
    },
}

/// What one function call produced
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Result(FunctionResult),
    /// A prompt expansion: the message joins the conversation as a new user
    /// turn, the result only acknowledges the call
    PromptTurn {
        result: FunctionResult,
        message: Message,
    },
}

impl Invocation {
    pub fn result(&self) -> &FunctionResult {
        match self {
            Invocation::Result(result) => result,
            Invocation::PromptTurn { result, .. } => result,
        }
    }
}

/// Dispatches backend function calls to the tool server that owns them
#[derive(Clone)]
pub struct Router {
    registry: Arc<Registry>,
}

impl Router {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub async fn invoke(&self, call: &FunctionCall) -> Result<Invocation, RouterError> {
        let decoded =
            decode_name(&call.name).ok_or_else(|| RouterError::UndecodableName(call.name.clone()))?;
        let server = self.registry.server(decoded.server_index).ok_or_else(|| {
            RouterError::ServerIndexOutOfRange {
                name: call.name.clone(),
                index: decoded.server_index,
                count: self.registry.server_count(),
            }
        })?;

        tracing::debug!(
            function = %call.name,
            server = server.name(),
            kind = %decoded.kind,
            "dispatching function call"
        );

        let outcome = match decoded.kind {
            CapabilityKind::Tool => server
                .call_tool(&decoded.capability, call.arguments.clone())
                .await
                .map(|content| tool_result(&call.name, &content)),
            CapabilityKind::Resource | CapabilityKind::ResourceTemplate => {
                read_resource(server.as_ref(), &call.arguments)
                    .await
                    .map(|content| tool_result(&call.name, &content))
            }
            CapabilityKind::Prompt => get_prompt(server.as_ref(), &decoded, &call.arguments)
                .await
                .map(|messages| Invocation::PromptTurn {
                    result: FunctionResult::success(
                        &call.name,
                        acknowledgement(&decoded.capability),
                    ),
                    message: prompt_turn(&messages),
                }),
        };

        Ok(outcome.unwrap_or_else(|error| {
            tracing::warn!(
                function = %call.name,
                server = server.name(),
                "tool invocation failed: {}",
                error
            );
            Invocation::Result(FunctionResult::failure(
                &call.name,
                &error,
                &decoded.capability,
                server.name(),
            ))
        }))
    }
}

async fn read_resource(
    server: &dyn ToolServer,
    arguments: &Map<String, Value>,
) -> ToolResult<Vec<Content>> {
    let uri = arguments
        .get("uri")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidParameters("a string `uri` argument is required".to_string()))?;
    server.read_resource(&sanitize_uri(uri)).await
}

async fn get_prompt(
    server: &dyn ToolServer,
    decoded: &DecodedName,
    arguments: &Map<String, Value>,
) -> ToolResult<Vec<PromptMessage>> {
    let arguments: HashMap<String, String> = arguments
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect();
    server.get_prompt(&decoded.capability, arguments).await
}

fn tool_result(name: &str, content: &[Content]) -> Invocation {
    Invocation::Result(FunctionResult::success(name, payload(content)))
}

/// Tool output as a result payload: text is joined under `content`, anything
/// else is carried verbatim under `attachments`
fn payload(content: &[Content]) -> Map<String, Value> {
    let text = content
        .iter()
        .map(Content::summary)
        .collect::<Vec<_>>()
        .join("\n");
    let attachments: Vec<Value> = content
        .iter()
        .filter(|item| item.as_text().is_none())
        .filter_map(|item| serde_json::to_value(item).ok())
        .collect();

    let mut map = Map::new();
    map.insert("content".to_string(), Value::String(text));
    if !attachments.is_empty() {
        map.insert("attachments".to_string(), Value::Array(attachments));
    }
    map
}

fn acknowledgement(prompt: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(
        "content".to_string(),
        json!(format!(
            "Prompt `{}` was expanded and follows as the next user message.",
            prompt
        )),
    );
    map
}

fn prompt_turn(messages: &[PromptMessage]) -> Message {
    let mut turn = Message::user();
    for message in messages {
        turn = match &message.content {
            Content::Image(image) => match STANDARD.decode(&image.data) {
                Ok(data) => turn.with_content(MessageContent::blob(image.mime_type.clone(), data)),
                Err(_) => turn.with_text(message.content.summary()),
            },
            content => turn.with_text(content.summary()),
        };
    }
    turn
}

// RFC 3986 sub-delims plus `:` and `@` are legal inside a path segment
const SEGMENT_SAFE: &[char] = &[
    '!', '$', '&', '\'', '(', ')', '*', '+', ',', ';', '=', ':', '@',
];
// inside a query component `&`, `=` and `+` carry meaning and stay escaped
const QUERY_SAFE: &[char] = &['!', '$', '\'', '(', ')', '*', ',', ';', ':', '@', '/', '?'];

fn decode_lossy(part: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(part.as_bytes())).into_owned()
}

fn escape(part: &str, safe: &[char]) -> String {
    let mut out = String::with_capacity(part.len());
    let mut buf = [0u8; 4];
    for c in part.chars() {
        if safe.contains(&c) {
            out.push(c);
        } else {
            out.push_str(&urlencoding::encode(c.encode_utf8(&mut buf)));
        }
    }
    out
}

fn escape_path(path: &str) -> String {
    path.split('/')
        .map(|segment| escape(&decode_lossy(segment), SEGMENT_SAFE))
        .collect::<Vec<_>>()
        .join("/")
}

/// `+` in a query means a space; every space is written as `%20`
fn escape_query(query: &str) -> String {
    let unplus = |s: &str| decode_lossy(&s.replace('+', " "));
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => format!(
                "{}={}",
                escape(&unplus(key), QUERY_SAFE),
                escape(&unplus(value), QUERY_SAFE)
            ),
            None => escape(&unplus(pair), QUERY_SAFE),
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Re-escape the path and query of a model supplied uri so it names the same
/// resource the server listed. Existing escapes are decoded first so nothing
/// is escaped twice.
pub fn sanitize_uri(uri: &str) -> String {
    let Ok(url) = Url::parse(uri) else {
        return sanitize_relative(uri);
    };

    let (mut out, path) = if url.cannot_be_a_base() {
        (format!("{}:", url.scheme()), url.path().to_string())
    } else {
        (
            url[..Position::BeforePath].to_string(),
            url.path().to_string(),
        )
    };
    out.push_str(&escape_path(&path));
    if let Some(query) = url.query() {
        out.push('?');
        out.push_str(&escape_query(query));
    }
    if let Some(fragment) = url.fragment() {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

fn sanitize_relative(uri: &str) -> String {
    let (rest, fragment) = match uri.split_once('#') {
        Some((rest, fragment)) => (rest, Some(fragment)),
        None => (uri, None),
    };
    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    };

    let mut out = escape_path(path);
    if let Some(query) = query {
        out.push('?');
        out.push_str(&escape_query(query));
    }
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}
