//! OpenAI compatible request and response shapes served by the gateway.
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::role::Role;
use crate::providers::base::Usage;

/// Message content: either plain text or an ordered list of parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl From<&str> for ChatContent {
    fn from(text: &str) -> Self {
        ChatContent::Text(text.to_string())
    }
}

impl From<String> for ChatContent {
    fn from(text: String) -> Self {
        ChatContent::Text(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WirePart", into = "WirePart")]
pub enum ContentPart {
    Text(String),
    Blob { mime_type: String, data: Vec<u8> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImageUrl {
    url: String,
}

impl TryFrom<WirePart> for ContentPart {
    type Error = String;

    fn try_from(part: WirePart) -> Result<Self, Self::Error> {
        match part {
            WirePart::Text { text } => Ok(ContentPart::Text(text)),
            WirePart::ImageUrl { image_url } => {
                let (mime_type, data) = parse_data_url(&image_url.url)?;
                Ok(ContentPart::Blob { mime_type, data })
            }
        }
    }
}

impl From<ContentPart> for WirePart {
    fn from(part: ContentPart) -> Self {
        match part {
            ContentPart::Text(text) => WirePart::Text { text },
            ContentPart::Blob { mime_type, data } => WirePart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:{};base64,{}", mime_type, STANDARD.encode(data)),
                },
            },
        }
    }
}

/// Split a `data:<mime>;base64,<payload>` url into its mime type and decoded bytes
pub fn parse_data_url(url: &str) -> Result<(String, Vec<u8>), String> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| "only inline data: urls are supported for image parts".to_string())?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| "malformed data url: missing ','".to_string())?;
    let mime_type = header
        .strip_suffix(";base64")
        .ok_or_else(|| "malformed data url: payload must be base64 encoded".to_string())?;
    if mime_type.is_empty() {
        return Err("malformed data url: missing mime type".to_string());
    }
    let data = STANDARD
        .decode(payload)
        .map_err(|e| format!("malformed data url payload: {}", e))?;
    Ok((mime_type.to_string(), data))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<ChatContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<ChatContent>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            name: None,
        }
    }

    pub fn user(content: impl Into<ChatContent>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<ChatContent>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<ChatContent>) -> Self {
        Self::new(Role::System, content)
    }

    /// The text of the message when it is plain text
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            Some(ChatContent::Text(text)) => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopSequences {
    One(String),
    Many(Vec<String>),
}

impl StopSequences {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            StopSequences::One(stop) => vec![stop],
            StopSequences::Many(stops) => stops,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    #[serde(rename = "type", default = "default_tool_type")]
    pub kind: String,
    pub function: FunctionSpec,
}

fn default_tool_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,
    /// Restricts the registered functions offered to the backend, by name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl ChatCompletionRequest {
    pub fn new<S: Into<String>>(model: S, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: false,
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop: None,
            tools: None,
            user: None,
        }
    }

    /// Names of the requested tools; empty means every registered function
    pub fn requested_tool_names(&self) -> Vec<String> {
        self.tools
            .iter()
            .flatten()
            .map(|tool| tool.function.name.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolLoopLimit,
    ContentFilter,
    Error,
}

impl FinishReason {
    /// Map a backend reported finish reason onto the reasons we surface
    pub fn from_backend(reason: Option<&str>) -> Self {
        match reason {
            Some("length") | Some("max_tokens") => FinishReason::Length,
            Some("content_filter") | Some("safety") => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl From<&Usage> for ApiUsage {
    fn from(usage: &Usage) -> Self {
        let clamp = |v: Option<i32>| v.unwrap_or(0).max(0) as u32;
        let prompt_tokens = clamp(usage.input_tokens);
        let completion_tokens = clamp(usage.output_tokens);
        let total_tokens = usage
            .total_tokens
            .map(|v| v.max(0) as u32)
            .unwrap_or(prompt_tokens.saturating_add(completion_tokens));
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: ApiUsage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ApiUsage>,
}

impl StreamChunk {
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.choices.first().and_then(|choice| choice.finish_reason)
    }

    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.content.as_deref())
    }
}

/// Identity shared by every response object of one completion
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionMeta {
    pub id: String,
    pub model: String,
    pub created: i64,
}

impl CompletionMeta {
    pub fn new<S: Into<String>>(model: S) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            model: model.into(),
            created: chrono::Utc::now().timestamp(),
        }
    }

    pub fn response(
        &self,
        content: String,
        finish_reason: FinishReason,
        usage: &Usage,
    ) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: self.id.clone(),
            object: "chat.completion".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage::assistant(content),
                finish_reason: Some(finish_reason),
            }],
            usage: usage.into(),
        }
    }

    fn chunk(&self, delta: Delta, finish_reason: Option<FinishReason>) -> StreamChunk {
        StreamChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: None,
        }
    }

    /// The opening chunk, announcing the assistant role
    pub fn role_chunk(&self) -> StreamChunk {
        self.chunk(
            Delta {
                role: Some(Role::Assistant),
                content: None,
            },
            None,
        )
    }

    pub fn text_chunk<S: Into<String>>(&self, text: S) -> StreamChunk {
        self.chunk(
            Delta {
                role: None,
                content: Some(text.into()),
            },
            None,
        )
    }

    /// The closing chunk; `text` carries diagnostics that end the stream
    pub fn finish_chunk(
        &self,
        text: Option<String>,
        finish_reason: FinishReason,
        usage: &Usage,
    ) -> StreamChunk {
        let mut chunk = self.chunk(
            Delta {
                role: None,
                content: text,
            },
            Some(finish_reason),
        );
        chunk.usage = Some(usage.into());
        chunk
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelObject {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelObject>,
}
