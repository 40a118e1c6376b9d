use super::role::Role;
use super::tool::{FunctionCall, FunctionResult};
use crate::servers::error::ToolResult;
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
}

/// Inline binary payload, such as an image attached by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobContent {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Name reported for a call whose name or arguments could not be parsed,
/// so its error result still pairs with a call id
pub const UNPARSEABLE_CALL: &str = "unparseable_call";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Backend assigned call id, echoed back on the matching response
    pub id: String,
    pub call: ToolResult<FunctionCall>,
}

impl ToolRequest {
    /// The encoded function name, or `UNPARSEABLE_CALL` when parsing failed
    pub fn name(&self) -> &str {
        match &self.call {
            Ok(call) => &call.name,
            Err(_) => UNPARSEABLE_CALL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub id: String,
    pub result: FunctionResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Content passed inside a message, which can be both simple content and tool content
pub enum MessageContent {
    Text(TextContent),
    Blob(BlobContent),
    ToolRequest(ToolRequest),
    ToolResponse(ToolResponse),
}

impl MessageContent {
    pub fn text<S: Into<String>>(text: S) -> Self {
        MessageContent::Text(TextContent { text: text.into() })
    }

    pub fn blob<S: Into<String>>(mime_type: S, data: Vec<u8>) -> Self {
        MessageContent::Blob(BlobContent {
            mime_type: mime_type.into(),
            data,
        })
    }

    pub fn tool_request<S: Into<String>>(id: S, call: ToolResult<FunctionCall>) -> Self {
        MessageContent::ToolRequest(ToolRequest {
            id: id.into(),
            call,
        })
    }

    pub fn tool_response<S: Into<String>>(id: S, result: FunctionResult) -> Self {
        MessageContent::ToolResponse(ToolResponse {
            id: id.into(),
            result,
        })
    }

    pub fn as_tool_request(&self) -> Option<&ToolRequest> {
        if let MessageContent::ToolRequest(ref tool_request) = self {
            Some(tool_request)
        } else {
            None
        }
    }

    pub fn as_tool_response(&self) -> Option<&ToolResponse> {
        if let MessageContent::ToolResponse(ref tool_response) = self {
            Some(tool_response)
        } else {
            None
        }
    }

    /// Get the text content if this is a TextContent variant
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(&text.text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A message to or from the backend
pub struct Message {
    pub role: Role,
    pub created: i64,
    pub content: Vec<MessageContent>,
}

impl Message {
    pub fn new(role: Role) -> Self {
        Message {
            role,
            created: Utc::now().timestamp(),
            content: Vec::new(),
        }
    }

    /// Create a new user message with the current timestamp
    pub fn user() -> Self {
        Self::new(Role::User)
    }

    /// Create a new assistant message with the current timestamp
    pub fn assistant() -> Self {
        Self::new(Role::Assistant)
    }

    /// Add any MessageContent to the message
    pub fn with_content(mut self, content: MessageContent) -> Self {
        self.content.push(content);
        self
    }

    /// Add text content to the message
    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_content(MessageContent::text(text))
    }

    /// Add a tool request to the message
    pub fn with_tool_request<S: Into<String>>(self, id: S, call: ToolResult<FunctionCall>) -> Self {
        self.with_content(MessageContent::tool_request(id, call))
    }

    /// Add a tool response to the message
    pub fn with_tool_response<S: Into<String>>(self, id: S, result: FunctionResult) -> Self {
        self.with_content(MessageContent::tool_response(id, result))
    }

    /// Concatenation of every text part, in order
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|content| content.as_text())
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_requests(&self) -> impl Iterator<Item = &ToolRequest> {
        self.content.iter().filter_map(|content| content.as_tool_request())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servers::error::ToolError;
    use serde_json::{json, Map};

    #[test]
    fn test_text_concatenates_parts_in_order() {
        let message = Message::assistant()
            .with_text("Hello, ")
            .with_tool_request("1", Ok(FunctionCall::new("MCP0tool_x", Map::new())))
            .with_text("world");
        assert_eq!(message.text(), "Hello, world");
        assert_eq!(message.tool_requests().count(), 1);
    }

    #[test]
    fn test_tool_request_name_for_failed_parse() {
        let request = ToolRequest {
            id: "1".to_string(),
            call: Err(ToolError::InvalidParameters("bad json".to_string())),
        };
        assert_eq!(request.name(), UNPARSEABLE_CALL);

        let request = ToolRequest {
            id: "2".to_string(),
            call: Ok(FunctionCall::from_value("MCP1prompt_p", json!({}))),
        };
        assert_eq!(request.name(), "MCP1prompt_p");
    }
}
