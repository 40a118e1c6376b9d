use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use std::collections::HashMap;

use super::base::{Candidate, Generation, GenerationChunk, Usage};
use crate::models::message::{Message, MessageContent, UNPARSEABLE_CALL};
use crate::models::role::Role;
use crate::models::tool::{FunctionCall, FunctionDescriptor};
use crate::schema::{is_valid_name, sanitize_name};
use crate::servers::error::ToolError;

/// Convert internal Message format to OpenAI's API message specification
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        let mut converted = json!({
            "role": message.role
        });

        let mut parts = Vec::new();
        let mut tool_calls = Vec::new();
        let mut output = Vec::new();

        for content in &message.content {
            match content {
                MessageContent::Text(text) => {
                    if !text.text.is_empty() {
                        parts.push(json!({"type": "text", "text": text.text}));
                    }
                }
                MessageContent::Blob(blob) => {
                    parts.push(json!({
                        "type": "image_url",
                        "image_url": {
                            "url": format!("data:{};base64,{}", blob.mime_type, STANDARD.encode(&blob.data))
                        }
                    }));
                }
                MessageContent::ToolRequest(request) => {
                    let (name, arguments) = match &request.call {
                        Ok(call) => (
                            sanitize_name(&call.name),
                            Value::Object(call.arguments.clone()).to_string(),
                        ),
                        Err(_) => (UNPARSEABLE_CALL.to_string(), "{}".to_string()),
                    };
                    tool_calls.push(json!({
                        "id": request.id,
                        "type": "function",
                        "function": {
                            "name": name,
                            "arguments": arguments,
                        }
                    }));
                }
                MessageContent::ToolResponse(response) => {
                    // the model reads the whole result map, error payloads included
                    output.push(json!({
                        "role": "tool",
                        "content": Value::Object(response.result.response.clone()).to_string(),
                        "tool_call_id": response.id
                    }));
                }
            }
        }

        let only_text = parts.iter().all(|part| part["type"] == "text");
        if only_text && !parts.is_empty() {
            let text: Vec<&str> = parts.iter().filter_map(|p| p["text"].as_str()).collect();
            converted["content"] = json!(text.join(""));
        } else if !parts.is_empty() {
            converted["content"] = json!(parts);
        }
        if !tool_calls.is_empty() {
            converted["tool_calls"] = json!(tool_calls);
        }

        if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
            output.insert(0, converted);
        }
        messages_spec.extend(output);
    }

    messages_spec
}

/// Convert function descriptors to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[FunctionDescriptor]) -> Result<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
            }
        }));
    }

    Ok(result)
}

/// Parse one OpenAI tool call into a request, keeping failures as errors
/// so the model is told about them instead of the request failing
fn parse_tool_call(id: &str, name: &str, arguments: &str) -> MessageContent {
    if !is_valid_name(name) {
        let error = ToolError::ToolNotFound(format!(
            "The provided function name '{}' had invalid characters, it must match this regex [a-zA-Z0-9_-]+",
            name
        ));
        return MessageContent::tool_request(id, Err(error));
    }

    let arguments = if arguments.trim().is_empty() {
        "{}"
    } else {
        arguments
    };
    match serde_json::from_str::<Value>(arguments) {
        Ok(Value::Object(params)) => {
            MessageContent::tool_request(id, Ok(FunctionCall::new(name, params)))
        }
        Ok(other) => {
            let error = ToolError::InvalidParameters(format!(
                "Tool use parameters for id {} must be a JSON object, got: {}",
                id, other
            ));
            MessageContent::tool_request(id, Err(error))
        }
        Err(e) => {
            let error = ToolError::InvalidParameters(format!(
                "Could not interpret tool use parameters for id {}: {}",
                id, e
            ));
            MessageContent::tool_request(id, Err(error))
        }
    }
}

fn choice_to_message(choice: &Value) -> Message {
    let original = &choice["message"];
    let mut content = Vec::new();

    if let Some(text) = original.get("content").and_then(|t| t.as_str()) {
        if !text.is_empty() {
            content.push(MessageContent::text(text));
        }
    }

    if let Some(tool_calls) = original.get("tool_calls").and_then(|t| t.as_array()) {
        for tool_call in tool_calls {
            let id = tool_call["id"].as_str().unwrap_or_default();
            let function_name = tool_call["function"]["name"].as_str().unwrap_or_default();
            let arguments = tool_call["function"]["arguments"]
                .as_str()
                .unwrap_or_default();
            content.push(parse_tool_call(id, function_name, arguments));
        }
    }

    Message {
        role: Role::Assistant,
        created: chrono::Utc::now().timestamp(),
        content,
    }
}

fn clamp_tokens(value: i64) -> i32 {
    i32::try_from(value.max(0)).unwrap_or(i32::MAX)
}

pub fn get_usage(data: &Value) -> Usage {
    let Some(usage) = data.get("usage").filter(|u| u.is_object()) else {
        return Usage::default();
    };

    let input_tokens = usage
        .get("prompt_tokens")
        .and_then(|v| v.as_i64())
        .map(clamp_tokens);

    let output_tokens = usage
        .get("completion_tokens")
        .and_then(|v| v.as_i64())
        .map(clamp_tokens);

    let total_tokens = usage
        .get("total_tokens")
        .and_then(|v| v.as_i64())
        .map(clamp_tokens)
        .or_else(|| match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input.saturating_add(output)),
            _ => None,
        });

    Usage::new(input_tokens, output_tokens, total_tokens)
}

/// Convert OpenAI's API response to a generation
pub fn openai_response_to_generation(response: &Value) -> Result<Generation> {
    let choices = response
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| anyhow!("Response has no choices: {}", response))?;

    let candidates: Vec<Candidate> = choices
        .iter()
        .map(|choice| Candidate {
            message: choice_to_message(choice),
            finish_reason: choice["finish_reason"].as_str().map(String::from),
        })
        .collect();
    let block_reason = candidates
        .iter()
        .filter_map(|c| c.finish_reason.as_deref())
        .find(|reason| *reason == "content_filter")
        .map(String::from);

    Ok(Generation {
        candidates,
        block_reason,
        usage: get_usage(response),
    })
}

#[derive(Debug, thiserror::Error)]
#[error("Context length exceeded. Message: {0}")]
pub struct ContextLengthExceededError(String);

pub fn check_openai_context_length_error(error: &Value) -> Option<ContextLengthExceededError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ContextLengthExceededError(message))
    } else {
        None
    }
}

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Incremental parser for an OpenAI chat completion event stream.
///
/// Bytes are fed as they arrive; complete `data:` events become chunks.
/// Tool call fragments are accumulated by index and released together when
/// the choice finishes or the stream ends.
#[derive(Debug, Default)]
pub struct ChatStreamParser {
    buffer: String,
    // trailing bytes of a utf-8 sequence split across network reads
    partial: Vec<u8>,
    pending: HashMap<u64, PendingCall>,
    done: bool,
}

impl ChatStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<GenerationChunk>> {
        self.partial.extend_from_slice(bytes);
        let valid = match std::str::from_utf8(&self.partial) {
            Ok(_) => self.partial.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.partial.len(),
        };
        let decoded: Vec<u8> = self.partial.drain(..valid).collect();
        self.buffer.push_str(&String::from_utf8_lossy(&decoded));
        // events may be delimited by CRLF pairs, and a pair can straddle two reads
        if self.buffer.contains("\r\n") {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut chunks = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let event: String = self.buffer.drain(..pos + 2).collect();
            chunks.extend(self.parse_event(&event)?);
        }
        Ok(chunks)
    }

    /// Called once the byte stream ends; releases anything still pending
    pub fn finish(&mut self) -> Result<Vec<GenerationChunk>> {
        let rest = std::mem::take(&mut self.buffer);
        let mut chunks = if rest.trim().is_empty() {
            Vec::new()
        } else {
            self.parse_event(&rest)?
        };
        if let Some(chunk) = self.flush_calls() {
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    fn parse_event(&mut self, event: &str) -> Result<Vec<GenerationChunk>> {
        let Some(data) = event
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .find_map(|line| line.strip_prefix("data:"))
            .map(str::trim)
        else {
            return Ok(Vec::new());
        };

        if data == "[DONE]" {
            self.done = true;
            return Ok(self.flush_calls().into_iter().collect());
        }

        let value: Value = serde_json::from_str(data)
            .map_err(|e| anyhow!("Malformed stream event {}: {}", data, e))?;
        if let Some(error) = value.get("error") {
            if let Some(err) = check_openai_context_length_error(error) {
                return Err(err.into());
            }
            return Err(anyhow!("OpenAI API error: {}", error));
        }

        let mut chunks = Vec::new();
        let choice = &value["choices"][0];
        let delta = &choice["delta"];

        if let Some(text) = delta["content"].as_str() {
            if !text.is_empty() {
                chunks.push(GenerationChunk::text(text));
            }
        }

        if let Some(calls) = delta["tool_calls"].as_array() {
            for call in calls {
                let index = call["index"].as_u64().unwrap_or(0);
                let pending = self.pending.entry(index).or_default();
                if let Some(id) = call["id"].as_str() {
                    pending.id = id.to_string();
                }
                if let Some(name) = call["function"]["name"].as_str() {
                    pending.name.push_str(name);
                }
                if let Some(arguments) = call["function"]["arguments"].as_str() {
                    pending.arguments.push_str(arguments);
                }
            }
        }

        if let Some(reason) = choice["finish_reason"].as_str() {
            let mut chunk = self.flush_calls().unwrap_or_default();
            chunk.finish_reason = Some(reason.to_string());
            if reason == "content_filter" {
                chunk.block_reason = Some(reason.to_string());
            }
            chunks.push(chunk);
        }

        if value.get("usage").is_some_and(|u| u.is_object()) {
            chunks.push(GenerationChunk {
                usage: Some(get_usage(&value)),
                ..Default::default()
            });
        }

        Ok(chunks)
    }

    fn flush_calls(&mut self) -> Option<GenerationChunk> {
        if self.pending.is_empty() {
            return None;
        }
        let mut indices: Vec<u64> = self.pending.keys().copied().collect();
        indices.sort_unstable();
        let content = indices
            .into_iter()
            .filter_map(|index| self.pending.remove(&index))
            .map(|call| parse_tool_call(&call.id, &call.name, &call.arguments))
            .collect();
        Some(GenerationChunk {
            content,
            ..Default::default()
        })
    }
}
