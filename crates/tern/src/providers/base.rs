use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};

use crate::models::message::{Message, MessageContent, ToolRequest};
use crate::models::tool::FunctionDescriptor;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }

    /// Accumulate another call's counters into this one
    pub fn add(&mut self, other: &Usage) {
        fn sum(a: Option<i32>, b: Option<i32>) -> Option<i32> {
            match (a, b) {
                (Some(a), Some(b)) => Some(a.saturating_add(b)),
                (a, b) => a.or(b),
            }
        }
        self.input_tokens = sum(self.input_tokens, other.input_tokens);
        self.output_tokens = sum(self.output_tokens, other.output_tokens);
        self.total_tokens = sum(self.total_tokens, other.total_tokens);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamplingParams {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<i32>,
    pub stop: Vec<String>,
}

/// Everything a backend needs for one generation
#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub system: &'a str,
    pub messages: &'a [Message],
    pub tools: &'a [FunctionDescriptor],
    pub params: &'a SamplingParams,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub message: Message,
    pub finish_reason: Option<String>,
}

/// A complete backend reply
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub candidates: Vec<Candidate>,
    /// Set when the backend refused to answer, e.g. `content_filter`
    pub block_reason: Option<String>,
    pub usage: Usage,
}

impl Generation {
    pub fn text(&self) -> String {
        self.candidates
            .iter()
            .map(|candidate| candidate.message.text())
            .collect::<Vec<_>>()
            .join("")
    }

    /// Function calls of every candidate, in the order they were emitted
    pub fn tool_requests(&self) -> Vec<ToolRequest> {
        self.candidates
            .iter()
            .flat_map(|candidate| candidate.message.tool_requests().cloned())
            .collect()
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.candidates
            .iter()
            .find_map(|candidate| candidate.finish_reason.as_deref())
    }
}

/// One increment of a streamed reply. Text arrives as it is generated,
/// function calls only once their arguments are complete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationChunk {
    pub content: Vec<MessageContent>,
    pub finish_reason: Option<String>,
    pub block_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl GenerationChunk {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self {
            content: vec![MessageContent::text(text)],
            ..Default::default()
        }
    }
}

impl From<Generation> for GenerationChunk {
    fn from(generation: Generation) -> Self {
        let finish_reason = generation.finish_reason().map(String::from);
        GenerationChunk {
            content: generation
                .candidates
                .into_iter()
                .flat_map(|candidate| candidate.message.content)
                .collect(),
            finish_reason,
            block_reason: generation.block_reason,
            usage: Some(generation.usage),
        }
    }
}

/// Base trait for AI providers (OpenAI, Ollama, etc)
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate the next message for the conversation
    async fn complete(&self, request: &GenerateRequest<'_>) -> Result<Generation>;

    /// Streaming counterpart of [`Provider::complete`]. Backends without native
    /// streaming answer with their whole reply as a single chunk.
    async fn stream(
        &self,
        request: &GenerateRequest<'_>,
    ) -> Result<BoxStream<'static, Result<GenerationChunk>>> {
        let generation = self.complete(request).await?;
        Ok(Box::pin(stream::once(async move {
            Ok::<_, anyhow::Error>(GenerationChunk::from(generation))
        })))
    }
}
