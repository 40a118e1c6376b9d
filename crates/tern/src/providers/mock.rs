use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::models::message::{Message, MessageContent};
use crate::providers::base::{
    Candidate, Generation, GenerateRequest, GenerationChunk, Provider, Usage,
};

/// One scripted backend reply
#[derive(Debug, Clone)]
pub enum MockReply {
    Message(Message),
    Error(String),
}

/// A mock provider that returns pre-configured responses for testing.
///
/// Replies are handed out in order; once they run out the last one repeats
/// when `repeat_last` is set, otherwise an empty assistant message is
/// returned. Streams split text into one chunk per word.
#[derive(Clone)]
pub struct MockProvider {
    replies: Arc<Mutex<Vec<MockReply>>>,
    repeat_last: bool,
    chunk_delay: Option<Duration>,
    usage: Usage,
    calls: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self::with_replies(responses.into_iter().map(MockReply::Message).collect())
    }

    pub fn with_replies(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies)),
            repeat_last: false,
            chunk_delay: None,
            usage: Usage::new(Some(1), Some(1), Some(2)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Keep answering with the last reply once the script is exhausted
    pub fn repeating(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    /// Pause before every streamed chunk
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Number of backend calls made so far
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }

    /// The conversation each call received, in call order
    pub fn histories(&self) -> Vec<Vec<Message>> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    fn next_reply(&self, request: &GenerateRequest<'_>) -> Result<Message> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.messages.to_vec());
        }
        let mut replies = self
            .replies
            .lock()
            .map_err(|_| anyhow!("mock provider lock poisoned"))?;
        let reply = if replies.len() > 1 || (!replies.is_empty() && !self.repeat_last) {
            Some(replies.remove(0))
        } else {
            replies.first().cloned()
        };
        match reply {
            Some(MockReply::Message(message)) => Ok(message),
            Some(MockReply::Error(error)) => Err(anyhow!(error)),
            None => Ok(Message::assistant()),
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(&self, request: &GenerateRequest<'_>) -> Result<Generation> {
        let message = self.next_reply(request)?;
        Ok(Generation {
            candidates: vec![Candidate {
                message,
                finish_reason: Some("stop".to_string()),
            }],
            block_reason: None,
            usage: self.usage.clone(),
        })
    }

    async fn stream(
        &self,
        request: &GenerateRequest<'_>,
    ) -> Result<BoxStream<'static, Result<GenerationChunk>>> {
        let message = self.next_reply(request)?;

        let mut chunks = Vec::new();
        for content in message.content {
            match content {
                MessageContent::Text(text) => {
                    chunks.extend(text.text.split_inclusive(' ').map(GenerationChunk::text))
                }
                other => chunks.push(GenerationChunk {
                    content: vec![other],
                    ..Default::default()
                }),
            }
        }
        chunks.push(GenerationChunk {
            finish_reason: Some("stop".to_string()),
            usage: Some(self.usage.clone()),
            ..Default::default()
        });

        let delay = self.chunk_delay;
        Ok(Box::pin(stream::iter(chunks).then(move |chunk| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok::<_, anyhow::Error>(chunk)
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::base::SamplingParams;

    fn request<'a>(messages: &'a [Message], params: &'a SamplingParams) -> GenerateRequest<'a> {
        GenerateRequest {
            model: "m1",
            system: "",
            messages,
            tools: &[],
            params,
        }
    }

    #[tokio::test]
    async fn test_replies_in_order_then_empty() {
        let provider = MockProvider::new(vec![
            Message::assistant().with_text("one"),
            Message::assistant().with_text("two"),
        ]);
        let params = SamplingParams::default();
        let messages = vec![Message::user().with_text("hi")];

        for expected in ["one", "two", ""] {
            let generation = provider.complete(&request(&messages, &params)).await.unwrap();
            assert_eq!(generation.text(), expected);
        }
        assert_eq!(provider.call_count(), 3);
        assert_eq!(provider.histories()[0], messages);
    }

    #[tokio::test]
    async fn test_repeating_and_errors() {
        let provider = MockProvider::with_replies(vec![
            MockReply::Error("quota exceeded".to_string()),
            MockReply::Message(Message::assistant().with_text("again")),
        ])
        .repeating();
        let params = SamplingParams::default();

        let error = provider.complete(&request(&[], &params)).await.unwrap_err();
        assert_eq!(error.to_string(), "quota exceeded");
        for _ in 0..3 {
            let generation = provider.complete(&request(&[], &params)).await.unwrap();
            assert_eq!(generation.text(), "again");
        }
    }

    #[tokio::test]
    async fn test_stream_splits_words() {
        let provider = MockProvider::new(vec![Message::assistant().with_text("a b c")]);
        let params = SamplingParams::default();
        let chunks: Vec<_> = provider
            .stream(&request(&[], &params))
            .await
            .unwrap()
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[1].content, vec![MessageContent::text("b ")]);
        assert_eq!(chunks[3].finish_reason.as_deref(), Some("stop"));
    }
}
