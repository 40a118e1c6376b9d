use super::base::{Generation, GenerateRequest, GenerationChunk, Provider};
use super::configs::OllamaProviderConfig;
use super::openai::ChatCompletionsClient;
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

pub const OLLAMA_HOST: &str = "http://localhost:11434";
pub const OLLAMA_MODEL: &str = "qwen2.5";

/// A local Ollama, reached through its OpenAI compatible endpoint
pub struct OllamaProvider {
    client: ChatCompletionsClient,
}

impl OllamaProvider {
    pub fn new(config: OllamaProviderConfig) -> Result<Self> {
        let client = ChatCompletionsClient::new(
            &config.host,
            None,
            config.temperature,
            config.max_tokens,
        )?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    async fn complete(&self, request: &GenerateRequest<'_>) -> Result<Generation> {
        self.client.complete(request).await
    }

    async fn stream(
        &self,
        request: &GenerateRequest<'_>,
    ) -> Result<BoxStream<'static, Result<GenerationChunk>>> {
        self.client.stream(request).await
    }
}
