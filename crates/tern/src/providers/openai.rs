use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{Generation, GenerateRequest, GenerationChunk, Provider};
use super::configs::OpenAiProviderConfig;
use super::utils::{
    check_openai_context_length_error, messages_to_openai_spec, openai_response_to_generation,
    tools_to_openai_spec, ChatStreamParser,
};

/// Client for any `/v1/chat/completions` endpoint, shared by the OpenAI and
/// Ollama providers
pub(crate) struct ChatCompletionsClient {
    client: Client,
    host: String,
    api_key: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<i32>,
}

impl ChatCompletionsClient {
    pub(crate) fn new(
        host: &str,
        api_key: Option<String>,
        temperature: Option<f32>,
        max_tokens: Option<i32>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            api_key,
            temperature,
            max_tokens,
        })
    }

    fn payload(&self, request: &GenerateRequest<'_>, stream: bool) -> Result<Value> {
        let mut messages_array = Vec::new();
        if !request.system.is_empty() {
            messages_array.push(json!({
                "role": "system",
                "content": request.system
            }));
        }
        messages_array.extend(messages_to_openai_spec(request.messages));

        let mut payload = serde_json::Map::new();
        payload.insert("model".to_string(), json!(request.model));
        payload.insert("messages".to_string(), json!(messages_array));

        let tools_spec = tools_to_openai_spec(request.tools)?;
        if !tools_spec.is_empty() {
            payload.insert("tools".to_string(), json!(tools_spec));
        }

        // request parameters win over configured defaults
        let params = request.params;
        if let Some(temp) = params.temperature.or(self.temperature) {
            payload.insert("temperature".to_string(), json!(temp));
        }
        if let Some(top_p) = params.top_p {
            payload.insert("top_p".to_string(), json!(top_p));
        }
        if let Some(tokens) = params.max_tokens.or(self.max_tokens) {
            payload.insert("max_tokens".to_string(), json!(tokens));
        }
        if !params.stop.is_empty() {
            payload.insert("stop".to_string(), json!(params.stop));
        }
        if stream {
            payload.insert("stream".to_string(), json!(true));
            payload.insert(
                "stream_options".to_string(),
                json!({"include_usage": true}),
            );
        }

        Ok(Value::Object(payload))
    }

    async fn send(&self, payload: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/v1/chat/completions", self.host);

        let mut builder = self.client.post(&url).json(payload);
        if let Some(api_key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", api_key));
        }
        let response = builder
            .send()
            .await
            .with_context(|| format!("POST {}", url))?;

        match response.status() {
            StatusCode::OK => Ok(response),
            status if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500 => {
                Err(anyhow!("Server error: {}", status))
            }
            status => {
                let body: Value = response.json().await.unwrap_or(Value::Null);
                if let Some(err) = body
                    .get("error")
                    .and_then(check_openai_context_length_error)
                {
                    return Err(err.into());
                }
                Err(anyhow!("Request failed: {}\nResponse: {}", status, body))
            }
        }
    }

    pub(crate) async fn complete(&self, request: &GenerateRequest<'_>) -> Result<Generation> {
        let payload = self.payload(request, false)?;
        let response: Value = self.send(&payload).await?.json().await?;

        // Raise specific error if context length is exceeded
        if let Some(error) = response.get("error") {
            if let Some(err) = check_openai_context_length_error(error) {
                return Err(err.into());
            }
            return Err(anyhow!("OpenAI API error: {}", error));
        }

        openai_response_to_generation(&response)
    }

    pub(crate) async fn stream(
        &self,
        request: &GenerateRequest<'_>,
    ) -> Result<BoxStream<'static, Result<GenerationChunk>>> {
        let payload = self.payload(request, true)?;
        let mut bytes = self.send(&payload).await?.bytes_stream();

        Ok(Box::pin(async_stream::try_stream! {
            let mut parser = ChatStreamParser::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.context("reading completion stream")?;
                for item in parser.feed(&chunk)? {
                    yield item;
                }
                if parser.is_done() {
                    break;
                }
            }
            for item in parser.finish()? {
                yield item;
            }
        }))
    }
}

pub struct OpenAiProvider {
    client: ChatCompletionsClient,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let client = ChatCompletionsClient::new(
            &config.host,
            Some(config.api_key),
            config.temperature,
            config.max_tokens,
        )?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::{Message, MessageContent};
    use crate::models::tool::FunctionDescriptor;
    use crate::providers::base::{SamplingParams, Usage};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(host: String) -> OpenAiProviderConfig {
        OpenAiProviderConfig {
            host,
            api_key: "test_api_key".to_string(),
            model: "gpt-4o".to_string(),
            temperature: Some(0.7),
            max_tokens: None,
        }
    }

    async fn _setup_mock_server(response: ResponseTemplate) -> (MockServer, OpenAiProvider) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer test_api_key"))
            .respond_with(response)
            .mount(&mock_server)
            .await;

        let provider = OpenAiProvider::new(config(mock_server.uri())).unwrap();
        (mock_server, provider)
    }

    fn request<'a>(
        messages: &'a [Message],
        tools: &'a [FunctionDescriptor],
        params: &'a SamplingParams,
    ) -> GenerateRequest<'a> {
        GenerateRequest {
            model: "gpt-4o",
            system: "You are a helpful assistant.",
            messages,
            tools,
            params,
        }
    }

    #[tokio::test]
    async fn test_complete_basic() -> Result<()> {
        let response_body = json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Hello! How can I assist you today?",
                    "tool_calls": null
                },
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 12,
                "completion_tokens": 15,
                "total_tokens": 27
            }
        });
        let (_, provider) =
            _setup_mock_server(ResponseTemplate::new(200).set_body_json(response_body)).await;

        let messages = vec![Message::user().with_text("Hello?")];
        let params = SamplingParams::default();
        let generation = provider.complete(&request(&messages, &[], &params)).await?;

        assert_eq!(generation.text(), "Hello! How can I assist you today?");
        assert_eq!(generation.usage, Usage::new(Some(12), Some(15), Some(27)));
        Ok(())
    }

    #[tokio::test]
    async fn test_complete_tool_request() -> Result<()> {
        let response_body = json!({
            "id": "chatcmpl-tool",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_123",
                        "type": "function",
                        "function": {
                            "name": "MCP0tool_get_weather",
                            "arguments": "{\"location\":\"San Francisco, CA\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {
                "prompt_tokens": 20,
                "completion_tokens": 15,
                "total_tokens": 35
            }
        });
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({
                "model": "gpt-4o",
                "temperature": 0.25,
                "tools": [{"type": "function", "function": {"name": "MCP0tool_get_weather"}}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(response_body))
            .mount(&mock_server)
            .await;
        let provider = OpenAiProvider::new(config(mock_server.uri()))?;

        let messages = vec![Message::user().with_text("What's the weather in San Francisco?")];
        let tool = FunctionDescriptor::new(
            "MCP0tool_get_weather",
            "Gets the current weather for a location",
            json!({
                "type": "object",
                "properties": {
                    "location": {
                        "type": "string",
                        "description": "The city and state, e.g. New York, NY"
                    }
                },
                "required": ["location"]
            }),
        );
        let params = SamplingParams {
            temperature: Some(0.25),
            ..Default::default()
        };
        let generation = provider
            .complete(&request(&messages, &[tool], &params))
            .await?;

        let requests = generation.tool_requests();
        let call = requests[0].call.as_ref().unwrap();
        assert_eq!(requests[0].id, "call_123");
        assert_eq!(call.name, "MCP0tool_get_weather");
        assert_eq!(call.arguments["location"], json!("San Francisco, CA"));
        assert_eq!(generation.usage.total_tokens, Some(35));
        Ok(())
    }

    #[tokio::test]
    async fn test_context_length_error() {
        let (_, provider) = _setup_mock_server(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": "context_length_exceeded", "message": "too many tokens"}
        })))
        .await;

        let messages = vec![Message::user().with_text("Hello?")];
        let params = SamplingParams::default();
        let error = provider
            .complete(&request(&messages, &[], &params))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("Context length exceeded"));
    }

    #[tokio::test]
    async fn test_stream_text() -> Result<()> {
        let body = [
            json!({"choices": [{"delta": {"role": "assistant", "content": "Hel"}, "finish_reason": null}]}),
            json!({"choices": [{"delta": {"content": "lo"}, "finish_reason": null}]}),
            json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}),
        ]
        .iter()
        .map(|event| format!("data: {}\n\n", event))
        .collect::<String>()
            + "data: [DONE]\n\n";
        let (_, provider) = _setup_mock_server(
            ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"),
        )
        .await;

        let messages = vec![Message::user().with_text("Hello?")];
        let params = SamplingParams::default();
        let chunks: Vec<_> = provider
            .stream(&request(&messages, &[], &params))
            .await?
            .collect()
            .await;

        let chunks: Vec<GenerationChunk> = chunks.into_iter().collect::<Result<_>>()?;
        let text: String = chunks
            .iter()
            .flat_map(|c| c.content.iter())
            .filter_map(MessageContent::as_text)
            .collect();
        assert_eq!(text, "Hello");
        assert_eq!(chunks.last().unwrap().finish_reason.as_deref(), Some("stop"));
        Ok(())
    }

    #[tokio::test]
    async fn test_server_error() {
        let (_, provider) = _setup_mock_server(ResponseTemplate::new(503)).await;
        let messages = vec![Message::user().with_text("Hello?")];
        let params = SamplingParams::default();
        let result = provider.complete(&request(&messages, &[], &params)).await;
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Server error: 503"));
    }
}
