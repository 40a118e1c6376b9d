use async_stream::try_stream;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument, Span};

use crate::conversation::{self, ConversationState};
use crate::errors::{EngineError, EngineResult};
use crate::models::api::{
    ApiUsage, ChatCompletionRequest, ChatCompletionResponse, CompletionMeta, FinishReason,
    StreamChunk,
};
use crate::models::message::{Message, MessageContent, ToolRequest};
use crate::models::tool::{FunctionDescriptor, FunctionResult};
use crate::prompt_template::{load_prompt, InstructionContext};
use crate::providers::base::{GenerateRequest, Provider, SamplingParams, Usage};
use crate::registry::Registry;
use crate::router::{Invocation, Router};

pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 10;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Rounds of function call resolution allowed per request
    pub max_tool_iterations: usize,
    /// Tera template rendered into the backend's system instruction
    pub system_instruction: Option<String>,
    /// Buffer between the orchestrator task and the streaming transport
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            system_instruction: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// A validated request, ready to run
#[derive(Debug)]
pub struct PreparedRequest {
    pub meta: CompletionMeta,
    pub span: Span,
    system: String,
    conversation: ConversationState,
    tools: Vec<FunctionDescriptor>,
    params: SamplingParams,
}

impl PreparedRequest {
    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn tools(&self) -> &[FunctionDescriptor] {
        &self.tools
    }
}

/// Drives the ask model, resolve calls, feed results back loop
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<Registry>,
    provider: Arc<dyn Provider>,
    router: Router,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(registry: Arc<Registry>, provider: Arc<dyn Provider>, config: EngineConfig) -> Self {
        let router = Router::new(registry.clone());
        Self {
            registry,
            provider,
            router,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate a client request and build the initial conversation
    pub fn prepare(&self, request: ChatCompletionRequest) -> EngineResult<PreparedRequest> {
        if !self.registry.has_model(&request.model) {
            return Err(EngineError::UnknownModel(request.model));
        }

        let normalized = conversation::normalize(&request.messages)?;
        let tools = self.registry.filter_tools(&request.requested_tool_names());

        let configured = match &self.config.system_instruction {
            Some(template) => {
                let context = InstructionContext::new(
                    &request.model,
                    &tools,
                    self.registry.server_names(),
                );
                Some(
                    load_prompt(template, &context)
                        .map_err(|e| EngineError::Template(e.to_string()))?,
                )
            }
            None => None,
        };
        let system = conversation::system_instruction(configured.as_deref(), &normalized.system);

        let params = SamplingParams {
            temperature: request.temperature,
            top_p: request.top_p,
            max_tokens: request.max_tokens,
            stop: request.stop.map(|stop| stop.into_vec()).unwrap_or_default(),
        };

        let meta = CompletionMeta::new(request.model);
        let span = info_span!("completion", id = %meta.id, model = %meta.model);

        Ok(PreparedRequest {
            meta,
            span,
            system,
            conversation: normalized.conversation,
            tools,
            params,
        })
    }

    /// Run the loop to completion and return one buffered response
    pub async fn complete(
        &self,
        prepared: PreparedRequest,
        cancel: CancellationToken,
    ) -> EngineResult<ChatCompletionResponse> {
        let span = prepared.span.clone();
        self.run_buffered(prepared, cancel).instrument(span).await
    }

    async fn run_buffered(
        &self,
        prepared: PreparedRequest,
        cancel: CancellationToken,
    ) -> EngineResult<ChatCompletionResponse> {
        let PreparedRequest {
            meta,
            system,
            mut conversation,
            tools,
            params,
            ..
        } = prepared;
        let mut usage = Usage::default();
        let mut answer = String::new();
        let mut iteration = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let request = GenerateRequest {
                model: &meta.model,
                system: &system,
                messages: conversation.messages(),
                tools: &tools,
                params: &params,
            };
            debug!(iteration, messages = conversation.len(), "calling backend");
            let generation = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(EngineError::Cancelled),
                result = self.provider.complete(&request) => result.map_err(EngineError::backend),
            }?;
            usage.add(&generation.usage);

            let text = generation.text();
            answer.push_str(&text);
            let requests = generation.tool_requests();

            if requests.is_empty() {
                if text.is_empty() {
                    let (diagnostic, reason) =
                        anomaly(generation.block_reason.as_deref(), &generation.usage);
                    answer.push_str(&diagnostic);
                    return Ok(meta.response(answer, reason, &usage));
                }
                let reason = FinishReason::from_backend(generation.finish_reason());
                return Ok(meta.response(answer, reason, &usage));
            }

            if iteration == self.config.max_tool_iterations {
                answer.push_str(&loop_limit(self.config.max_tool_iterations));
                return Ok(meta.response(answer, FinishReason::ToolLoopLimit, &usage));
            }

            let turn = generation
                .candidates
                .into_iter()
                .fold(Message::assistant(), |turn, candidate| {
                    candidate.message.content.into_iter().fold(turn, append)
                });
            self.resolve(&mut conversation, turn, &cancel).await?;
            iteration += 1;
        }
    }

    /// Run the loop, forwarding text as it is generated. The stream opens
    /// with a role chunk and ends with one chunk carrying the finish reason
    /// and the usage of every backend call.
    pub fn stream(
        &self,
        prepared: PreparedRequest,
        cancel: CancellationToken,
    ) -> BoxStream<'static, EngineResult<StreamChunk>> {
        let this = self.clone();

        Box::pin(try_stream! {
            let PreparedRequest {
                meta,
                system,
                mut conversation,
                tools,
                params,
                ..
            } = prepared;
            let mut usage = Usage::default();
            let mut iteration = 0;

            yield meta.role_chunk();

            loop {
                if cancel.is_cancelled() {
                    Err::<(), _>(EngineError::Cancelled)?;
                }

                let request = GenerateRequest {
                    model: &meta.model,
                    system: &system,
                    messages: conversation.messages(),
                    tools: &tools,
                    params: &params,
                };
                debug!(iteration, messages = conversation.len(), "streaming from backend");
                let mut backend = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(EngineError::Cancelled),
                    result = this.provider.stream(&request) => result.map_err(EngineError::backend),
                }?;

                let mut turn = Message::assistant();
                let mut call_usage = Usage::default();
                let mut finish_reason = None;
                let mut block_reason = None;

                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(EngineError::Cancelled),
                        next = backend.next() => Ok(next),
                    }?;
                    let chunk = match next {
                        Some(chunk) => chunk.map_err(EngineError::backend)?,
                        None => break,
                    };

                    if let Some(chunk_usage) = &chunk.usage {
                        call_usage.add(chunk_usage);
                    }
                    if chunk.finish_reason.is_some() {
                        finish_reason = chunk.finish_reason;
                    }
                    if chunk.block_reason.is_some() {
                        block_reason = chunk.block_reason;
                    }
                    for content in chunk.content {
                        if let Some(text) = content.as_text() {
                            if !text.is_empty() {
                                yield meta.text_chunk(text);
                            }
                        }
                        turn = append(turn, content);
                    }
                }
                usage.add(&call_usage);

                if turn.tool_requests().next().is_none() {
                    if turn.text().is_empty() {
                        let (diagnostic, reason) = anomaly(block_reason.as_deref(), &call_usage);
                        yield meta.finish_chunk(Some(diagnostic), reason, &usage);
                    } else {
                        let reason = FinishReason::from_backend(finish_reason.as_deref());
                        yield meta.finish_chunk(None, reason, &usage);
                    }
                    break;
                }

                if iteration == this.config.max_tool_iterations {
                    let diagnostic = loop_limit(this.config.max_tool_iterations);
                    yield meta.finish_chunk(Some(diagnostic), FinishReason::ToolLoopLimit, &usage);
                    break;
                }

                this.resolve(&mut conversation, turn, &cancel).await?;
                iteration += 1;
            }
        })
    }

    /// Invoke every function call of `turn` in emitted order, then record the
    /// turn, its results and any prompt expansions
    async fn resolve(
        &self,
        conversation: &mut ConversationState,
        turn: Message,
        cancel: &CancellationToken,
    ) -> EngineResult<()> {
        let requests: Vec<ToolRequest> = turn.tool_requests().cloned().collect();
        let mut results = Message::user();
        let mut prompt_turns = Vec::new();

        for request in requests {
            let result = match &request.call {
                Ok(call) => {
                    let invocation = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                        invocation = self.router.invoke(call) => invocation?,
                    };
                    match invocation {
                        Invocation::Result(result) => result,
                        Invocation::PromptTurn { result, message } => {
                            prompt_turns.push(message);
                            result
                        }
                    }
                }
                Err(error) => {
                    debug!(id = %request.id, "backend emitted an unparseable call: {}", error);
                    FunctionResult::failure(request.name(), error, request.name(), "")
                }
            };
            results = results.with_tool_response(request.id, result);
        }

        conversation.push(turn);
        conversation.push(results);
        for message in prompt_turns {
            conversation.push(message);
        }
        Ok(())
    }
}

/// Add content to a message, merging consecutive text
fn append(mut message: Message, content: MessageContent) -> Message {
    if let (Some(MessageContent::Text(last)), MessageContent::Text(next)) =
        (message.content.last_mut(), &content)
    {
        last.text.push_str(&next.text);
        return message;
    }
    message.content.push(content);
    message
}

fn anomaly(block_reason: Option<&str>, usage: &Usage) -> (String, FinishReason) {
    let usage = ApiUsage::from(usage);
    let counts = format!(
        "prompt_tokens={}, completion_tokens={}, total_tokens={}",
        usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
    );
    match block_reason {
        Some(reason) => (
            format!(
                "The model returned no content (blocked: {}; {}).",
                reason, counts
            ),
            FinishReason::ContentFilter,
        ),
        None => (
            format!("The model returned no content ({}).", counts),
            FinishReason::Stop,
        ),
    }
}

fn loop_limit(max_iterations: usize) -> String {
    format!(
        "Tool loop limit exceeded: the model was still calling tools after {} rounds.",
        max_iterations
    )
}
