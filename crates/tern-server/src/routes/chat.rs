use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::Stream;
use http::header;
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use tern::models::api::{ChatCompletionRequest, FinishReason};
use tern::relay::{self, RelayStream};
use tokio_util::sync::CancellationToken;

use crate::error::{method_not_allowed, ApiError};
use crate::state::AppState;

const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Server-sent event body: one `data:` frame per chunk, then `[DONE]` once
/// the completion has finished normally.
struct SseResponse {
    relay: RelayStream,
    finished: bool,
    closed: bool,
}

impl SseResponse {
    fn new(relay: RelayStream) -> Self {
        Self {
            relay,
            finished: false,
            closed: false,
        }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, serde_json::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.closed {
            return Poll::Ready(None);
        }

        match Pin::new(&mut self.relay).poll_next(cx) {
            Poll::Ready(Some(chunk)) => {
                if let Some(reason) = chunk.finish_reason() {
                    self.finished = reason != FinishReason::Error;
                }
                let frame = serde_json::to_string(&chunk)
                    .map(|json| Bytes::from(format!("data: {}\n\n", json)));
                Poll::Ready(Some(frame))
            }
            Poll::Ready(None) => {
                self.closed = true;
                if self.finished {
                    Poll::Ready(Some(Ok(Bytes::from_static(DONE_FRAME.as_bytes()))))
                } else {
                    Poll::Ready(None)
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> Response {
        let body = axum::body::Body::from_stream(self);
        (
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            body,
        )
            .into_response()
    }
}

async fn chat_completions(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: ChatCompletionRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid request body: {}", e)))?;
    let streaming = request.stream;

    let prepared = state.orchestrator.prepare(request)?;
    let cancel = CancellationToken::new();

    if streaming {
        let relay = relay::start(&state.orchestrator, prepared, cancel).await?;
        Ok(SseResponse::new(relay).into_response())
    } else {
        // a client disconnect drops this future, which cancels the run
        let _guard = cancel.clone().drop_guard();
        let response = state.orchestrator.complete(prepared, cancel).await?;
        Ok(Json(response).into_response())
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/chat/completions",
            post(chat_completions).fallback(method_not_allowed),
        )
        .with_state(state)
}
