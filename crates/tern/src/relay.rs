//! Moves orchestrator output onto its own task and hands the transport a
//! single-consumer chunk stream. Dropping the stream cancels the request.
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::Instrument;

use crate::errors::{EngineError, EngineResult};
use crate::models::api::{FinishReason, StreamChunk};
use crate::orchestrator::{Orchestrator, PreparedRequest};
use crate::providers::base::Usage;

pub struct RelayStream {
    inner: ReceiverStream<StreamChunk>,
    _guard: DropGuard,
}

impl Stream for RelayStream {
    type Item = StreamChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Start streaming a prepared request.
///
/// Output is polled inline until the first backend chunk arrives, so a
/// backend that fails immediately surfaces as an error here rather than as
/// a half-written event stream. Later failures end the stream with one
/// chunk whose finish reason is `error`.
pub async fn start(
    orchestrator: &Orchestrator,
    prepared: PreparedRequest,
    cancel: CancellationToken,
) -> EngineResult<RelayStream> {
    let meta = prepared.meta.clone();
    let span = prepared.span.clone();
    let capacity = orchestrator.config().channel_capacity.max(1);
    let mut chunks = orchestrator.stream(prepared, cancel.clone());

    // the role chunk, then the first chunk produced by the backend
    let mut opening = Vec::with_capacity(2);
    while opening.len() < 2 {
        match chunks.next().instrument(span.clone()).await {
            Some(Ok(chunk)) => {
                let finished = chunk.finish_reason().is_some();
                opening.push(chunk);
                if finished {
                    break;
                }
            }
            Some(Err(error)) => return Err(error),
            None => break,
        }
    }

    let (tx, rx) = mpsc::channel(capacity);
    let pump_cancel = cancel.clone();
    tokio::spawn(
        async move {
            for chunk in opening {
                if tx.send(chunk).await.is_err() {
                    pump_cancel.cancel();
                    return;
                }
            }

            loop {
                let item = tokio::select! {
                    biased;
                    _ = tx.closed() => {
                        tracing::debug!("stream consumer went away");
                        pump_cancel.cancel();
                        return;
                    }
                    item = chunks.next() => item,
                };

                match item {
                    Some(Ok(chunk)) => {
                        if tx.send(chunk).await.is_err() {
                            pump_cancel.cancel();
                            return;
                        }
                    }
                    Some(Err(EngineError::Cancelled)) => {
                        tracing::debug!("stream cancelled");
                        return;
                    }
                    Some(Err(error)) => {
                        tracing::error!("stream failed: {}", error);
                        let chunk = meta.finish_chunk(
                            Some(error.to_string()),
                            FinishReason::Error,
                            &Usage::default(),
                        );
                        let _ = tx.send(chunk).await;
                        return;
                    }
                    None => return,
                }
            }
        }
        .instrument(span),
    );

    Ok(RelayStream {
        inner: ReceiverStream::new(rx),
        _guard: cancel.drop_guard(),
    })
}
