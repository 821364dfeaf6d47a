use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::debug;

use crate::models::{Role, Turn};

/// Raw response chunks, in arrival order. Ends with `None` on normal completion.
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Stream cancelled")]
    Cancelled,

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("No data received for {0:?}")]
    IdleTimeout(Duration),

    #[error("Network error: {0}")]
    Network(String),
}

impl TransportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

/// Request body sent to the completion endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionRequest {
    pub messages: Vec<WireMessage>,
}

impl CompletionRequest {
    /// Build the request from conversation turns, skipping turns with no text
    pub fn from_turns(turns: &[Turn]) -> Self {
        let messages = turns
            .iter()
            .filter_map(|turn| {
                let content = turn.wire_content();
                if content.trim().is_empty() {
                    return None;
                }
                Some(WireMessage {
                    role: turn.role(),
                    content,
                })
            })
            .collect();

        Self { messages }
    }
}

/// Shared cancellation signal for one stream.
///
/// Clones observe the same flag. Cancelling wakes any task waiting in
/// [`CancelHandle::cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            debug!("Cancel requested");
        }
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent cancel is not missed
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Something that can stream a completion for a conversation
pub trait CompletionTransport: Send + Sync + 'static {
    /// Open a response stream. Nothing is sent until the stream is first polled.
    /// Once `cancel` fires the stream yields a single `TransportError::Cancelled`
    /// and ends.
    fn open_stream(&self, request: CompletionRequest, cancel: CancelHandle) -> ChunkStream;
}

/// Races every read of `inner` against `cancel`.
///
/// Ends after the first error so callers see at most one failure per stream.
pub fn with_cancellation(inner: ChunkStream, cancel: CancelHandle) -> ChunkStream {
    Box::pin(async_stream::stream! {
        let mut inner = inner;
        loop {
            if cancel.is_cancelled() {
                yield Err(TransportError::Cancelled);
                return;
            }

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = inner.next() => Some(item),
            };

            match next {
                None => {
                    yield Err(TransportError::Cancelled);
                    return;
                }
                Some(None) => return,
                Some(Some(item)) => {
                    let failed = item.is_err();
                    yield item;
                    if failed {
                        return;
                    }
                }
            }
        }
    })
}
