//! Test transport driven by hand from the test body.

use std::sync::Arc;

use futures::StreamExt;
use futures::channel::mpsc;
use parking_lot::Mutex;

use super::transport::{
    CancelHandle, ChunkStream, CompletionRequest, CompletionTransport, TransportError,
    with_cancellation,
};

type ChunkSender = mpsc::UnboundedSender<Result<Vec<u8>, TransportError>>;

#[derive(Default)]
struct ScriptState {
    requests: Vec<CompletionRequest>,
    current: Option<ChunkSender>,
}

/// Each `open_stream` records the request and opens a channel; the test then
/// feeds the latest stream with `push_chunk`, `finish` and `fail`.
#[derive(Clone, Default)]
pub(crate) struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_chunk(&self, chunk: impl AsRef<[u8]>) {
        if let Some(sender) = &self.state.lock().current {
            let _ = sender.unbounded_send(Ok(chunk.as_ref().to_vec()));
        }
    }

    /// End the latest stream normally
    pub(crate) fn finish(&self) {
        self.state.lock().current.take();
    }

    /// End the latest stream with a failure
    pub(crate) fn fail(&self, error: TransportError) {
        if let Some(sender) = self.state.lock().current.take() {
            let _ = sender.unbounded_send(Err(error));
        }
    }

    pub(crate) fn requests(&self) -> Vec<CompletionRequest> {
        self.state.lock().requests.clone()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// True once the consumer has dropped the latest stream
    pub(crate) fn stream_dropped(&self) -> bool {
        self.state
            .lock()
            .current
            .as_ref()
            .is_none_or(|sender| sender.is_closed())
    }
}

impl CompletionTransport for ScriptedTransport {
    fn open_stream(&self, request: CompletionRequest, cancel: CancelHandle) -> ChunkStream {
        let (tx, rx) = mpsc::unbounded();
        let mut state = self.state.lock();
        state.requests.push(request);
        state.current = Some(tx);

        with_cancellation(rx.boxed(), cancel)
    }
}
