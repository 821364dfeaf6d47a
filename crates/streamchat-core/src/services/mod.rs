pub mod clock;
pub mod http_transport;
#[cfg(test)]
pub(crate) mod scripted_transport;
pub mod stream_reducer;
pub mod transport;

pub use clock::{Clock, SystemClock};
pub use http_transport::{DEFAULT_ENDPOINT, HttpTransport};
pub use stream_reducer::{FINAL_ANSWER_MARKER, MarkerScan, ReducerMode, StreamReducer};
pub use transport::{
    CancelHandle, ChunkStream, CompletionRequest, CompletionTransport, TransportError,
    WireMessage, with_cancellation,
};
