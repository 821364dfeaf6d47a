use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::models::{AssistantTurn, ConversationStore, RecencyGroups, Thread, Turn};
use crate::services::{
    CancelHandle, ChunkStream, Clock, CompletionRequest, CompletionTransport, MarkerScan,
    ReducerMode, StreamReducer, TransportError,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("No turn at index {index} (conversation has {len} turns)")]
    TurnOutOfRange { index: usize, len: usize },

    #[error("Turn {index} is not an assistant turn")]
    NotAnAssistantTurn { index: usize },
}

/// What `send` did with its input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank input, nothing happened
    Ignored,
    /// A stream was in flight and has been stopped
    Stopped,
    /// A new stream was opened
    Streaming,
}

/// How a stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    Completed,
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The assistant turn at `index` has new text
    TurnUpdated { index: usize },
    /// The stream into the turn at `index` is over and the turn is settled
    Finished { index: usize, status: StreamStatus },
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub reducer_mode: ReducerMode,
    pub marker_scan: MarkerScan,
    /// Start fresh sessions with a system turn holding the system prompt
    pub seed_system_turn: bool,
    /// Used until a system prompt has been saved
    pub default_system_prompt: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            reducer_mode: ReducerMode::default(),
            marker_scan: MarkerScan::default(),
            seed_system_turn: true,
            default_system_prompt: None,
        }
    }
}

/// The single stream that may be in flight
struct ActiveStream {
    index: usize,
    stream: ChunkStream,
    reducer: StreamReducer,
    cancel: CancelHandle,
}

/// Drives one chat session: the displayed turns, the active thread and at
/// most one in-flight stream.
///
/// The owner polls [`SessionController::next_event`] while
/// [`SessionController::needs_poll`] holds, typically inside a
/// `tokio::select!` next to user input.
pub struct SessionController {
    store: ConversationStore,
    transport: Arc<dyn CompletionTransport>,
    clock: Arc<dyn Clock>,
    options: SessionOptions,
    turns: Vec<Turn>,
    draft: String,
    active: Option<ActiveStream>,
    /// Event whose save was interrupted; handed out by the next `next_event`
    pending_event: Option<StreamEvent>,
}

impl SessionController {
    pub fn new(
        store: ConversationStore,
        transport: Arc<dyn CompletionTransport>,
        clock: Arc<dyn Clock>,
        options: SessionOptions,
    ) -> Self {
        let mut controller = Self {
            store,
            transport,
            clock,
            options,
            turns: Vec::new(),
            draft: String::new(),
            active: None,
            pending_event: None,
        };
        controller.turns = controller.seed_turns();
        controller
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn is_sending(&self) -> bool {
        self.active.is_some()
    }

    /// Whether `next_event` has something to hand out, either from the open
    /// stream or an event whose save was cut short
    pub fn needs_poll(&self) -> bool {
        self.active.is_some() || self.pending_event.is_some()
    }

    /// Index of the turn currently being streamed into
    pub fn streaming_index(&self) -> Option<usize> {
        self.active.as_ref().map(|active| active.index)
    }

    /// Handle that cancels the in-flight stream from another task
    pub fn cancel_handle(&self) -> Option<CancelHandle> {
        self.active.as_ref().map(|active| active.cancel.clone())
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn active_thread_id(&self) -> Option<&str> {
        self.store.active_thread_id()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// System prompt in effect: the saved one, else the configured default
    pub fn system_prompt(&self) -> Option<&str> {
        self.store
            .system_prompt()
            .or(self.options.default_system_prompt.as_deref())
    }

    pub fn group_threads<Tz: TimeZone>(&self, now: DateTime<Tz>) -> RecencyGroups<'_> {
        self.store.group_by_recency(now)
    }

    /// Send `text` as a user turn and start streaming the reply.
    /// While a stream is in flight this stops it instead.
    pub async fn send(&mut self, text: &str) -> SendOutcome {
        if self.is_sending() {
            self.stop().await;
            return SendOutcome::Stopped;
        }
        if text.trim().is_empty() {
            return SendOutcome::Ignored;
        }

        let now = self.clock.now();
        self.turns.push(Turn::user(text));
        let index = self.turns.len();
        self.turns.push(Turn::Assistant(AssistantTurn::pending(
            now,
            self.options.reducer_mode,
        )));
        self.draft.clear();

        if !self.store.update_active_thread_turns(&self.turns).await {
            self.store.create_thread(self.turns.clone(), now).await;
        }

        self.start_stream(index, now);
        SendOutcome::Streaming
    }

    /// Wait for the next change to the streaming turn. Returns `None` when
    /// there is nothing left to report.
    ///
    /// Dropping the future loses nothing, so it can sit in a `select!` branch.
    /// If it is dropped while the turns are being saved, the next call redoes
    /// the save and returns the same event.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if let Some(event) = self.pending_event.clone() {
            return self.publish(event).await;
        }

        let active = self.active.as_mut()?;
        let item = active.stream.next().await;
        let now = self.clock.now();

        match item {
            Some(Ok(chunk)) if !active.cancel.is_cancelled() => {
                let index = active.index;
                let turn = active.reducer.push(&chunk, now);
                debug!(turn = index, len = chunk.len(), "Folded chunk");

                if let Some(slot) = self.turns.get_mut(index) {
                    *slot = Turn::Assistant(turn);
                }
                self.publish(StreamEvent::TurnUpdated { index }).await
            }
            Some(Ok(_)) => {
                debug!("Discarding chunk that arrived after cancel");
                self.finalize(StreamStatus::Cancelled, now).await
            }
            Some(Err(TransportError::Cancelled)) => {
                self.finalize(StreamStatus::Cancelled, now).await
            }
            Some(Err(e)) => {
                error!(error = %e, "Completion stream failed");
                self.finalize(StreamStatus::Failed(e.to_string()), now).await
            }
            None => self.finalize(StreamStatus::Completed, now).await,
        }
    }

    /// Stop the in-flight stream and freeze its turn. Returns false when idle.
    pub async fn stop(&mut self) -> bool {
        let Some(active) = &self.active else {
            if self.pending_event.take().is_some() {
                self.store.update_active_thread_turns(&self.turns).await;
            }
            return false;
        };
        active.cancel.cancel();

        let now = self.clock.now();
        self.finalize(StreamStatus::Cancelled, now).await.is_some()
    }

    /// Discard the assistant turn at `index` and everything after it, then
    /// stream a fresh reply into that position
    pub async fn regenerate(&mut self, index: usize) -> Result<(), SessionError> {
        match self.turns.get(index) {
            Some(Turn::Assistant(_)) => {}
            Some(_) => return Err(SessionError::NotAnAssistantTurn { index }),
            None => {
                return Err(SessionError::TurnOutOfRange {
                    index,
                    len: self.turns.len(),
                });
            }
        }

        self.stop().await;

        let now = self.clock.now();
        self.turns.truncate(index + 1);
        self.turns[index] =
            Turn::Assistant(AssistantTurn::pending(now, self.options.reducer_mode));
        self.store.update_active_thread_turns(&self.turns).await;

        info!(turn = index, "Regenerating reply");
        self.start_stream(index, now);
        Ok(())
    }

    /// Start a fresh, unsaved session
    pub async fn new_thread(&mut self) {
        self.stop().await;
        self.store.clear_active();
        self.turns = self.seed_turns();
    }

    /// Show a stored thread. An unknown id leaves a fresh session.
    pub async fn open_thread(&mut self, id: &str) -> bool {
        self.stop().await;
        match self.store.set_active_thread(id) {
            Some(thread) => {
                self.turns = thread.turns.clone();
                true
            }
            None => {
                self.turns = self.seed_turns();
                false
            }
        }
    }

    pub async fn delete_thread(&mut self, id: &str) -> bool {
        let was_active = self.store.active_thread_id() == Some(id);
        if was_active {
            self.stop().await;
        }

        let deleted = self.store.delete_thread(id).await;
        if deleted && was_active {
            self.turns = self.seed_turns();
        }
        deleted
    }

    /// Delete every stored thread and start a fresh session
    pub async fn clear_history(&mut self) {
        self.stop().await;
        self.store.clear_all().await;
        self.turns = self.seed_turns();
    }

    /// Save the system prompt. A fresh session that has not sent anything yet
    /// is reseeded with it.
    pub async fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.store.set_system_prompt(prompt).await;

        let untouched = self.store.active_thread_id().is_none()
            && !self.is_sending()
            && self.turns.iter().all(|turn| matches!(turn, Turn::System { .. }));
        if untouched {
            self.turns = self.seed_turns();
        }
    }

    pub fn thread(&self, id: &str) -> Option<&Thread> {
        self.store.thread(id)
    }

    fn seed_turns(&self) -> Vec<Turn> {
        match self.system_prompt() {
            Some(prompt) if self.options.seed_system_turn && !prompt.trim().is_empty() => {
                vec![Turn::system(prompt)]
            }
            _ => Vec::new(),
        }
    }

    fn start_stream(&mut self, index: usize, started_at: DateTime<Utc>) {
        let request = CompletionRequest::from_turns(&self.turns[..index]);
        info!(turn = index, messages = request.messages.len(), "Stream started");

        let cancel = CancelHandle::new();
        let stream = self.transport.open_stream(request, cancel.clone());
        self.pending_event = None;
        self.active = Some(ActiveStream {
            index,
            stream,
            reducer: StreamReducer::new(
                self.options.reducer_mode,
                self.options.marker_scan,
                started_at,
            ),
            cancel,
        });
    }

    /// Save the turns, then return `event`. The event is parked first so a
    /// save cut short by a dropped future is retried by `next_event`.
    async fn publish(&mut self, event: StreamEvent) -> Option<StreamEvent> {
        self.pending_event = Some(event);
        self.store.update_active_thread_turns(&self.turns).await;
        self.pending_event.take()
    }

    async fn finalize(
        &mut self,
        status: StreamStatus,
        now: DateTime<Utc>,
    ) -> Option<StreamEvent> {
        let ActiveStream {
            index, mut reducer, ..
        } = self.active.take()?;

        let turn = match &status {
            StreamStatus::Completed => reducer.finish(now),
            StreamStatus::Cancelled => reducer.interrupt(now, None),
            StreamStatus::Failed(message) => reducer.interrupt(now, Some(message.clone())),
        };
        info!(
            turn = index,
            status = ?status,
            duration_seconds = turn.duration_seconds,
            "Stream finished"
        );

        if let Some(slot) = self.turns.get_mut(index) {
            *slot = Turn::Assistant(turn);
        }
        self.publish(StreamEvent::Finished { index, status }).await
    }
}
