use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::ReducerMode;

/// Speaker of a turn, as sent over the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a conversation.
///
/// Persisted with an internal `role` tag so stored threads read as
/// `{"role": "user", "content": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Turn {
    System { content: String },
    User { content: String },
    Assistant(AssistantTurn),
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::System { .. } => Role::System,
            Self::User { .. } => Role::User,
            Self::Assistant(_) => Role::Assistant,
        }
    }

    /// Text sent to the completion service for this turn.
    /// Assistant turns send their reasoning followed by the final answer.
    pub fn wire_content(&self) -> String {
        match self {
            Self::System { content } | Self::User { content } => content.clone(),
            Self::Assistant(turn) => format!("{}{}", turn.content, turn.last_answer),
        }
    }

    pub fn as_assistant(&self) -> Option<&AssistantTurn> {
        match self {
            Self::Assistant(turn) => Some(turn),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.as_assistant().is_some_and(AssistantTurn::is_loading)
    }
}

/// Assistant reply being (or having been) streamed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantTurn {
    /// Reasoning text in dual-phase mode, the whole reply in single-phase mode
    #[serde(default)]
    pub content: String,
    /// Final answer, filled once the phase marker has been seen
    #[serde(default)]
    pub last_answer: String,
    #[serde(default)]
    pub reasoning_loading: bool,
    #[serde(default)]
    pub answer_loading: bool,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
    /// Set when the stream ended on a transport failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AssistantTurn {
    /// Empty turn waiting for its first chunk
    pub fn pending(started_at: DateTime<Utc>, mode: ReducerMode) -> Self {
        Self {
            content: String::new(),
            last_answer: String::new(),
            reasoning_loading: mode == ReducerMode::DualPhase,
            answer_loading: true,
            started_at,
            answer_started_at: None,
            ended_at: None,
            duration_seconds: None,
            error: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.reasoning_loading || self.answer_loading
    }

    /// Clear loading flags and stamp the end time
    pub fn settle(&mut self, ended_at: DateTime<Utc>) {
        self.reasoning_loading = false;
        self.answer_loading = false;
        self.ended_at = Some(ended_at);
        self.duration_seconds = Some(rounded_seconds(self.started_at, ended_at));
    }
}

/// Whole seconds between two instants, rounded half up; never negative
pub fn rounded_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    let millis = end.signed_duration_since(start).num_milliseconds().max(0) as u64;
    (millis + 500) / 1000
}
