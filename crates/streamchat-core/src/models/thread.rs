use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::turn::Turn;

const TITLE_MAX_CHARS: usize = 48;

/// A persisted conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub turns: Vec<Turn>,
}

impl Thread {
    pub fn new(id: String, created_at: DateTime<Utc>, turns: Vec<Turn>) -> Self {
        Self {
            id,
            created_at,
            turns,
        }
    }

    /// Title for the thread picker: the first line of the first user turn
    pub fn title(&self) -> String {
        let first_user = self.turns.iter().find_map(|turn| match turn {
            Turn::User { content } => content.lines().find(|line| !line.trim().is_empty()),
            _ => None,
        });

        match first_user {
            Some(line) => {
                let line = line.trim();
                if line.chars().count() > TITLE_MAX_CHARS {
                    let cut: String = line.chars().take(TITLE_MAX_CHARS).collect();
                    format!("{}…", cut.trim_end())
                } else {
                    line.to_string()
                }
            }
            None => "New chat".to_string(),
        }
    }

    /// Settle turns left loading by a stream that never finished, ending them
    /// at the last instant they recorded. Returns the number of turns touched.
    pub fn settle_interrupted(&mut self) -> usize {
        let mut settled = 0;
        for turn in &mut self.turns {
            if let Turn::Assistant(assistant) = turn
                && assistant.is_loading()
            {
                let last_seen = assistant
                    .ended_at
                    .or(assistant.answer_started_at)
                    .unwrap_or(assistant.started_at);
                assistant.settle(last_seen);
                settled += 1;
            }
        }
        settled
    }
}
