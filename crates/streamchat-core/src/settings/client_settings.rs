use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::controllers::SessionOptions;
use crate::services::{DEFAULT_ENDPOINT, MarkerScan, ReducerMode};

/// User-editable client configuration. Every field falls back to its default
/// when missing from the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub endpoint: String,
    pub reducer_mode: ReducerMode,
    pub marker_scan: MarkerScan,
    /// Give up on a stream after this many seconds without data; unset or 0 waits forever
    pub idle_timeout_secs: Option<u64>,
    pub seed_system_turn: bool,
    pub default_system_prompt: Option<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            reducer_mode: ReducerMode::default(),
            marker_scan: MarkerScan::default(),
            idle_timeout_secs: None,
            seed_system_turn: true,
            default_system_prompt: None,
        }
    }
}

impl ClientSettings {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            reducer_mode: self.reducer_mode,
            marker_scan: self.marker_scan,
            seed_system_turn: self.seed_system_turn,
            default_system_prompt: self.default_system_prompt.clone(),
        }
    }
}
