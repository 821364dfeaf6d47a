use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::AssistantTurn;

/// Line the completion service emits between reasoning and the final answer
pub const FINAL_ANSWER_MARKER: &str = "=== Final Answer ===";

/// How a response stream maps onto an assistant turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReducerMode {
    /// Reasoning until the marker, final answer after it
    #[default]
    DualPhase,
    /// The whole stream is one reply; the marker has no meaning
    SinglePhase,
}

/// Where the marker is looked for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerScan {
    /// Substring test on each chunk alone. A chunk holding the marker is
    /// dropped whole, along with any text around the marker. A marker split
    /// across two chunks is not recognized and ends up in the reasoning text.
    #[default]
    PerChunk,
    /// Holds back a trailing partial marker until the next chunk arrives, and
    /// keeps text on either side of the marker: before it as reasoning, after
    /// it as answer
    Windowed,
}

/// Folds raw response chunks into assistant turn snapshots.
///
/// Pure: no I/O, and the same chunk sequence with the same timestamps always
/// produces the same snapshots.
#[derive(Debug)]
pub struct StreamReducer {
    mode: ReducerMode,
    scan: MarkerScan,
    started_at: DateTime<Utc>,
    primary: String,
    secondary: String,
    sentinel_seen: bool,
    answer_started_at: Option<DateTime<Utc>>,
    utf8: Utf8Carry,
    /// Unpublished tail that may be the start of the marker (windowed scan only)
    window: String,
}

impl StreamReducer {
    pub fn new(mode: ReducerMode, scan: MarkerScan, started_at: DateTime<Utc>) -> Self {
        Self {
            mode,
            scan,
            started_at,
            primary: String::new(),
            secondary: String::new(),
            sentinel_seen: false,
            answer_started_at: None,
            utf8: Utf8Carry::default(),
            window: String::new(),
        }
    }

    pub fn sentinel_seen(&self) -> bool {
        self.sentinel_seen
    }

    /// Fold one chunk and return the turn as it should now be displayed
    pub fn push(&mut self, chunk: &[u8], now: DateTime<Utc>) -> AssistantTurn {
        let text = self.utf8.decode(chunk);
        self.fold(&text, now);
        self.snapshot()
    }

    /// The stream ended normally: publish everything held back and settle the turn
    pub fn finish(&mut self, now: DateTime<Utc>) -> AssistantTurn {
        let mut rest = std::mem::take(&mut self.window);
        rest.push_str(&self.utf8.flush());
        if self.mode == ReducerMode::DualPhase && self.sentinel_seen {
            self.secondary.push_str(&rest);
        } else {
            self.primary.push_str(&rest);
        }

        let mut turn = self.snapshot();
        turn.settle(now);
        turn
    }

    /// The stream was stopped or failed: settle the turn at its last published text
    pub fn interrupt(&mut self, now: DateTime<Utc>, error: Option<String>) -> AssistantTurn {
        let mut turn = self.snapshot();
        turn.settle(now);
        turn.error = error;
        turn
    }

    fn fold(&mut self, text: &str, now: DateTime<Utc>) {
        if self.mode == ReducerMode::SinglePhase {
            self.primary.push_str(text);
            return;
        }
        if self.sentinel_seen {
            self.secondary.push_str(text);
            return;
        }

        let scanned = match self.scan {
            MarkerScan::PerChunk => text.to_string(),
            MarkerScan::Windowed => {
                let mut joined = std::mem::take(&mut self.window);
                joined.push_str(text);
                joined
            }
        };

        if let Some(pos) = scanned.find(FINAL_ANSWER_MARKER) {
            if self.scan == MarkerScan::Windowed {
                self.primary.push_str(&scanned[..pos]);
                self.secondary
                    .push_str(&scanned[pos + FINAL_ANSWER_MARKER.len()..]);
            }
            self.sentinel_seen = true;
            self.answer_started_at = Some(now);
            debug!(reasoning_len = self.primary.len(), "Final answer marker seen");
            return;
        }

        match self.scan {
            MarkerScan::PerChunk => self.primary.push_str(&scanned),
            MarkerScan::Windowed => {
                let split = scanned.len() - marker_prefix_suffix_len(&scanned);
                self.primary.push_str(&scanned[..split]);
                self.window = scanned[split..].to_string();
            }
        }
    }

    fn snapshot(&self) -> AssistantTurn {
        AssistantTurn {
            content: self.primary.clone(),
            last_answer: self.secondary.clone(),
            reasoning_loading: self.mode == ReducerMode::DualPhase && !self.sentinel_seen,
            answer_loading: true,
            started_at: self.started_at,
            answer_started_at: self.answer_started_at,
            ended_at: None,
            duration_seconds: None,
            error: None,
        }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of the marker
fn marker_prefix_suffix_len(text: &str) -> usize {
    (1..FINAL_ANSWER_MARKER.len())
        .rev()
        .find(|&len| {
            len <= text.len()
                && text.is_char_boundary(text.len() - len)
                && FINAL_ANSWER_MARKER.starts_with(&text[text.len() - len..])
        })
        .unwrap_or(0)
}

/// UTF-8 decoder that carries an incomplete trailing sequence into the next chunk
#[derive(Debug, Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn decode(&mut self, bytes: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(bytes);

        let mut out = String::with_capacity(buf.len());
        let mut rest = &buf[..];
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    fn flush(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn run(reducer: &mut StreamReducer, chunks: &[&str]) -> AssistantTurn {
        let mut last = None;
        for (i, chunk) in chunks.iter().enumerate() {
            last = Some(reducer.push(chunk.as_bytes(), at(i as i64 * 100)));
        }
        reducer.finish(at(10_000));
        last.unwrap_or_else(|| reducer.interrupt(at(0), None))
    }

    #[test]
    fn test_without_marker_content_is_concatenation() {
        let chunks = ["Hel", "lo, ", "", "wor", "ld\n", "== not the marker =="];
        for mode in [ReducerMode::DualPhase, ReducerMode::SinglePhase] {
            for scan in [MarkerScan::PerChunk, MarkerScan::Windowed] {
                let mut reducer = StreamReducer::new(mode, scan, at(0));
                for chunk in chunks {
                    reducer.push(chunk.as_bytes(), at(1));
                }
                let turn = reducer.finish(at(2));
                assert_eq!(turn.content, chunks.concat(), "{mode:?} {scan:?}");
                assert_eq!(turn.last_answer, "");
                assert!(!turn.is_loading());
            }
        }
    }

    #[test]
    fn test_marker_splits_reasoning_and_answer() {
        let mut reducer = StreamReducer::new(ReducerMode::DualPhase, MarkerScan::PerChunk, at(0));

        let turn = reducer.push(b"A", at(100));
        assert_eq!(turn.content, "A");
        assert!(turn.reasoning_loading && turn.answer_loading);

        let turn = reducer.push(FINAL_ANSWER_MARKER.as_bytes(), at(200));
        assert_eq!(turn.content, "A");
        assert_eq!(turn.last_answer, "");
        assert!(!turn.reasoning_loading);
        assert!(turn.answer_loading);
        assert_eq!(turn.answer_started_at, Some(at(200)));

        reducer.push(b"B", at(300));
        let turn = reducer.push(b"C", at(400));
        assert_eq!(turn.content, "A");
        assert_eq!(turn.last_answer, "BC");

        let turn = reducer.finish(at(1_600));
        assert_eq!(turn.content, "A");
        assert_eq!(turn.last_answer, "BC");
        assert!(!turn.is_loading());
        assert_eq!(turn.ended_at, Some(at(1_600)));
        assert_eq!(turn.duration_seconds, Some(2));
    }

    #[test]
    fn test_per_chunk_drops_whole_marker_chunk() {
        let mut reducer = StreamReducer::new(ReducerMode::DualPhase, MarkerScan::PerChunk, at(0));
        reducer.push(b"A", at(1));
        let turn = reducer.push(b"tail\n=== Final Answer ===\nhead", at(2));
        assert!(reducer.sentinel_seen());
        assert_eq!(turn.content, "A");
        assert_eq!(turn.last_answer, "");
        assert!(!turn.reasoning_loading);

        reducer.push(b"B", at(3));
        let turn = reducer.finish(at(4));
        assert_eq!(turn.content, "A");
        assert_eq!(turn.last_answer, "B");
    }

    #[test]
    fn test_windowed_keeps_text_around_marker() {
        let mut reducer = StreamReducer::new(ReducerMode::DualPhase, MarkerScan::Windowed, at(0));
        reducer.push(b"A", at(1));
        let turn = reducer.push(b"tail\n=== Final Answer ===\nhead", at(2));
        assert!(reducer.sentinel_seen());
        assert_eq!(turn.content, "Atail\n");
        assert_eq!(turn.last_answer, "\nhead");

        reducer.push(b"B", at(3));
        let turn = reducer.finish(at(4));
        assert_eq!(turn.content, "Atail\n");
        assert_eq!(turn.last_answer, "\nheadB");
    }

    #[test]
    fn test_second_marker_is_answer_text() {
        let mut reducer = StreamReducer::new(ReducerMode::DualPhase, MarkerScan::PerChunk, at(0));
        let turn = run(
            &mut reducer,
            &["r", FINAL_ANSWER_MARKER, "a", FINAL_ANSWER_MARKER],
        );
        assert_eq!(turn.content, "r");
        assert_eq!(turn.last_answer, format!("a{FINAL_ANSWER_MARKER}"));
    }

    #[test]
    fn test_split_marker_missed_by_per_chunk_scan() {
        let mut reducer = StreamReducer::new(ReducerMode::DualPhase, MarkerScan::PerChunk, at(0));
        reducer.push(b"x=== Final ", at(1));
        reducer.push(b"Answer ===y", at(2));
        let turn = reducer.finish(at(3));
        assert!(!reducer.sentinel_seen());
        assert_eq!(turn.content, "x=== Final Answer ===y");
        assert_eq!(turn.last_answer, "");
    }

    #[test]
    fn test_split_marker_found_by_windowed_scan() {
        let mut reducer = StreamReducer::new(ReducerMode::DualPhase, MarkerScan::Windowed, at(0));

        let turn = reducer.push(b"x=== Final ", at(1));
        // The possible marker prefix is held back
        assert_eq!(turn.content, "x");

        let turn = reducer.push(b"Answer ===y", at(2));
        assert!(reducer.sentinel_seen());
        assert_eq!(turn.content, "x");
        assert_eq!(turn.last_answer, "y");
    }

    #[test]
    fn test_windowed_scan_releases_false_prefix() {
        let mut reducer = StreamReducer::new(ReducerMode::DualPhase, MarkerScan::Windowed, at(0));

        assert_eq!(reducer.push(b"a ==", at(1)).content, "a ");
        assert_eq!(reducer.push(b"= b", at(2)).content, "a === b");

        reducer.push(b" ===", at(3));
        let turn = reducer.finish(at(4));
        assert_eq!(turn.content, "a === b ===");
    }

    #[test]
    fn test_single_phase_ignores_marker() {
        let mut reducer = StreamReducer::new(ReducerMode::SinglePhase, MarkerScan::PerChunk, at(0));
        let turn = reducer.push(b"A", at(1));
        assert!(!turn.reasoning_loading);
        assert!(turn.answer_loading);

        reducer.push(FINAL_ANSWER_MARKER.as_bytes(), at(2));
        let turn = reducer.push(b"B", at(3));
        assert_eq!(turn.content, format!("A{FINAL_ANSWER_MARKER}B"));
        assert_eq!(turn.last_answer, "");
        assert!(!reducer.sentinel_seen());
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let text = "héllo 世界";
        let bytes = text.as_bytes();
        let mut reducer = StreamReducer::new(ReducerMode::DualPhase, MarkerScan::PerChunk, at(0));

        // Split inside 'é' and inside '世'
        let turn = reducer.push(&bytes[..2], at(1));
        assert_eq!(turn.content, "h");
        reducer.push(&bytes[2..9], at(2));
        let turn = reducer.push(&bytes[9..], at(3));
        assert_eq!(turn.content, text);
    }

    #[test]
    fn test_invalid_bytes_become_replacement() {
        let mut reducer = StreamReducer::new(ReducerMode::SinglePhase, MarkerScan::PerChunk, at(0));
        let turn = reducer.push(b"a\xffb", at(1));
        assert_eq!(turn.content, "a\u{FFFD}b");

        // A dangling lead byte is flushed lossily at the end
        reducer.push(b"\xe4", at(2));
        let turn = reducer.finish(at(3));
        assert_eq!(turn.content, "a\u{FFFD}b\u{FFFD}");
    }

    #[test]
    fn test_interrupt_freezes_last_published() {
        let mut reducer = StreamReducer::new(ReducerMode::DualPhase, MarkerScan::Windowed, at(0));
        let published = reducer.push(b"partial ===", at(500));

        let turn = reducer.interrupt(at(2_000), Some("connection reset".to_string()));
        assert_eq!(turn.content, published.content);
        assert_eq!(turn.content, "partial ");
        assert!(!turn.is_loading());
        assert_eq!(turn.duration_seconds, Some(2));
        assert_eq!(turn.error.as_deref(), Some("connection reset"));
    }

    #[test]
    fn test_marker_prefix_suffix_len() {
        assert_eq!(marker_prefix_suffix_len(""), 0);
        assert_eq!(marker_prefix_suffix_len("abc"), 0);
        assert_eq!(marker_prefix_suffix_len("abc="), 1);
        assert_eq!(marker_prefix_suffix_len("abc=== Fin"), 7);
        assert_eq!(marker_prefix_suffix_len("世="), 1);
    }
}
