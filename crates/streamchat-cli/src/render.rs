use streamchat_core::models::RecencyGroups;
use streamchat_core::{AssistantTurn, StreamStatus, Turn};

const ANSWER_HEADER: &str = "\n\n--- answer ---\n";
const SHORT_ID_LEN: usize = 8;

/// Turns successive snapshots of one assistant turn into the text not yet printed
#[derive(Debug, Default)]
pub struct TurnPrinter {
    reasoning_len: usize,
    answer_len: usize,
    in_answer: bool,
    ends_with_newline: bool,
}

impl TurnPrinter {
    pub fn delta(&mut self, turn: &AssistantTurn) -> String {
        let mut out = String::new();

        if let Some(new) = turn.content.get(self.reasoning_len..) {
            out.push_str(new);
            self.reasoning_len = turn.content.len();
        }

        let answer_phase = turn.answer_started_at.is_some() || !turn.last_answer.is_empty();
        if answer_phase && !self.in_answer {
            self.in_answer = true;
            if !turn.content.is_empty() {
                out.push_str(ANSWER_HEADER);
            }
        }

        if let Some(new) = turn.last_answer.get(self.answer_len..) {
            out.push_str(new);
            self.answer_len = turn.last_answer.len();
        }

        if let Some(last) = out.chars().last() {
            self.ends_with_newline = last == '\n';
        }
        out
    }

    /// Remaining text plus a one-line footer
    pub fn finish(&mut self, turn: &AssistantTurn, status: &StreamStatus) -> String {
        let mut out = self.delta(turn);
        let printed_anything = self.reasoning_len > 0 || self.answer_len > 0;
        if printed_anything && !self.ends_with_newline {
            out.push('\n');
        }

        let secs = turn.duration_seconds.unwrap_or(0);
        let footer = match status {
            StreamStatus::Completed => format!("(thought for {secs} seconds)\n"),
            StreamStatus::Cancelled => format!("(stopped after {secs} seconds)\n"),
            StreamStatus::Failed(message) => format!("(failed after {secs} seconds: {message})\n"),
        };
        out.push_str(&footer);
        out
    }
}

/// Full rendering of a stored conversation, with turn indexes for `/regen`
pub fn render_transcript(turns: &[Turn]) -> String {
    let mut out = String::new();
    for (index, turn) in turns.iter().enumerate() {
        match turn {
            Turn::System { content } => out.push_str(&format!("[{index}] system: {content}\n")),
            Turn::User { content } => out.push_str(&format!("[{index}] you: {content}\n")),
            Turn::Assistant(assistant) => {
                out.push_str(&format!("[{index}] assistant:\n"));
                let status = match &assistant.error {
                    Some(message) => StreamStatus::Failed(message.clone()),
                    None => StreamStatus::Completed,
                };
                out.push_str(&TurnPrinter::default().finish(assistant, &status));
            }
        }
    }
    out
}

pub fn render_groups(groups: &RecencyGroups<'_>) -> String {
    if groups.is_empty() {
        return "No saved chats\n".to_string();
    }

    let mut out = String::new();
    for (bucket, threads) in groups.iter() {
        out.push_str(&format!("{}\n", bucket.label()));
        for thread in threads {
            let short_id: String = thread.id.chars().take(SHORT_ID_LEN).collect();
            out.push_str(&format!("  {short_id}  {}\n", thread.title()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use streamchat_core::services::ReducerMode;

    #[test]
    fn test_printer_emits_only_new_text() {
        let mut turn = AssistantTurn::pending(Utc::now(), ReducerMode::DualPhase);
        let mut printer = TurnPrinter::default();

        turn.content = "Let me".to_string();
        assert_eq!(printer.delta(&turn), "Let me");
        turn.content = "Let me think".to_string();
        assert_eq!(printer.delta(&turn), " think");

        turn.answer_started_at = Some(Utc::now());
        assert_eq!(printer.delta(&turn), ANSWER_HEADER);
        turn.last_answer = "42".to_string();
        assert_eq!(printer.delta(&turn), "42");
        assert_eq!(printer.delta(&turn), "");

        turn.settle(turn.started_at + chrono::Duration::seconds(3));
        assert_eq!(
            printer.finish(&turn, &StreamStatus::Completed),
            "\n(thought for 3 seconds)\n"
        );
    }

    #[test]
    fn test_answer_without_reasoning_has_no_header() {
        let mut turn = AssistantTurn::pending(Utc::now(), ReducerMode::DualPhase);
        turn.answer_started_at = Some(Utc::now());
        turn.last_answer = "Yes".to_string();

        assert_eq!(TurnPrinter::default().delta(&turn), "Yes");
    }

    #[test]
    fn test_stopped_and_failed_footers() {
        let mut turn = AssistantTurn::pending(Utc::now(), ReducerMode::SinglePhase);
        turn.settle(turn.started_at);

        assert_eq!(
            TurnPrinter::default().finish(&turn, &StreamStatus::Cancelled),
            "(stopped after 0 seconds)\n"
        );
        let failed = StreamStatus::Failed("Server returned 502: ".to_string());
        assert_eq!(
            TurnPrinter::default().finish(&turn, &failed),
            "(failed after 0 seconds: Server returned 502: )\n"
        );
    }

    #[test]
    fn test_transcript_lists_indexes() {
        let mut reply = AssistantTurn::pending(Utc::now(), ReducerMode::SinglePhase);
        reply.content = "Hello!\n".to_string();
        reply.settle(reply.started_at);

        let transcript = render_transcript(&[
            Turn::system("Be nice"),
            Turn::user("hi"),
            Turn::Assistant(reply),
        ]);
        assert_eq!(
            transcript,
            "[0] system: Be nice\n[1] you: hi\n[2] assistant:\nHello!\n(thought for 0 seconds)\n"
        );
    }
}
