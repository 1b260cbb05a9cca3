//! Ordered conversation transcript.
//!
//! The transcript is append-only except for the searching indicator, which is
//! swapped out for the search's result entries in a single mutation so no
//! reader ever observes a half-finished completion.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::matches::{Match, MatchSource};
use crate::models::HistoryMessage;

/// UI hints attached to an assistant message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Affordances {
    pub show_starter_prompts: bool,
    pub offer_advanced_tuning: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryKind {
    UserText {
        text: String,
    },
    BotText {
        text: String,
        affordances: Affordances,
    },
    SearchingIndicator,
    AgentTrace {
        trace: Value,
    },
    Note {
        text: String,
    },
    ResultsBlock {
        matches: Vec<Match>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationEntry {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EntryKind,
}

impl ConversationEntry {
    fn new(kind: EntryKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            at: Utc::now(),
            kind,
        }
    }

    pub fn is_indicator(&self) -> bool {
        matches!(self.kind, EntryKind::SearchingIndicator)
    }

    /// Text turns are what the service sees as conversation history.
    fn as_history(&self) -> Option<HistoryMessage> {
        match &self.kind {
            EntryKind::UserText { text } => Some(HistoryMessage::user(text.clone())),
            EntryKind::BotText { text, .. } => Some(HistoryMessage::bot(text.clone())),
            _ => None,
        }
    }
}

/// Everything a finished search contributes to the transcript.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub trace: Option<Value>,
    pub note: Option<String>,
    pub matches: Vec<Match>,
    pub summary: Option<String>,
}

impl Completion {
    /// Closing line is only produced when there is something to close over.
    pub fn new(
        trace: Option<Value>,
        note: Option<String>,
        matches: Vec<Match>,
        source: MatchSource,
    ) -> Self {
        let summary = summarize(&matches, source);
        Self {
            trace,
            note,
            matches,
            summary,
        }
    }
}

fn summarize(matches: &[Match], source: MatchSource) -> Option<String> {
    let top = matches.first()?;
    let count = matches.len();
    let noun = if count == 1 { "match" } else { "matches" };
    let mut text = format!(
        "I found {count} {noun}. {} leads with a score of {:.1}.",
        top.variant, top.score
    );
    if source == MatchSource::Basic {
        text.push_str(" Detailed reasoning was unavailable for this search, so scores are shown without explanations.");
    }
    text.push_str(" Shortlist the ones you like or ask me about any of them.");
    Some(text)
}

pub const NO_MATCHES: &str =
    "I couldn't find any variants for those preferences. Try widening the budget or relaxing a filter.";

#[derive(Debug, Clone)]
pub struct ConversationController {
    entries: Vec<ConversationEntry>,
    history_turns: usize,
}

impl ConversationController {
    pub fn new(history_turns: usize) -> Self {
        Self {
            entries: Vec::new(),
            history_turns,
        }
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.entries
            .push(ConversationEntry::new(EntryKind::UserText { text: text.into() }));
    }

    pub fn push_bot(&mut self, text: impl Into<String>, affordances: Affordances) {
        self.entries.push(ConversationEntry::new(EntryKind::BotText {
            text: text.into(),
            affordances,
        }));
    }

    pub fn has_indicator(&self) -> bool {
        self.entries.iter().any(ConversationEntry::is_indicator)
    }

    /// Appends the searching indicator. At most one is ever live; a second
    /// search moves it to the end instead of adding another.
    pub fn begin_search(&mut self) {
        self.remove_indicator();
        self.entries
            .push(ConversationEntry::new(EntryKind::SearchingIndicator));
    }

    fn remove_indicator(&mut self) {
        self.entries.retain(|e| !e.is_indicator());
    }

    /// Swap the indicator for the completion's entries in fixed order:
    /// trace, note, results, summary. `still_searching` keeps an indicator
    /// at the tail for overlapping searches that have not resolved yet.
    pub fn complete_search(&mut self, completion: Completion, still_searching: bool) {
        let mut tail = Vec::with_capacity(5);
        if let Some(trace) = completion.trace {
            tail.push(ConversationEntry::new(EntryKind::AgentTrace { trace }));
        }
        if let Some(text) = completion.note {
            tail.push(ConversationEntry::new(EntryKind::Note { text }));
        }
        let had_results = !completion.matches.is_empty();
        if had_results {
            tail.push(ConversationEntry::new(EntryKind::ResultsBlock {
                matches: completion.matches,
            }));
            if let Some(text) = completion.summary {
                tail.push(ConversationEntry::new(EntryKind::BotText {
                    text,
                    affordances: Affordances {
                        show_starter_prompts: false,
                        offer_advanced_tuning: true,
                    },
                }));
            }
        }
        self.splice_tail(tail, still_searching);
    }

    /// Replace the indicator with an error message.
    pub fn fail_search(&mut self, message: impl Into<String>, still_searching: bool) {
        let tail = vec![ConversationEntry::new(EntryKind::BotText {
            text: message.into(),
            affordances: Affordances::default(),
        })];
        self.splice_tail(tail, still_searching);
    }

    fn splice_tail(&mut self, mut tail: Vec<ConversationEntry>, still_searching: bool) {
        self.remove_indicator();
        if still_searching {
            tail.push(ConversationEntry::new(EntryKind::SearchingIndicator));
        }
        self.entries.extend(tail);
    }

    /// Most recent text turns, oldest first.
    pub fn history(&self) -> Vec<HistoryMessage> {
        let mut turns: Vec<HistoryMessage> = self
            .entries
            .iter()
            .rev()
            .filter_map(ConversationEntry::as_history)
            .take(self.history_turns)
            .collect();
        turns.reverse();
        turns
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matches::MatchDetail;
    use serde_json::json;

    fn m(variant: &str, score: f64) -> Match {
        Match {
            variant: variant.to_string(),
            spec: json!({ "variant": variant }),
            score,
            detail: MatchDetail::Basic,
        }
    }

    fn kinds(c: &ConversationController) -> Vec<&'static str> {
        c.entries()
            .iter()
            .map(|e| match e.kind {
                EntryKind::UserText { .. } => "user",
                EntryKind::BotText { .. } => "bot",
                EntryKind::SearchingIndicator => "searching",
                EntryKind::AgentTrace { .. } => "trace",
                EntryKind::Note { .. } => "note",
                EntryKind::ResultsBlock { .. } => "results",
            })
            .collect()
    }

    #[test]
    fn test_completion_replaces_indicator_in_fixed_order() {
        let mut c = ConversationController::new(12);
        c.push_user("SUV under 15 lakh");
        c.begin_search();
        assert!(c.has_indicator());

        c.complete_search(
            Completion::new(
                Some(json!({ "steps": 3 })),
                Some("Showing variants from the Creta family.".to_string()),
                vec![m("Creta SX", 88.0), m("Creta S", 80.0)],
                MatchSource::Rich,
            ),
            false,
        );
        assert_eq!(kinds(&c), vec!["user", "trace", "note", "results", "bot"]);
        assert!(!c.has_indicator());
    }

    #[test]
    fn test_empty_results_skip_block_and_summary() {
        let mut c = ConversationController::new(12);
        c.begin_search();
        c.complete_search(Completion::new(None, None, vec![], MatchSource::Basic), false);
        assert!(c.is_empty());
    }

    #[test]
    fn test_single_indicator_even_with_overlapping_searches() {
        let mut c = ConversationController::new(12);
        c.begin_search();
        c.push_user("also diesel please");
        c.begin_search();
        assert_eq!(kinds(&c), vec!["user", "searching"]);

        c.complete_search(
            Completion::new(None, None, vec![m("Nexon XZ", 75.0)], MatchSource::Rich),
            true,
        );
        assert_eq!(kinds(&c), vec!["user", "results", "bot", "searching"]);

        c.fail_search("Failed to get recommendations: timeout", false);
        assert_eq!(kinds(&c), vec!["user", "results", "bot", "bot"]);
    }

    #[test]
    fn test_history_keeps_recent_text_turns_only() {
        let mut c = ConversationController::new(2);
        c.push_user("hello");
        c.push_bot("hi, what budget?", Affordances::default());
        c.begin_search();
        c.complete_search(
            Completion::new(None, None, vec![m("Venue S", 60.0)], MatchSource::Basic),
            false,
        );
        c.push_user("which has better mileage?");

        let history = c.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, "bot");
        assert!(history[0].text.starts_with("I found 1 match."));
        assert_eq!(history[1], HistoryMessage::user("which has better mileage?"));
    }

    #[test]
    fn test_basic_summary_mentions_missing_reasoning() {
        let text = summarize(&[m("Venue S", 60.0)], MatchSource::Basic).expect("summary");
        assert!(text.contains("Venue S leads with a score of 60.0"));
        assert!(text.contains("without explanations"));
        assert!(summarize(&[], MatchSource::Rich).is_none());
    }
}
