//! Explicit scout state and the synchronous reducers that are its only mutators.
//!
//! Network work happens between reducer calls (see `concierge`), so any
//! interleaving of overlapping operations can be reproduced in a test by
//! calling the reducers in that order.

use tracing::{info, warn};

use crate::conversation::{Affordances, Completion, ConversationController, NO_MATCHES};
use crate::error::ScoutError;
use crate::feedback::FeedbackEvent;
use crate::focus::visible_variants;
use crate::matches::{Match, MatchSource};
use crate::merger::{PreferenceUpdates, merge_chat_snapshot, merge_into};
use crate::models::FocusFields;
use crate::orchestrator::{SearchContext, SearchOutcome};
use crate::preferences::{ControlsPatch, PreferencePatch, PreferenceStore};

/// Handed out by `begin_search`; identifies the run in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchTicket {
    pub generation: u64,
}

#[derive(Debug, Clone)]
pub struct ScoutState {
    store: PreferenceStore,
    session_id: Option<String>,
    shortlist: Vec<String>,
    results: Vec<Match>,
    results_source: Option<MatchSource>,
    transcript: ConversationController,
    in_flight: usize,
    generation: u64,
}

impl ScoutState {
    pub fn new(history_turns: usize) -> Self {
        Self {
            store: PreferenceStore::default(),
            session_id: None,
            shortlist: Vec::new(),
            results: Vec::new(),
            results_source: None,
            transcript: ConversationController::new(history_turns),
            in_flight: 0,
            generation: 0,
        }
    }

    pub fn store(&self) -> &PreferenceStore {
        &self.store
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn shortlist(&self) -> &[String] {
        &self.shortlist
    }

    pub fn results(&self) -> &[Match] {
        &self.results
    }

    pub fn results_source(&self) -> Option<MatchSource> {
        self.results_source
    }

    pub fn transcript(&self) -> &ConversationController {
        &self.transcript
    }

    /// True from the first `begin_search` until every run has resolved.
    pub fn is_searching(&self) -> bool {
        self.in_flight > 0
    }

    /// Variant names the user can currently see, for focus resolution.
    pub fn visible_variants(&self) -> Vec<String> {
        visible_variants(
            self.results.iter().map(|m| m.variant.as_str()),
            self.shortlist.iter().map(String::as_str),
        )
    }

    pub fn search_context(&self, user_input: &str, focus: FocusFields) -> SearchContext {
        SearchContext {
            user_input: user_input.to_string(),
            history: self.transcript.history(),
            focus,
            session_id: self.session_id.clone(),
        }
    }

    pub fn record_user(&mut self, text: &str) {
        self.transcript.push_user(text);
    }

    pub fn record_bot(&mut self, text: &str, affordances: Affordances) {
        self.transcript.push_bot(text, affordances);
    }

    pub fn update_preferences(&mut self, patch: &PreferencePatch) -> bool {
        self.store.update(patch)
    }

    pub fn update_controls(&mut self, patch: &ControlsPatch) -> bool {
        self.store.update_controls(patch)
    }

    pub fn apply_updates(&mut self, updates: &PreferenceUpdates) -> bool {
        merge_into(&mut self.store, updates)
    }

    pub fn apply_chat_snapshot(
        &mut self,
        preferences: Option<&serde_json::Value>,
        controls: Option<&serde_json::Value>,
    ) -> bool {
        merge_chat_snapshot(&mut self.store, preferences, controls)
    }

    pub fn begin_search(&mut self) -> SearchTicket {
        self.in_flight += 1;
        self.generation += 1;
        self.transcript.begin_search();
        info!(
            "Search #{} started ({} in flight)",
            self.generation, self.in_flight
        );
        SearchTicket {
            generation: self.generation,
        }
    }

    fn finish(&mut self, ticket: SearchTicket) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if ticket.generation < self.generation {
            warn!(
                "Search #{} resolved after #{} was started; its result is applied as it arrives",
                ticket.generation, self.generation
            );
        }
    }

    /// Adopt an outcome. Results and session are overwritten by whichever run
    /// resolves last.
    pub fn complete_search(&mut self, ticket: SearchTicket, outcome: SearchOutcome) {
        self.finish(ticket);
        if let Some(session) = &outcome.session_id {
            self.session_id = Some(session.clone());
        }

        let note = outcome
            .focus_note()
            .or_else(|| outcome.matches.is_empty().then(|| NO_MATCHES.to_string()));
        let completion = Completion::new(
            outcome.telemetry.agent_trace.clone(),
            note,
            outcome.matches.clone(),
            outcome.source,
        );
        self.results = outcome.matches;
        self.results_source = Some(outcome.source);
        self.transcript
            .complete_search(completion, self.is_searching());
    }

    pub fn fail_search(&mut self, ticket: SearchTicket, error: &ScoutError) {
        self.finish(ticket);
        self.transcript
            .fail_search(error.user_message(), self.is_searching());
    }

    /// Shortlist mutation always succeeds locally; the event is for reporting.
    pub fn toggle_shortlist(&mut self, variant: &str) -> FeedbackEvent {
        if let Some(pos) = self.shortlist.iter().position(|v| v == variant) {
            self.shortlist.remove(pos);
            FeedbackEvent::RemovedFromShortlist(variant.to_string())
        } else {
            self.shortlist.push(variant.to_string());
            FeedbackEvent::ShortlistedVariant(variant.to_string())
        }
    }

    /// Back to a fresh conversation. Runs still in flight keep their count so
    /// the searching flag clears when they land.
    pub fn reset(&mut self) {
        self.store.reset();
        self.session_id = None;
        self.shortlist.clear();
        self.results.clear();
        self.results_source = None;
        self.transcript.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::EntryKind;
    use crate::matches::MatchDetail;
    use crate::orchestrator::Telemetry;
    use serde_json::json;

    fn outcome(session: &str, variants: &[&str]) -> SearchOutcome {
        SearchOutcome {
            matches: variants
                .iter()
                .map(|v| Match {
                    variant: v.to_string(),
                    spec: json!({}),
                    score: 50.0,
                    detail: MatchDetail::Basic,
                })
                .collect(),
            session_id: Some(session.to_string()),
            source: MatchSource::Basic,
            telemetry: Telemetry::default(),
        }
    }

    #[test]
    fn test_flag_spans_whole_run_and_clears_once() {
        let mut state = ScoutState::new(12);
        assert!(!state.is_searching());
        let ticket = state.begin_search();
        assert!(state.is_searching());
        state.complete_search(ticket, outcome("s-1", &["Creta SX"]));
        assert!(!state.is_searching());
        assert_eq!(state.session_id(), Some("s-1"));
    }

    #[test]
    fn test_overlapping_searches_last_writer_wins() {
        let mut state = ScoutState::new(12);
        let first = state.begin_search();
        let second = state.begin_search();

        state.complete_search(second, outcome("s-2", &["Nexon XZ"]));
        assert!(state.is_searching());
        assert!(state.transcript().has_indicator());

        state.complete_search(first, outcome("s-1", &["Venue S", "Sonet HTX"]));
        assert!(!state.is_searching());
        assert!(!state.transcript().has_indicator());
        assert_eq!(state.session_id(), Some("s-1"));
        assert_eq!(state.results().len(), 2);
    }

    #[test]
    fn test_failure_keeps_previous_results_and_session() {
        let mut state = ScoutState::new(12);
        let t = state.begin_search();
        state.complete_search(t, outcome("s-1", &["Creta SX"]));

        let t = state.begin_search();
        state.fail_search(
            t,
            &ScoutError::RecommendationFailed {
                cause: "timeout".to_string(),
            },
        );
        assert_eq!(state.session_id(), Some("s-1"));
        assert_eq!(state.results()[0].variant, "Creta SX");
        let last = state.transcript().entries().last().expect("entry");
        assert!(matches!(&last.kind, EntryKind::BotText { text, .. } if text.contains("timeout")));
    }

    #[test]
    fn test_empty_outcome_leaves_a_note() {
        let mut state = ScoutState::new(12);
        let t = state.begin_search();
        state.complete_search(t, outcome("s-1", &[]));
        let kinds: Vec<_> = state.transcript().entries().iter().map(|e| &e.kind).collect();
        assert_eq!(kinds.len(), 1);
        assert!(matches!(kinds[0], EntryKind::Note { .. }));
    }

    #[test]
    fn test_toggle_twice_restores_shortlist() {
        let mut state = ScoutState::new(12);
        state.toggle_shortlist("Altroz XZ");
        let before = state.shortlist().to_vec();

        let first = state.toggle_shortlist("Creta SX");
        let second = state.toggle_shortlist("Creta SX");
        assert_eq!(first.action(), "shortlisted_variant");
        assert_eq!(second.action(), "removed_from_shortlist");
        assert_eq!(state.shortlist(), before.as_slice());
    }

    #[test]
    fn test_visible_variants_union_results_and_shortlist() {
        let mut state = ScoutState::new(12);
        let t = state.begin_search();
        state.complete_search(t, outcome("s-1", &["Creta SX", "Seltos HTK"]));
        state.toggle_shortlist("Altroz XZ");
        state.toggle_shortlist("Creta SX");
        assert_eq!(
            state.visible_variants(),
            vec!["Creta SX", "Seltos HTK", "Altroz XZ"]
        );
    }

    #[test]
    fn test_reset_during_search_still_clears_flag_later() {
        let mut state = ScoutState::new(12);
        let t = state.begin_search();
        state.reset();
        assert!(state.session_id().is_none());
        assert!(state.is_searching());
        state.fail_search(
            t,
            &ScoutError::RecommendationFailed {
                cause: "offline".to_string(),
            },
        );
        assert!(!state.is_searching());
    }
}
