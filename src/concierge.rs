//! Front door for user actions.
//!
//! Each action runs reducers on `ScoutState`, performs at most one network
//! effect that holds no borrow of the state, then feeds the result back
//! through another reducer. Overlapping searches are expressed with
//! `start_search` / `PendingSearch::run` / `finish_search`.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::conversation::Affordances;
use crate::error::{Result, ScoutError};
use crate::feedback::{FeedbackEmitter, FeedbackEvent};
use crate::focus::{FocusTarget, Resolution, resolve_focus};
use crate::merger::{PreferenceUpdates, follow_up_question};
use crate::models::{AskRequest, ChatRequest, FocusFields, HistoryMessage};
use crate::orchestrator::{SearchContext, SearchOrchestrator, SearchOutcome};
use crate::preferences::{ControlsPatch, PreferencePatch, PreferenceStore};
use crate::state::{ScoutState, SearchTicket};
use crate::transport::{HttpTransport, RecommendTransport};

pub const GREETING: &str = "Hi! Tell me what you're looking for in a car: budget, body style, fuel, or how you'll use it. I'll find matching variants.";

const UPDATED: &str = "Got it, I've updated your preferences.";

/// A search that has been registered with the state but not yet sent.
pub struct PendingSearch {
    ticket: SearchTicket,
    store: PreferenceStore,
    ctx: SearchContext,
    orchestrator: Arc<SearchOrchestrator>,
}

pub struct SearchResolution {
    ticket: SearchTicket,
    result: Result<SearchOutcome>,
}

impl PendingSearch {
    pub fn ticket(&self) -> SearchTicket {
        self.ticket
    }

    pub async fn run(self) -> SearchResolution {
        let result = self.orchestrator.search(&self.store, &self.ctx).await;
        SearchResolution {
            ticket: self.ticket,
            result,
        }
    }
}

pub struct Concierge {
    state: ScoutState,
    transport: Arc<dyn RecommendTransport>,
    orchestrator: Arc<SearchOrchestrator>,
    feedback: FeedbackEmitter,
    ask_timeout: Duration,
    chat_timeout: Duration,
}

impl Concierge {
    pub fn new(config: &Config, transport: Arc<dyn RecommendTransport>) -> Self {
        let orchestrator = Arc::new(SearchOrchestrator::new(
            Arc::clone(&transport),
            config.primary_timeout(),
            config.fallback_timeout(),
        ));
        let feedback = FeedbackEmitter::new(
            Arc::clone(&transport),
            config.feedback_timeout(),
            config.feedback.enabled,
        );
        let mut state = ScoutState::new(config.search.history_turns);
        state.record_bot(GREETING, starter_prompts());
        Self {
            state,
            transport,
            orchestrator,
            feedback,
            ask_timeout: config.ask_timeout(),
            chat_timeout: config.chat_timeout(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn state(&self) -> &ScoutState {
        &self.state
    }

    /// Logged only; an unhealthy service still gets the full fallback protocol.
    pub async fn probe_health(&self) -> bool {
        match self.transport.health().await {
            Ok(()) => {
                info!("Recommendation service is healthy");
                true
            }
            Err(e) => {
                warn!("Recommendation service health check failed: {}", e);
                false
            }
        }
    }

    pub fn update_preferences(&mut self, patch: &PreferencePatch) -> bool {
        self.state.update_preferences(patch)
    }

    pub fn update_controls(&mut self, patch: &ControlsPatch) -> bool {
        self.state.update_controls(patch)
    }

    /// Registers a search. Validation happens here so an invalid form never
    /// shows a searching indicator or reaches the network.
    pub fn start_search(&mut self, user_input: &str, focus: FocusFields) -> Result<PendingSearch> {
        if let Err(e) = self.state.store().validate() {
            self.state.record_bot(&e.user_message(), Affordances::default());
            return Err(e);
        }
        let ctx = self.state.search_context(user_input, focus);
        let ticket = self.state.begin_search();
        Ok(PendingSearch {
            ticket,
            store: self.state.store().clone(),
            ctx,
            orchestrator: Arc::clone(&self.orchestrator),
        })
    }

    /// Applies a resolved search; returns the number of matches adopted.
    pub fn finish_search(&mut self, resolution: SearchResolution) -> Result<usize> {
        match resolution.result {
            Ok(outcome) => {
                let count = outcome.matches.len();
                self.state.complete_search(resolution.ticket, outcome);
                Ok(count)
            }
            Err(e) => {
                warn!("Search #{} failed: {}", resolution.ticket.generation, e);
                self.state.fail_search(resolution.ticket, &e);
                Err(e)
            }
        }
    }

    async fn search(&mut self, user_input: &str, focus: FocusFields) -> Result<usize> {
        let pending = self.start_search(user_input, focus)?;
        let resolution = pending.run().await;
        self.finish_search(resolution)
    }

    /// Structured form submission.
    pub async fn submit_search(&mut self) -> Result<usize> {
        self.emit(FeedbackEvent::SearchSubmitted);
        self.search("", FocusFields::default()).await
    }

    /// Free-text entry point: sibling-variant requests search directly,
    /// follow-ups go to the ask endpoint once a session exists, anything else
    /// goes through the chat service.
    pub async fn send_message(&mut self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let history = self.state.transcript().history();
        self.state.record_user(text);

        if let Some(target) = resolve_focus(text, &self.state.visible_variants()) {
            info!(
                "Focusing search on '{}' ({:?})",
                target.variant, target.resolution
            );
            return self.search(text, focus_fields(target)).await.map(|_| ());
        }

        if self.state.session_id().is_some() {
            return self.follow_up(text).await;
        }
        self.chat(text, history).await
    }

    /// Ask about the current results. Fails fast without a session.
    pub async fn ask(&mut self, question: &str) -> Result<()> {
        if self.state.session_id().is_none() {
            let err = ScoutError::MissingSession;
            self.state.record_bot(&err.user_message(), Affordances::default());
            return Err(err);
        }
        self.state.record_user(question);
        self.follow_up(question).await
    }

    async fn follow_up(&mut self, question: &str) -> Result<()> {
        let session_id = self
            .state
            .session_id()
            .ok_or(ScoutError::MissingSession)?
            .to_string();
        let req = AskRequest {
            question: question.to_string(),
            session_id,
        };
        let response = match self.transport.ask(&req, self.ask_timeout).await {
            Ok(r) => r,
            Err(e) => {
                warn!("Ask failed: {}", e);
                self.state.record_bot(
                    &format!("Sorry, I couldn't answer that right now ({e})."),
                    Affordances::default(),
                );
                return Err(e);
            }
        };

        if let Some(err) = response.error {
            self.state.record_bot(&err, Affordances::default());
            return Ok(());
        }

        if let Some(thought) = response.thought.as_deref() {
            debug!("Follow-up reasoning: {}", thought);
        }
        let is_update = response.kind.as_deref() == Some("update");
        let reply = response.content.or(response.answer);
        if is_update {
            let updates = response
                .updates
                .as_ref()
                .map(PreferenceUpdates::from_value)
                .unwrap_or_default();
            let changed = self.state.apply_updates(&updates);
            self.state.record_bot(
                reply.as_deref().unwrap_or(UPDATED),
                Affordances::default(),
            );
            if changed {
                info!("Preferences changed by follow-up, re-running search");
                self.search(question, FocusFields::default()).await?;
            }
        } else {
            self.state.record_bot(
                reply
                    .as_deref()
                    .unwrap_or("I don't have an answer for that yet."),
                Affordances::default(),
            );
        }
        Ok(())
    }

    async fn chat(
        &mut self,
        message: &str,
        history: Vec<HistoryMessage>,
    ) -> Result<()> {
        let req = ChatRequest {
            message: message.to_string(),
            history,
            preferences: self.state.store().preferences().clone(),
            user_control_config: self.state.store().controls().to_wire()?,
        };
        let response = match self.transport.chat(&req, self.chat_timeout).await {
            Ok(r) => r,
            Err(e) => {
                warn!("Chat failed: {}", e);
                let fallback = follow_up_question(self.state.store().preferences());
                self.state.record_bot(fallback, Affordances::default());
                return Err(e);
            }
        };
        if let Some(provider_error) = &response.provider_error {
            warn!(
                "Chat provider {} degraded: {}",
                response.provider.as_deref().unwrap_or("unknown"),
                provider_error
            );
        }

        self.state.apply_chat_snapshot(
            response.preferences.as_ref(),
            response.user_control_config.as_ref(),
        );
        let reply = Some(response.response.trim())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| follow_up_question(self.state.store().preferences()))
            .to_string();
        self.state.record_bot(&reply, Affordances::default());

        if response.ready_to_search {
            self.search(message, FocusFields::default()).await?;
        }
        Ok(())
    }

    /// Always mutates the shortlist; feedback is reported in the background.
    pub fn toggle_shortlist(&mut self, variant: &str) -> Option<JoinHandle<()>> {
        let event = self.state.toggle_shortlist(variant);
        self.emit(event)
    }

    fn emit(&self, event: FeedbackEvent) -> Option<JoinHandle<()>> {
        self.feedback
            .emit(self.state.session_id(), self.state.store(), event)
    }

    pub fn reset(&mut self) {
        self.state.reset();
        self.state.record_bot(GREETING, starter_prompts());
    }
}

fn starter_prompts() -> Affordances {
    Affordances {
        show_starter_prompts: true,
        offer_advanced_tuning: false,
    }
}

fn focus_fields(target: FocusTarget) -> FocusFields {
    let focus_model = (target.resolution == Resolution::Raw).then(|| target.variant.clone());
    FocusFields {
        variant_family_focus: Some(target.variant),
        exclude_variant: target.exclude_variant,
        focus_model,
        focus_brand: None,
    }
}
