use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Result, ScoutError};
use crate::matches::{Match, MatchSource, normalize};
use crate::models::{
    BasicRecommendRequest, FocusFields, GraphRecommendRequest, HistoryMessage, RecommendResponse,
};
use crate::preferences::PreferenceStore;
use crate::transport::RecommendTransport;

/// Contextual hints that ride along with the preferences on a search.
#[derive(Debug, Clone, Default)]
pub struct SearchContext {
    pub user_input: String,
    pub history: Vec<HistoryMessage>,
    pub focus: FocusFields,
    pub session_id: Option<String>,
}

impl SearchContext {
    fn focused_model(&self) -> Option<&str> {
        self.focus.variant_family_focus.as_deref()
    }
}

/// Optional payloads the service attaches next to its matches.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    pub agent_trace: Option<Value>,
    pub pipeline_stats: Option<Value>,
    pub variant_focus: Option<Value>,
    pub reviews: Option<Value>,
    pub sentiments: Option<Value>,
    pub conflicts: Option<Value>,
    pub explanation_contexts: Option<Value>,
    pub agent_evaluations: Option<Value>,
    pub scoring_diagnostics: Option<Value>,
    pub clarifying_questions: Option<Value>,
    pub user_control_applied: Option<Value>,
}

impl From<RecommendResponse> for Telemetry {
    fn from(r: RecommendResponse) -> Self {
        Self {
            agent_trace: r.agent_trace,
            pipeline_stats: r.pipeline_stats,
            variant_focus: r.variant_focus,
            reviews: r.reviews,
            sentiments: r.sentiments,
            conflicts: r.conflicts,
            explanation_contexts: r.explanation_contexts,
            agent_evaluations: r.agent_evaluations,
            scoring_diagnostics: r.scoring_diagnostics,
            clarifying_questions: r.clarifying_questions,
            user_control_applied: r.user_control_applied,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub matches: Vec<Match>,
    /// Session issued by whichever endpoint answered, or the caller's previous one.
    pub session_id: Option<String>,
    pub source: MatchSource,
    pub telemetry: Telemetry,
}

/// The basic endpoint answers an empty search with a placeholder handle.
fn is_live_session(id: &str) -> bool {
    let id = id.trim();
    !(id.is_empty()
        || ["n/a", "na", "null", "none", "undefined"]
            .iter()
            .any(|p| id.eq_ignore_ascii_case(p)))
}

impl SearchOutcome {
    fn from_response(
        mut response: RecommendResponse,
        source: MatchSource,
        previous_session: Option<&str>,
    ) -> Self {
        let raw = std::mem::take(&mut response.matches);
        let session_id = response
            .session_id
            .take()
            .filter(|s| is_live_session(s))
            .or_else(|| previous_session.map(str::to_string));
        Self {
            matches: normalize(raw, source),
            session_id,
            source,
            telemetry: response.into(),
        }
    }

    /// Short narrative for a focused search, built from the service's focus context.
    pub fn focus_note(&self) -> Option<String> {
        let focus = self.telemetry.variant_focus.as_ref()?;
        if !focus.get("active").and_then(Value::as_bool).unwrap_or(true) {
            return None;
        }
        let label = ["family_label", "focus_model", "focus_variant"]
            .iter()
            .find_map(|k| focus.get(*k).and_then(Value::as_str))?;
        let mut note = format!("Showing variants from the {label} family");
        if let Some(excluded) = focus.get("exclude_variant").and_then(Value::as_str) {
            note.push_str(&format!(", leaving out {excluded}"));
        }
        if let Some(n) = focus.get("dataset_size_after").and_then(Value::as_u64) {
            note.push_str(&format!(" ({n} candidates considered)"));
        }
        note.push('.');
        Some(note)
    }
}

/// Runs the two-tier recommendation protocol: rich endpoint first, basic
/// endpoint as the fallback for empty results and transient failures.
/// Transport errors never escape; they are folded into `NoSiblingVariants`
/// or `RecommendationFailed`.
pub struct SearchOrchestrator {
    transport: Arc<dyn RecommendTransport>,
    primary_timeout: Duration,
    fallback_timeout: Duration,
}

impl SearchOrchestrator {
    pub fn new(
        transport: Arc<dyn RecommendTransport>,
        primary_timeout: Duration,
        fallback_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            primary_timeout,
            fallback_timeout,
        }
    }

    pub async fn search(
        &self,
        store: &PreferenceStore,
        ctx: &SearchContext,
    ) -> Result<SearchOutcome> {
        // Nothing leaves the process with an inverted budget.
        store.validate()?;

        let graph_req = GraphRecommendRequest {
            preferences: store.preferences().clone(),
            user_input: ctx.user_input.clone(),
            conversation_history: ctx.history.clone(),
            session_id: ctx.session_id.clone(),
            user_control_config: store.controls().to_wire()?,
            focus: ctx.focus.clone(),
        };
        debug!(
            "Graph search: {} history turns, focus={:?}",
            graph_req.conversation_history.len(),
            ctx.focused_model()
        );

        let primary = self
            .transport
            .recommend_graph(&graph_req, self.primary_timeout)
            .await;

        // Branch on what survives normalization, not on the raw list.
        let primary = primary.map(|response| {
            SearchOutcome::from_response(response, MatchSource::Rich, ctx.session_id.as_deref())
        });

        match primary {
            Ok(outcome) if !outcome.matches.is_empty() => {
                info!("Graph search returned {} matches", outcome.matches.len());
                Ok(outcome)
            }
            Ok(_) => {
                warn!("Graph search returned no usable matches, trying basic endpoint");
                match ctx.focused_model() {
                    Some(model) => self.focused_fallback(store, ctx, model, None).await,
                    None => self.open_fallback(store, ctx, ctx.focus.clone()).await,
                }
            }
            Err(e) if e.is_transient() => {
                warn!("Graph search failed ({}), trying basic endpoint", e);
                match ctx.focused_model() {
                    Some(model) => self.focused_fallback(store, ctx, model, Some(e)).await,
                    // Focus fields are dropped when the rich call itself failed.
                    None => self.open_fallback(store, ctx, FocusFields::default()).await,
                }
            }
            // The basic endpoint cannot fix a request that never left the process.
            Err(e) => {
                warn!("Graph search failed before reaching the service: {}", e);
                Err(match ctx.focused_model() {
                    Some(model) => ScoutError::NoSiblingVariants {
                        model: model.to_string(),
                        cause: e.to_string(),
                    },
                    None => ScoutError::RecommendationFailed {
                        cause: e.to_string(),
                    },
                })
            }
        }
    }

    fn basic_request(
        store: &PreferenceStore,
        ctx: &SearchContext,
        focus: FocusFields,
    ) -> BasicRecommendRequest {
        BasicRecommendRequest {
            preferences: store.preferences().clone(),
            session_id: ctx.session_id.clone(),
            focus,
        }
    }

    /// A focused search never widens: empty or failed means no siblings.
    async fn focused_fallback(
        &self,
        store: &PreferenceStore,
        ctx: &SearchContext,
        model: &str,
        primary_error: Option<ScoutError>,
    ) -> Result<SearchOutcome> {
        let req = Self::basic_request(store, ctx, ctx.focus.clone());
        let no_siblings = |cause: String| ScoutError::NoSiblingVariants {
            model: model.to_string(),
            cause,
        };

        match self
            .transport
            .recommend_basic(&req, self.fallback_timeout)
            .await
        {
            Ok(response) => {
                let service_error = response.error.clone();
                let outcome =
                    SearchOutcome::from_response(response, MatchSource::Basic, ctx.session_id.as_deref());
                if outcome.matches.is_empty() {
                    let cause = service_error
                        .or_else(|| primary_error.map(|e| e.to_string()))
                        .unwrap_or_else(|| "no variants found for the requested model".to_string());
                    return Err(no_siblings(cause));
                }
                info!(
                    "Basic search returned {} sibling variants of {}",
                    outcome.matches.len(),
                    model
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!("Basic search for {} failed: {}", model, e);
                Err(no_siblings(e.to_string()))
            }
        }
    }

    /// An unfocused fallback adopts whatever the basic endpoint returns, empty included.
    async fn open_fallback(
        &self,
        store: &PreferenceStore,
        ctx: &SearchContext,
        focus: FocusFields,
    ) -> Result<SearchOutcome> {
        let req = Self::basic_request(store, ctx, focus);
        match self
            .transport
            .recommend_basic(&req, self.fallback_timeout)
            .await
        {
            Ok(response) => {
                let outcome =
                    SearchOutcome::from_response(response, MatchSource::Basic, ctx.session_id.as_deref());
                info!("Basic search returned {} matches", outcome.matches.len());
                Ok(outcome)
            }
            Err(e) => {
                warn!("Basic search failed: {}", e);
                Err(ScoutError::RecommendationFailed {
                    cause: e.to_string(),
                })
            }
        }
    }
}
