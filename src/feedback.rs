use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::models::FeedbackRequest;
use crate::preferences::PreferenceStore;
use crate::transport::RecommendTransport;

/// User actions reported back to the recommendation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackEvent {
    ShortlistedVariant(String),
    RemovedFromShortlist(String),
    SearchSubmitted,
}

impl FeedbackEvent {
    pub fn action(&self) -> &'static str {
        match self {
            FeedbackEvent::ShortlistedVariant(_) => "shortlisted_variant",
            FeedbackEvent::RemovedFromShortlist(_) => "removed_from_shortlist",
            FeedbackEvent::SearchSubmitted => "search_submitted",
        }
    }

    fn variants(&self) -> (Vec<String>, Vec<String>) {
        match self {
            FeedbackEvent::ShortlistedVariant(v) => (vec![v.clone()], Vec::new()),
            FeedbackEvent::RemovedFromShortlist(v) => (Vec::new(), vec![v.clone()]),
            FeedbackEvent::SearchSubmitted => (Vec::new(), Vec::new()),
        }
    }
}

/// Best-effort, fire-and-forget reporter. Nothing it does can fail the caller.
#[derive(Clone)]
pub struct FeedbackEmitter {
    transport: Arc<dyn RecommendTransport>,
    timeout: Duration,
    enabled: bool,
}

impl FeedbackEmitter {
    pub fn new(transport: Arc<dyn RecommendTransport>, timeout: Duration, enabled: bool) -> Self {
        Self {
            transport,
            timeout,
            enabled,
        }
    }

    /// Spawns the post and returns its handle, or `None` when there is no
    /// session yet (or reporting is switched off). Must run inside a tokio runtime.
    pub fn emit(
        &self,
        session_id: Option<&str>,
        store: &PreferenceStore,
        event: FeedbackEvent,
    ) -> Option<JoinHandle<()>> {
        if !self.enabled {
            return None;
        }
        let Some(session_id) = session_id else {
            debug!("No session yet, skipping {} feedback", event.action());
            return None;
        };

        let user_control_config = match store.controls().to_wire() {
            Ok(v) => v,
            Err(e) => {
                warn!("Skipping {} feedback: {}", event.action(), e);
                return None;
            }
        };
        let (accepted_variants, rejected_variants) = event.variants();
        let req = FeedbackRequest {
            session_id: session_id.to_string(),
            preferences: store.preferences().clone(),
            user_control_config,
            action: event.action().to_string(),
            accepted_variants,
            rejected_variants,
        };

        let transport = Arc::clone(&self.transport);
        let timeout = self.timeout;
        Some(tokio::spawn(async move {
            match transport.feedback(&req, timeout).await {
                Ok(resp) => debug!(
                    "Feedback {} recorded: {}",
                    req.action,
                    resp.status.as_deref().unwrap_or("ok")
                ),
                Err(e) => warn!("Feedback {} failed (ignored): {}", req.action, e),
            }
        }))
    }
}
