use thiserror::Error;

/// Error taxonomy for the search orchestrator.
///
/// Transport-level failures (`Timeout`, `Network`, `Http`, `Decode`) never reach the
/// conversation layer directly: the orchestrator folds them into
/// `RecommendationFailed` or `NoSiblingVariants` before returning.
#[derive(Error, Debug)]
pub enum ScoutError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No active search session. Run a search first, then ask follow-up questions.")]
    MissingSession,

    #[error("{endpoint} request timed out after {secs}s")]
    Timeout { endpoint: &'static str, secs: u64 },

    #[error("{endpoint} request failed: {message}")]
    Network {
        endpoint: &'static str,
        message: String,
    },

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Http {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error("Failed to decode {endpoint} response: {message}")]
    Decode {
        endpoint: &'static str,
        message: String,
    },

    #[error("No sibling variants matched for '{model}': {cause}")]
    NoSiblingVariants { model: String, cause: String },

    #[error("Failed to get recommendations: {cause}")]
    RecommendationFailed { cause: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScoutError {
    /// Failures worth retrying on the fallback endpoint. Anything else ends the search.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScoutError::Timeout { .. }
                | ScoutError::Network { .. }
                | ScoutError::Http { .. }
                | ScoutError::Decode { .. }
        )
    }

    /// Failures that end a search and are shown to the user.
    pub fn is_terminal_search_failure(&self) -> bool {
        matches!(
            self,
            ScoutError::NoSiblingVariants { .. } | ScoutError::RecommendationFailed { .. }
        )
    }

    /// Message text for the transcript. Terminal failures already carry their cause.
    pub fn user_message(&self) -> String {
        match self {
            ScoutError::Validation(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScoutError>;
