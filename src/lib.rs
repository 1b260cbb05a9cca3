pub mod concierge;
pub mod config;
pub mod conversation;
pub mod error;
pub mod feedback;
pub mod focus;
pub mod matches;
pub mod merger;
pub mod models;
pub mod orchestrator;
pub mod preferences;
pub mod state;
pub mod transport;

pub use crate::concierge::Concierge;
pub use crate::config::Config;
pub use crate::error::{Result, ScoutError};
pub use crate::matches::{Match, MatchSource};
pub use crate::orchestrator::{SearchContext, SearchOrchestrator, SearchOutcome};
pub use crate::preferences::{AdvancedControls, PreferenceStore, Preferences};
pub use crate::transport::{HttpTransport, RecommendTransport};
