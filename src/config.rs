use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for the variant scout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub search: SearchConfig,
    #[serde(default)]
    pub ask: AskConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
}

/// Remote recommendation service location and endpoint paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "ApiConfig::default_graph_path")]
    pub graph_path: String,
    #[serde(default = "ApiConfig::default_basic_path")]
    pub basic_path: String,
    #[serde(default = "ApiConfig::default_ask_path")]
    pub ask_path: String,
    #[serde(default = "ApiConfig::default_feedback_path")]
    pub feedback_path: String,
    #[serde(default = "ApiConfig::default_chat_path")]
    pub chat_path: String,
    #[serde(default = "ApiConfig::default_health_path")]
    pub health_path: String,
}

impl ApiConfig {
    fn default_graph_path() -> String {
        "/api/recommend_with_graph".to_string()
    }
    fn default_basic_path() -> String {
        "/api/recommend".to_string()
    }
    fn default_ask_path() -> String {
        "/api/ask".to_string()
    }
    fn default_feedback_path() -> String {
        "/api/feedback".to_string()
    }
    fn default_chat_path() -> String {
        "/api/chat".to_string()
    }
    fn default_health_path() -> String {
        "/health".to_string()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Bound on the rich endpoint call
    pub primary_timeout_secs: u64,
    /// Bound on the basic endpoint call; inherits the primary bound when unset
    #[serde(default)]
    pub fallback_timeout_secs: Option<u64>,
    /// Recent text turns forwarded as conversation history
    #[serde(default = "SearchConfig::default_history_turns")]
    pub history_turns: usize,
}

impl SearchConfig {
    fn default_history_turns() -> usize {
        12
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskConfig {
    pub timeout_secs: u64,
    pub chat_timeout_secs: u64,
}

impl Default for AskConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            chat_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load configuration from file with environment variable overrides
    /// ALWAYS returns a valid config - never fails
    pub fn load() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!("Loaded .env from: {}", path.display()),
            Err(_) => tracing::debug!("No .env file found - continuing with env vars only"),
        }

        let config_path =
            env::var("SCOUT_CONFIG_PATH").unwrap_or_else(|_| "scout.yaml".to_string());

        let mut config = Self::from_file(&config_path);

        config.apply_env_overrides();

        // Validate configuration - log warnings but don't fail
        if let Err(e) = config.validate() {
            tracing::warn!("Config validation warnings: {} - continuing anyway", e);
        }

        config
    }

    fn from_file(config_path: &str) -> Self {
        if !Path::new(config_path).exists() {
            tracing::info!("Config file not found at {} - using defaults", config_path);
            return Self::default();
        }
        match fs::read_to_string(config_path) {
            Ok(contents) => match serde_yaml::from_str::<Config>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", config_path);
                    config
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to parse config file {}: {} - using defaults",
                        config_path,
                        e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                tracing::error!(
                    "Failed to read config file {}: {} - using defaults",
                    config_path,
                    e
                );
                Self::default()
            }
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("SCOUT_API_BASE_URL") {
            self.api.base_url = url;
        }
        if let Ok(secs) = env::var("SCOUT_PRIMARY_TIMEOUT_SECS") {
            if let Ok(v) = secs.parse() {
                self.search.primary_timeout_secs = v;
            }
        }
        if let Ok(secs) = env::var("SCOUT_FALLBACK_TIMEOUT_SECS") {
            if let Ok(v) = secs.parse() {
                self.search.fallback_timeout_secs = Some(v);
            }
        }
        if let Ok(turns) = env::var("SCOUT_HISTORY_TURNS") {
            if let Ok(v) = turns.parse() {
                self.search.history_turns = v;
            }
        }
        if let Ok(secs) = env::var("SCOUT_ASK_TIMEOUT_SECS") {
            if let Ok(v) = secs.parse() {
                self.ask.timeout_secs = v;
                self.ask.chat_timeout_secs = v;
            }
        }
        if let Ok(enabled) = env::var("SCOUT_FEEDBACK_ENABLED") {
            match enabled.to_ascii_lowercase().as_str() {
                "0" | "false" | "off" | "no" => self.feedback.enabled = false,
                "1" | "true" | "on" | "yes" => self.feedback.enabled = true,
                other => tracing::warn!("Ignoring SCOUT_FEEDBACK_ENABLED={}", other),
            }
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        let url = self.api.base_url.trim();
        if url.is_empty() {
            return Err("api.base_url cannot be empty".into());
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(format!("api.base_url must start with http:// or https://, got '{url}'").into());
        }
        if self.search.primary_timeout_secs == 0 {
            return Err("search.primary_timeout_secs cannot be 0".into());
        }
        if self.search.fallback_timeout_secs == Some(0) {
            return Err("search.fallback_timeout_secs cannot be 0".into());
        }
        if self.ask.timeout_secs == 0 || self.ask.chat_timeout_secs == 0 {
            return Err("ask timeouts cannot be 0".into());
        }
        if self.feedback.timeout_secs == 0 {
            return Err("feedback.timeout_secs cannot be 0".into());
        }
        Ok(())
    }

    pub fn primary_timeout(&self) -> Duration {
        Duration::from_secs(self.search.primary_timeout_secs)
    }

    /// The basic endpoint inherits the primary bound unless configured separately.
    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_secs(
            self.search
                .fallback_timeout_secs
                .unwrap_or(self.search.primary_timeout_secs),
        )
    }

    pub fn ask_timeout(&self) -> Duration {
        Duration::from_secs(self.ask.timeout_secs)
    }

    pub fn chat_timeout(&self) -> Duration {
        Duration::from_secs(self.ask.chat_timeout_secs)
    }

    pub fn feedback_timeout(&self) -> Duration {
        Duration::from_secs(self.feedback.timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: "http://localhost:8000".to_string(),
                graph_path: ApiConfig::default_graph_path(),
                basic_path: ApiConfig::default_basic_path(),
                ask_path: ApiConfig::default_ask_path(),
                feedback_path: ApiConfig::default_feedback_path(),
                chat_path: ApiConfig::default_chat_path(),
                health_path: ApiConfig::default_health_path(),
            },
            search: SearchConfig {
                primary_timeout_secs: 180,
                fallback_timeout_secs: None,
                history_turns: SearchConfig::default_history_turns(),
            },
            ask: AskConfig::default(),
            feedback: FeedbackConfig::default(),
        }
    }
}
