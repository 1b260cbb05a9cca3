use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::preferences::Preferences;

#[derive(Deserialize)]
#[serde(untagged)]
enum FlexibleNumber {
    Int(i64),
    Float(f64),
    String(String),
    Null(()),
}

impl FlexibleNumber {
    fn as_f64(self) -> Option<f64> {
        match self {
            FlexibleNumber::Int(i) => Some(i as f64),
            FlexibleNumber::Float(f) if f.is_finite() => Some(f),
            FlexibleNumber::Float(_) => None,
            FlexibleNumber::String(s) => {
                let cleaned: String = s.chars().filter(|c| *c != ',' && *c != '_').collect();
                cleaned.trim().parse::<f64>().ok().filter(|f| f.is_finite())
            }
            FlexibleNumber::Null(()) => None,
        }
    }
}

/// Numbers from extracted chat payloads arrive as ints, floats or strings.
/// Anything unparseable is treated as absent rather than failing the whole payload.
pub(crate) fn deserialize_flexible_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(FlexibleNumber::deserialize(deserializer)?.as_f64())
}

pub(crate) fn deserialize_flexible_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(FlexibleNumber::deserialize(deserializer)?
        .as_f64()
        .filter(|f| *f >= 0.0)
        .map(|f| f.round() as u64))
}

pub(crate) fn deserialize_flexible_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(FlexibleNumber::deserialize(deserializer)?
        .as_f64()
        .filter(|f| *f >= 0.0 && *f <= u32::MAX as f64)
        .map(|f| f.round() as u32))
}

/// One text turn forwarded to the remote service as conversation context.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HistoryMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl HistoryMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            kind: "user".to_string(),
            text: text.into(),
        }
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self {
            kind: "bot".to_string(),
            text: text.into(),
        }
    }
}

/// Optional narrowing fields shared by both recommendation endpoints.
#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct FocusFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_family_focus: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_variant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus_brand: Option<String>,
}

// Rich ("graph") endpoint request
#[derive(Debug, Serialize, Clone)]
pub struct GraphRecommendRequest {
    #[serde(flatten)]
    pub preferences: Preferences,
    pub user_input: String,
    pub conversation_history: Vec<HistoryMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub user_control_config: Value,
    #[serde(flatten)]
    pub focus: FocusFields,
}

// Basic endpoint request: core preference fields only
#[derive(Debug, Serialize, Clone)]
pub struct BasicRecommendRequest {
    #[serde(flatten)]
    pub preferences: Preferences,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub focus: FocusFields,
}

/// Raw match as either endpoint returns it. Every score is optional on the wire.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RawMatch {
    pub car: Value,
    #[serde(deserialize_with = "deserialize_flexible_f64")]
    pub score: Option<f64>,
    #[serde(deserialize_with = "deserialize_flexible_f64")]
    pub combined_score: Option<f64>,
    #[serde(deserialize_with = "deserialize_flexible_f64")]
    pub semantic_score: Option<f64>,
    #[serde(deserialize_with = "deserialize_flexible_f64")]
    pub advanced_score: Option<f64>,
    #[serde(deserialize_with = "deserialize_flexible_f64")]
    pub graph_confidence: Option<f64>,
    pub score_breakdown: Option<Value>,
    pub reasoning_paths: Option<Vec<Value>>,
    pub critique_notes: Option<Vec<Value>>,
    pub agent_votes: Option<Value>,
    pub low_confidence: Option<bool>,
}

/// Union of both recommendation response shapes.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RecommendResponse {
    pub session_id: Option<String>,
    pub matches: Vec<RawMatch>,
    pub reviews: Option<Value>,
    pub sentiments: Option<Value>,
    pub agent_trace: Option<Value>,
    pub pipeline_stats: Option<Value>,
    pub variant_focus: Option<Value>,
    pub conflicts: Option<Value>,
    pub explanation_contexts: Option<Value>,
    pub agent_evaluations: Option<Value>,
    pub scoring_diagnostics: Option<Value>,
    pub clarifying_questions: Option<Value>,
    pub user_control_applied: Option<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct AskRequest {
    pub question: String,
    pub session_id: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AskResponse {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub content: Option<String>,
    pub answer: Option<String>,
    pub thought: Option<String>,
    pub updates: Option<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct FeedbackRequest {
    pub session_id: String,
    pub preferences: Preferences,
    pub user_control_config: Value,
    pub action: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub accepted_variants: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected_variants: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct FeedbackResponse {
    pub status: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct ChatRequest {
    pub message: String,
    pub history: Vec<HistoryMessage>,
    pub preferences: Preferences,
    pub user_control_config: Value,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ChatResponse {
    pub response: String,
    pub preferences: Option<Value>,
    pub ready_to_search: bool,
    pub user_control_config: Option<Value>,
    pub provider: Option<String>,
    pub provider_error: Option<String>,
    pub error: Option<String>,
}
