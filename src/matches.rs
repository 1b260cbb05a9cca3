use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::models::RawMatch;

const VARIANT_KEYS: [&str; 4] = ["variant", "Variant", "variant_name", "name"];

/// Which backend contract produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Rich,
    Basic,
}

/// Explanation data only the rich endpoint computes. Each field stays `None`
/// when the service omitted it; a zero here means the service said zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RichDetails {
    pub confidence: Option<f64>,
    pub semantic_score: Option<f64>,
    pub advanced_score: Option<f64>,
    pub score_breakdown: Option<Value>,
    pub reasoning_paths: Option<Vec<Value>>,
    pub critique_notes: Option<Vec<Value>>,
    pub agent_votes: Option<Value>,
    pub low_confidence: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum MatchDetail {
    Rich(RichDetails),
    Basic,
}

/// One recommended variant, normalized at the transport boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    pub variant: String,
    /// Opaque specification payload, passed through untouched.
    pub spec: Value,
    /// Authoritative ranking score.
    pub score: f64,
    pub detail: MatchDetail,
}

impl Match {
    pub fn source(&self) -> MatchSource {
        match self.detail {
            MatchDetail::Rich(_) => MatchSource::Rich,
            MatchDetail::Basic => MatchSource::Basic,
        }
    }

    pub fn rich(&self) -> Option<&RichDetails> {
        match &self.detail {
            MatchDetail::Rich(details) => Some(details),
            MatchDetail::Basic => None,
        }
    }

    /// `None` means "not computed", never "computed as zero".
    pub fn confidence(&self) -> Option<f64> {
        self.rich().and_then(|d| d.confidence)
    }

    pub fn reasoning_paths(&self) -> Option<&[Value]> {
        self.rich().and_then(|d| d.reasoning_paths.as_deref())
    }
}

fn variant_name(car: &Value) -> Option<String> {
    VARIANT_KEYS
        .iter()
        .find_map(|k| car.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `combined_score` is authoritative; `score` stands in when it is missing.
fn authoritative_score(raw: &RawMatch) -> Option<f64> {
    raw.combined_score.or(raw.score)
}

pub fn normalize_one(raw: RawMatch, source: MatchSource) -> Option<Match> {
    let Some(variant) = variant_name(&raw.car) else {
        warn!("Dropping match without a variant name");
        return None;
    };
    let Some(score) = authoritative_score(&raw) else {
        warn!("Dropping match '{}' without score or combined_score", variant);
        return None;
    };

    let detail = match source {
        MatchSource::Basic => MatchDetail::Basic,
        MatchSource::Rich => MatchDetail::Rich(RichDetails {
            confidence: raw.graph_confidence,
            semantic_score: raw.semantic_score,
            advanced_score: raw.advanced_score,
            score_breakdown: raw.score_breakdown,
            reasoning_paths: raw.reasoning_paths,
            critique_notes: raw.critique_notes,
            agent_votes: raw.agent_votes,
            low_confidence: raw.low_confidence,
        }),
    };

    Some(Match {
        variant,
        spec: raw.car,
        score,
        detail,
    })
}

/// Normalize a response's matches, preserving server order.
pub fn normalize(raw: Vec<RawMatch>, source: MatchSource) -> Vec<Match> {
    raw.into_iter()
        .filter_map(|m| normalize_one(m, source))
        .collect()
}
