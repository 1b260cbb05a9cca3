use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, ScoutError};
use crate::models::{deserialize_flexible_f64, deserialize_flexible_u32, deserialize_flexible_u64};

pub const ANY: &str = "Any";

/// Dimensions that carry a user-controlled scoring priority.
pub const PRIORITY_DIMENSIONS: [&str; 7] = [
    "budget",
    "fuel_type",
    "body_type",
    "transmission",
    "seating",
    "features",
    "performance",
];

const DEFAULT_PRIORITY: f64 = 0.5;

// ───────────────────────────────────────────────────────────────────────────────
// Preferences
// ───────────────────────────────────────────────────────────────────────────────

/// Canonical structured search criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    pub min_budget: u64,
    pub max_budget: u64,
    pub fuel_type: String,
    pub body_type: String,
    pub transmission: String,
    pub seating: u32,
    pub features: BTreeSet<String>,
    pub performance: u8,
    pub brand: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            min_budget: 500_000,
            max_budget: 2_000_000,
            fuel_type: ANY.to_string(),
            body_type: ANY.to_string(),
            transmission: ANY.to_string(),
            seating: 5,
            features: BTreeSet::new(),
            performance: 5,
            brand: ANY.to_string(),
        }
    }
}

impl Preferences {
    /// Budget ordering must hold before any request leaves the process.
    pub fn validate(&self) -> Result<()> {
        if self.min_budget > self.max_budget {
            return Err(ScoutError::Validation(format!(
                "Minimum budget ({}) cannot exceed maximum budget ({})",
                self.min_budget, self.max_budget
            )));
        }
        Ok(())
    }

    /// Shallow merge: every field present in the patch replaces the current value.
    pub fn apply(&mut self, patch: &PreferencePatch) -> bool {
        let before = self.clone();
        if let Some(v) = patch.min_budget {
            self.min_budget = v;
        }
        if let Some(v) = patch.max_budget {
            self.max_budget = v;
        }
        if let Some(v) = &patch.fuel_type {
            self.fuel_type = v.clone();
        }
        if let Some(v) = &patch.body_type {
            self.body_type = v.clone();
        }
        if let Some(v) = &patch.transmission {
            self.transmission = v.clone();
        }
        if let Some(v) = patch.seating {
            self.seating = v;
        }
        if let Some(v) = &patch.features {
            self.features = v.iter().cloned().collect();
        }
        if let Some(v) = patch.performance {
            self.performance = clamp_performance(v);
        }
        if let Some(v) = &patch.brand {
            self.brand = v.clone();
        }
        *self != before
    }
}

pub(crate) fn clamp_performance(value: u32) -> u8 {
    value.clamp(1, 10) as u8
}

/// Partial preferences object. Absent fields leave the current value alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferencePatch {
    #[serde(
        deserialize_with = "deserialize_flexible_u64",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_budget: Option<u64>,
    #[serde(
        deserialize_with = "deserialize_flexible_u64",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_budget: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fuel_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transmission: Option<String>,
    #[serde(
        deserialize_with = "deserialize_flexible_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub seating: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<String>>,
    #[serde(
        deserialize_with = "deserialize_flexible_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub performance: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
}

impl PreferencePatch {
    /// Field-wise union; `other` wins where both patches set a field.
    pub fn combine(self, other: PreferencePatch) -> PreferencePatch {
        PreferencePatch {
            min_budget: other.min_budget.or(self.min_budget),
            max_budget: other.max_budget.or(self.max_budget),
            fuel_type: other.fuel_type.or(self.fuel_type),
            body_type: other.body_type.or(self.body_type),
            transmission: other.transmission.or(self.transmission),
            seating: other.seating.or(self.seating),
            features: other.features.or(self.features),
            performance: other.performance.or(self.performance),
            brand: other.brand.or(self.brand),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == PreferencePatch::default()
    }
}

// ───────────────────────────────────────────────────────────────────────────────
// Advanced controls
// ───────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
pub enum DiversityMode {
    #[serde(rename = "maximum_relevance")]
    Focused,
    #[default]
    #[serde(rename = "balanced")]
    Balanced,
    #[serde(rename = "maximum_diversity")]
    Explore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BrandRule {
    #[default]
    Any,
    Preferred,
    Strict,
    Blacklist,
}

impl fmt::Display for DiversityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiversityMode::Focused => "maximum_relevance",
            DiversityMode::Balanced => "balanced",
            DiversityMode::Explore => "maximum_diversity",
        };
        f.write_str(s)
    }
}

impl fmt::Display for BrandRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BrandRule::Any => "any",
            BrandRule::Preferred => "preferred",
            BrandRule::Strict => "strict",
            BrandRule::Blacklist => "blacklist",
        };
        f.write_str(s)
    }
}

impl FromStr for DiversityMode {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "maximumrelevance" | "focused" | "focus" | "relevance" | "exploit" => {
                Ok(DiversityMode::Focused)
            }
            "balanced" | "balance" | "default" | "custom" => Ok(DiversityMode::Balanced),
            "maximumdiversity" | "explore" | "exploration" | "diverse" | "diversity" => {
                Ok(DiversityMode::Explore)
            }
            other => Err(format!("unknown diversity mode '{other}'")),
        }
    }
}

impl FromStr for BrandRule {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "any" | "none" | "" => Ok(BrandRule::Any),
            "preferred" | "prefer" | "boost" => Ok(BrandRule::Preferred),
            "strict" | "only" | "require" => Ok(BrandRule::Strict),
            "blacklist" | "exclude" | "avoid" | "block" => Ok(BrandRule::Blacklist),
            other => Err(format!("unknown brand rule '{other}'")),
        }
    }
}

// Forgiving deserializers: unknown spellings fall back to the default mode
impl<'de> Deserialize<'de> for DiversityMode {
    fn deserialize<D>(de: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(de)?;
        Ok(s.parse().unwrap_or_default())
    }
}

impl<'de> Deserialize<'de> for BrandRule {
    fn deserialize<D>(de: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(de)?;
        Ok(s.parse().unwrap_or_default())
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Overlay of ranking controls sent alongside the rich request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvancedControls {
    pub diversity_mode: DiversityMode,
    pub relevance_weight: f64,
    pub diversity_weight: f64,
    pub brand_mode: BrandRule,
    pub preferred_brands: Vec<String>,
    pub blacklisted_brands: Vec<String>,
    pub price_preference: Option<String>,
    pub price_tolerance: f64,
    pub must_have_features: BTreeSet<String>,
    pub nice_to_have_features: BTreeSet<String>,
    pub use_cases: Vec<String>,
    pub comparison_mode: bool,
    pub comparison_cars: Vec<String>,
    pub similar_to_car: Option<String>,
    pub similarity_threshold: f64,
    pub exploration_rate: f64,
    /// Scoring priorities only reach the wire once the user has touched exploration.
    pub exploration_rate_set: bool,
    pub scoring_priorities: BTreeMap<String, f64>,
}

impl Default for AdvancedControls {
    fn default() -> Self {
        Self {
            diversity_mode: DiversityMode::Balanced,
            relevance_weight: 0.7,
            diversity_weight: 0.3,
            brand_mode: BrandRule::Any,
            preferred_brands: Vec::new(),
            blacklisted_brands: Vec::new(),
            price_preference: None,
            price_tolerance: 0.2,
            must_have_features: BTreeSet::new(),
            nice_to_have_features: BTreeSet::new(),
            use_cases: Vec::new(),
            comparison_mode: false,
            comparison_cars: Vec::new(),
            similar_to_car: None,
            similarity_threshold: 0.7,
            exploration_rate: 0.1,
            exploration_rate_set: false,
            scoring_priorities: default_priorities(),
        }
    }
}

fn default_priorities() -> BTreeMap<String, f64> {
    PRIORITY_DIMENSIONS
        .iter()
        .map(|k| (k.to_string(), DEFAULT_PRIORITY))
        .collect()
}

fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

fn clamp_half(value: f64) -> f64 {
    value.clamp(0.0, 0.5)
}

impl AdvancedControls {
    /// Overwrite only the fields the patch carries, clamping bounded scalars.
    pub fn apply(&mut self, patch: &ControlsPatch) -> bool {
        let before = self.clone();
        if let Some(v) = patch.diversity_mode {
            self.diversity_mode = v;
        }
        if let Some(v) = patch.relevance_weight {
            self.relevance_weight = clamp_unit(v);
        }
        if let Some(v) = patch.diversity_weight {
            self.diversity_weight = clamp_unit(v);
        }
        if let Some(v) = patch.brand_mode {
            self.brand_mode = v;
        }
        if let Some(v) = &patch.preferred_brands {
            self.preferred_brands = v.clone();
        }
        if let Some(v) = &patch.blacklisted_brands {
            self.blacklisted_brands = v.clone();
        }
        if let Some(v) = &patch.price_preference {
            self.price_preference = Some(v.clone()).filter(|s| !s.trim().is_empty());
        }
        if let Some(v) = patch.price_tolerance {
            self.price_tolerance = clamp_half(v);
        }
        if let Some(v) = &patch.must_have_features {
            self.must_have_features = v.iter().cloned().collect();
        }
        if let Some(v) = &patch.nice_to_have_features {
            self.nice_to_have_features = v.iter().cloned().collect();
        }
        if let Some(v) = &patch.use_cases {
            self.use_cases = v.clone();
        }
        if let Some(v) = patch.comparison_mode {
            self.comparison_mode = v;
        }
        if let Some(v) = &patch.comparison_cars {
            self.comparison_cars = v.clone();
        }
        if let Some(v) = &patch.similar_to_car {
            self.similar_to_car = Some(v.clone()).filter(|s| !s.trim().is_empty());
        }
        if let Some(v) = patch.similarity_threshold {
            self.similarity_threshold = clamp_unit(v);
        }
        if let Some(v) = patch.exploration_rate_set {
            self.exploration_rate_set = v;
        }
        // A rate in the same patch always wins over the flag.
        if let Some(v) = patch.exploration_rate {
            self.exploration_rate = clamp_half(v);
            self.exploration_rate_set = true;
        }
        if let Some(priorities) = &patch.scoring_priorities {
            for (key, value) in priorities {
                self.scoring_priorities.insert(key.clone(), clamp_unit(*value));
            }
        }
        *self != before
    }

    /// Request-side view: scoring priorities are withheld until exploration was set.
    pub fn to_wire(&self) -> Result<serde_json::Value> {
        let mut value = serde_json::to_value(self)?;
        if !self.exploration_rate_set {
            if let Some(obj) = value.as_object_mut() {
                obj.remove("scoring_priorities");
            }
        }
        Ok(value)
    }
}

/// Partial advanced-controls object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diversity_mode: Option<DiversityMode>,
    #[serde(
        deserialize_with = "deserialize_flexible_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub relevance_weight: Option<f64>,
    #[serde(
        deserialize_with = "deserialize_flexible_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub diversity_weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand_mode: Option<BrandRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_brands: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blacklisted_brands: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_preference: Option<String>,
    #[serde(
        deserialize_with = "deserialize_flexible_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub price_tolerance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub must_have_features: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nice_to_have_features: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_cases: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison_cars: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similar_to_car: Option<String>,
    #[serde(
        deserialize_with = "deserialize_flexible_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub similarity_threshold: Option<f64>,
    #[serde(
        deserialize_with = "deserialize_flexible_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub exploration_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exploration_rate_set: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scoring_priorities: Option<BTreeMap<String, f64>>,
}

impl ControlsPatch {
    pub fn is_empty(&self) -> bool {
        *self == ControlsPatch::default()
    }
}

// ───────────────────────────────────────────────────────────────────────────────
// Store
// ───────────────────────────────────────────────────────────────────────────────

/// Owner of the current preferences and control overlay.
#[derive(Debug, Clone, Default)]
pub struct PreferenceStore {
    preferences: Preferences,
    controls: AdvancedControls,
}

impl PreferenceStore {
    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn controls(&self) -> &AdvancedControls {
        &self.controls
    }

    /// Returns whether anything changed.
    pub fn update(&mut self, patch: &PreferencePatch) -> bool {
        self.preferences.apply(patch)
    }

    pub fn update_controls(&mut self, patch: &ControlsPatch) -> bool {
        self.controls.apply(patch)
    }

    /// Wholesale replacement used by the merger once it has computed a result.
    pub(crate) fn replace_preferences(&mut self, preferences: Preferences) -> bool {
        let changed = self.preferences != preferences;
        self.preferences = preferences;
        changed
    }

    pub fn reset(&mut self) {
        tracing::info!("Resetting preferences and advanced controls to defaults");
        self.preferences = Preferences::default();
        self.controls = AdvancedControls::default();
    }

    pub fn validate(&self) -> Result<()> {
        self.preferences.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(items: &[&str]) -> Option<Vec<String>> {
        Some(items.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_update_is_shallow_merge() {
        let mut store = PreferenceStore::default();
        let changed = store.update(&PreferencePatch {
            body_type: Some("SUV".to_string()),
            ..Default::default()
        });
        assert!(changed);
        assert_eq!(store.preferences().body_type, "SUV");
        assert_eq!(store.preferences().fuel_type, ANY);
        assert_eq!(store.preferences().seating, 5);
    }

    #[test]
    fn test_update_without_change_reports_false() {
        let mut store = PreferenceStore::default();
        let changed = store.update(&PreferencePatch {
            seating: Some(5),
            ..Default::default()
        });
        assert!(!changed);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut store = PreferenceStore::default();
        store.update(&PreferencePatch {
            brand: Some("Tata".to_string()),
            features: features(&["Sunroof"]),
            ..Default::default()
        });
        store.update_controls(&ControlsPatch {
            brand_mode: Some(BrandRule::Strict),
            ..Default::default()
        });
        store.reset();
        assert_eq!(*store.preferences(), Preferences::default());
        assert_eq!(*store.controls(), AdvancedControls::default());
    }

    #[test]
    fn test_validate_rejects_inverted_budget() {
        let mut store = PreferenceStore::default();
        store.update(&PreferencePatch {
            min_budget: Some(3_000_000),
            max_budget: Some(1_000_000),
            ..Default::default()
        });
        let err = store.validate().expect_err("inverted budget must fail");
        assert!(matches!(err, ScoutError::Validation(_)));

        store.update(&PreferencePatch {
            max_budget: Some(3_000_000),
            ..Default::default()
        });
        assert!(store.validate().is_ok());
    }

    #[test]
    fn test_disjoint_patches_commute_with_combine() {
        let base = Preferences::default();
        let a = PreferencePatch {
            fuel_type: Some("Diesel".to_string()),
            seating: Some(7),
            ..Default::default()
        };
        let b = PreferencePatch {
            body_type: Some("MUV".to_string()),
            features: features(&["Sunroof", "ADAS"]),
            ..Default::default()
        };

        let mut sequential = base.clone();
        sequential.apply(&a);
        sequential.apply(&b);

        let mut combined = base.clone();
        combined.apply(&a.clone().combine(b.clone()));

        let mut reversed = base;
        reversed.apply(&b);
        reversed.apply(&a);

        assert_eq!(sequential, combined);
        assert_eq!(sequential, reversed);
    }

    #[test]
    fn test_performance_is_clamped() {
        let mut prefs = Preferences::default();
        prefs.apply(&PreferencePatch {
            performance: Some(42),
            ..Default::default()
        });
        assert_eq!(prefs.performance, 10);
        prefs.apply(&PreferencePatch {
            performance: Some(0),
            ..Default::default()
        });
        assert_eq!(prefs.performance, 1);
    }

    #[test]
    fn test_controls_patch_clamps_and_preserves_siblings() {
        let mut controls = AdvancedControls::default();
        controls.apply(&ControlsPatch {
            relevance_weight: Some(1.7),
            price_tolerance: Some(0.9),
            ..Default::default()
        });
        assert_eq!(controls.relevance_weight, 1.0);
        assert_eq!(controls.price_tolerance, 0.5);
        assert_eq!(controls.diversity_weight, 0.3);
        assert_eq!(controls.brand_mode, BrandRule::Any);
    }

    #[test]
    fn test_scoring_priorities_merge_keywise() {
        let mut controls = AdvancedControls::default();
        let mut priorities = BTreeMap::new();
        priorities.insert("budget".to_string(), 0.9);
        priorities.insert("performance".to_string(), -2.0);
        controls.apply(&ControlsPatch {
            scoring_priorities: Some(priorities),
            ..Default::default()
        });
        assert_eq!(controls.scoring_priorities["budget"], 0.9);
        assert_eq!(controls.scoring_priorities["performance"], 0.0);
        assert_eq!(controls.scoring_priorities["seating"], 0.5);
        assert_eq!(controls.scoring_priorities.len(), PRIORITY_DIMENSIONS.len());
    }

    #[test]
    fn test_priorities_gated_by_exploration_flag() {
        let mut controls = AdvancedControls::default();
        let wire = controls.to_wire().expect("serialize controls");
        assert!(wire.get("scoring_priorities").is_none());
        assert_eq!(wire["diversity_mode"], "balanced");

        controls.apply(&ControlsPatch {
            exploration_rate: Some(0.3),
            ..Default::default()
        });
        assert!(controls.exploration_rate_set);
        let wire = controls.to_wire().expect("serialize controls");
        assert!(wire.get("scoring_priorities").is_some());
    }

    #[test]
    fn test_rate_wins_over_stale_flag_in_same_patch() {
        let mut controls = AdvancedControls::default();
        controls.apply(&ControlsPatch {
            exploration_rate: Some(0.3),
            exploration_rate_set: Some(false),
            ..Default::default()
        });
        assert!(controls.exploration_rate_set);

        controls.apply(&ControlsPatch {
            exploration_rate_set: Some(false),
            ..Default::default()
        });
        assert!(!controls.exploration_rate_set);
    }

    #[test]
    fn test_loose_enum_parsing() {
        let patch: ControlsPatch = serde_json::from_value(serde_json::json!({
            "diversity_mode": "Maximum Diversity",
            "brand_mode": "only",
            "exploration_rate": "0.25"
        }))
        .expect("lenient controls patch");
        assert_eq!(patch.diversity_mode, Some(DiversityMode::Explore));
        assert_eq!(patch.brand_mode, Some(BrandRule::Strict));
        assert_eq!(patch.exploration_rate, Some(0.25));

        let patch: ControlsPatch =
            serde_json::from_value(serde_json::json!({ "diversity_mode": "wildcard" }))
                .expect("unknown mode falls back");
        assert_eq!(patch.diversity_mode, Some(DiversityMode::Balanced));
    }
}
