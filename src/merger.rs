//! Reconciles preference updates extracted from free text into the canonical store.
//!
//! Extracted payloads are partial and noisy: a field the user did not mention is
//! either missing or empty, and must never reset what the form already holds.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::models::{deserialize_flexible_u32, deserialize_flexible_u64};
use crate::preferences::{clamp_performance, ControlsPatch, PreferenceStore, Preferences, ANY};

const BASIC_KEYS: [&str; 9] = [
    "min_budget",
    "max_budget",
    "body_type",
    "fuel_type",
    "transmission",
    "seating",
    "features",
    "performance",
    "brand",
];

const NESTED_BASIC: [&str; 2] = ["preferences", "basic_preferences"];
const NESTED_CONTROLS: [&str; 2] = ["user_control_config", "advanced_controls"];

/// Update object produced by the remote chat/ask services.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PreferenceUpdates {
    pub budget: Option<Vec<Value>>,
    #[serde(deserialize_with = "deserialize_flexible_u64")]
    pub min_budget: Option<u64>,
    #[serde(deserialize_with = "deserialize_flexible_u64")]
    pub max_budget: Option<u64>,
    pub fuel_type: Option<String>,
    pub body_type: Option<String>,
    pub transmission: Option<String>,
    #[serde(deserialize_with = "deserialize_flexible_u32")]
    pub seating: Option<u32>,
    pub brand: Option<String>,
    pub features: Option<Vec<String>>,
    pub features_add: Option<Vec<String>>,
    pub features_remove: Option<Vec<String>>,
    #[serde(deserialize_with = "deserialize_flexible_u32")]
    pub performance: Option<u32>,
}

impl PreferenceUpdates {
    /// Lenient parse: a malformed update object is treated as "no updates".
    pub fn from_value(value: &Value) -> Self {
        match serde_json::from_value(value.clone()) {
            Ok(updates) => updates,
            Err(e) => {
                warn!("Ignoring malformed preference updates: {}", e);
                Self::default()
            }
        }
    }

    /// `budget: [min, max]` wins over the flat fields when both are present.
    fn budget_bounds(&self) -> (Option<u64>, Option<u64>) {
        let mut min = self.min_budget;
        let mut max = self.max_budget;
        if let Some(pair) = &self.budget {
            if let Some(v) = pair.first().and_then(value_to_u64) {
                min = Some(v);
            }
            if let Some(v) = pair.get(1).and_then(value_to_u64) {
                max = Some(v);
            }
        }
        (min, max.filter(|v| *v > 0))
    }
}

fn value_to_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64)),
        Value::String(s) => s
            .replace(',', "")
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f.round() as u64),
        _ => None,
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
}

fn clean_list(items: &Option<Vec<String>>) -> Vec<String> {
    items
        .iter()
        .flatten()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Result of a merge plus whether anything observable moved.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub preferences: Preferences,
    pub changed: bool,
}

/// Apply extracted updates on top of `current`.
///
/// Scalars overwrite only when present and non-empty. Features are
/// `(existing ∪ features) ∪ features_add − features_remove`, compared
/// case-insensitively.
pub fn merge(current: &Preferences, updates: &PreferenceUpdates) -> MergeOutcome {
    let mut next = current.clone();

    let (min, max) = updates.budget_bounds();
    if let Some(v) = min {
        next.min_budget = v;
    }
    if let Some(v) = max {
        next.max_budget = v;
    }
    if let Some(v) = non_empty(&updates.fuel_type) {
        next.fuel_type = v.to_string();
    }
    if let Some(v) = non_empty(&updates.body_type) {
        next.body_type = v.to_string();
    }
    if let Some(v) = non_empty(&updates.transmission) {
        next.transmission = v.to_string();
    }
    if let Some(v) = updates.seating.filter(|v| *v > 0) {
        next.seating = v;
    }
    if let Some(v) = updates.performance.filter(|v| *v > 0) {
        next.performance = clamp_performance(v);
    }
    if let Some(v) = non_empty(&updates.brand) {
        next.brand = if v.eq_ignore_ascii_case(ANY) {
            ANY.to_string()
        } else {
            v.to_string()
        };
    }

    next.features = merge_features(
        &current.features,
        &clean_list(&updates.features),
        &clean_list(&updates.features_add),
        &clean_list(&updates.features_remove),
    );

    let changed = next != *current;
    debug!("Preference merge complete (changed: {})", changed);
    MergeOutcome {
        preferences: next,
        changed,
    }
}

fn merge_features(
    existing: &BTreeSet<String>,
    replacement: &[String],
    add: &[String],
    remove: &[String],
) -> BTreeSet<String> {
    let mut merged: Vec<String> = existing.iter().cloned().collect();
    for item in replacement.iter().chain(add) {
        if !merged.iter().any(|f| f.eq_ignore_ascii_case(item)) {
            merged.push(item.clone());
        }
    }
    merged
        .into_iter()
        .filter(|f| !remove.iter().any(|r| r.eq_ignore_ascii_case(f)))
        .collect()
}

/// Merge into the store, reporting whether a re-search is warranted.
pub fn merge_into(store: &mut PreferenceStore, updates: &PreferenceUpdates) -> bool {
    let outcome = merge(store.preferences(), updates);
    if outcome.changed {
        store.replace_preferences(outcome.preferences)
    } else {
        false
    }
}

/// Split an extraction payload into basic-preference and advanced-control maps.
///
/// Accepts flat payloads and the nested `preferences` / `basic_preferences` and
/// `user_control_config` / `advanced_controls` shapes. Flat keys override nested ones.
pub fn split_basic_and_controls(payload: &Value) -> (Map<String, Value>, Map<String, Value>) {
    let mut basic = Map::new();
    let mut controls = Map::new();
    let Some(obj) = payload.as_object() else {
        return (basic, controls);
    };

    for key in NESTED_BASIC {
        if let Some(Value::Object(nested)) = obj.get(key) {
            basic.extend(nested.clone());
        }
    }
    for key in NESTED_CONTROLS {
        if let Some(Value::Object(nested)) = obj.get(key) {
            controls.extend(nested.clone());
        }
    }

    for (key, value) in obj {
        if NESTED_BASIC.contains(&key.as_str()) || NESTED_CONTROLS.contains(&key.as_str()) {
            continue;
        }
        if BASIC_KEYS.contains(&key.as_str()) {
            basic.insert(key.clone(), value.clone());
        } else {
            controls.insert(key.clone(), value.clone());
        }
    }

    (basic, controls)
}

/// Lenient controls parse; unknown keys are ignored, malformed objects dropped.
pub fn controls_patch_from(map: Map<String, Value>) -> ControlsPatch {
    if map.is_empty() {
        return ControlsPatch::default();
    }
    match serde_json::from_value(Value::Object(map)) {
        Ok(patch) => patch,
        Err(e) => {
            warn!("Ignoring malformed advanced controls: {}", e);
            ControlsPatch::default()
        }
    }
}

/// Fold a chat reply's preference and control snapshots into the store.
///
/// Must-have features seed the feature set when the user has none yet.
pub fn merge_chat_snapshot(
    store: &mut PreferenceStore,
    preferences: Option<&Value>,
    controls: Option<&Value>,
) -> bool {
    let mut changed = false;

    let mut controls_patch = match controls {
        Some(Value::Object(map)) => controls_patch_from(map.clone()),
        _ => ControlsPatch::default(),
    };

    if let Some(prefs) = preferences {
        let (basic, extra_controls) = split_basic_and_controls(prefs);
        let mut updates = PreferenceUpdates::from_value(&Value::Object(basic));
        if store.preferences().features.is_empty() && clean_list(&updates.features).is_empty() {
            if let Some(must) = &controls_patch.must_have_features {
                updates.features = Some(must.clone());
            }
        }
        changed |= merge_into(store, &updates);

        if !extra_controls.is_empty() {
            let extra = controls_patch_from(extra_controls);
            controls_patch = merge_controls_patch(extra, controls_patch);
        }
    }

    // The reply echoes the client's controls, flag included. Only a moved rate marks it set.
    controls_patch.exploration_rate_set = None;
    let current_rate = store.controls().exploration_rate;
    if controls_patch
        .exploration_rate
        .is_some_and(|rate| (rate - current_rate).abs() < 1e-9)
    {
        controls_patch.exploration_rate = None;
    }

    if !controls_patch.is_empty() {
        changed |= store.update_controls(&controls_patch);
    }
    changed
}

fn merge_controls_patch(base: ControlsPatch, over: ControlsPatch) -> ControlsPatch {
    // Round-trip through JSON objects so `over` wins key-by-key.
    let to_map = |p: &ControlsPatch| match serde_json::to_value(p) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    let mut merged = to_map(&base);
    merged.extend(to_map(&over));
    controls_patch_from(merged)
}

/// Next clarifying question when the chat service gave no reply of its own.
pub fn follow_up_question(preferences: &Preferences) -> &'static str {
    let unset = |v: &str| v.trim().is_empty() || v.eq_ignore_ascii_case(ANY);
    if preferences.max_budget == 0 {
        "What budget range should we target? You can say something like under ₹15 lakh."
    } else if unset(&preferences.body_type) {
        "Which body style are you leaning toward: SUV, Sedan, Hatchback, or MUV?"
    } else if unset(&preferences.fuel_type) {
        "Do you prefer Petrol, Diesel, CNG, Hybrid, or Electric?"
    } else if unset(&preferences.transmission) {
        "Would you like Automatic or Manual transmission?"
    } else if preferences.seating == 0 {
        "How many seats do you need?"
    } else {
        "Great, I have enough to start searching. I'll shortlist strong options now."
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::{AdvancedControls, BrandRule, PreferencePatch};
    use serde_json::json;

    fn prefs_with_features(items: &[&str]) -> Preferences {
        Preferences {
            features: items.iter().map(|s| s.to_string()).collect(),
            ..Preferences::default()
        }
    }

    #[test]
    fn test_feature_add_and_remove() {
        let current = prefs_with_features(&["A", "B"]);
        let updates = PreferenceUpdates::from_value(&json!({
            "features_add": ["C"],
            "features_remove": ["B"]
        }));
        let outcome = merge(&current, &updates);
        let expected: BTreeSet<String> = ["A", "C"].iter().map(|s| s.to_string()).collect();
        assert_eq!(outcome.preferences.features, expected);
        assert!(outcome.changed);

        let reordered = prefs_with_features(&["B", "A"]);
        let updates = PreferenceUpdates::from_value(&json!({
            "features_remove": ["B"],
            "features_add": ["C"]
        }));
        assert_eq!(merge(&reordered, &updates).preferences.features, expected);
    }

    #[test]
    fn test_replacement_list_unions_then_removes() {
        let current = prefs_with_features(&["Sunroof"]);
        let updates = PreferenceUpdates::from_value(&json!({
            "features": ["ADAS", "sunroof"],
            "features_add": ["Ventilated Seats"],
            "features_remove": ["ADAS"]
        }));
        let features = merge(&current, &updates).preferences.features;
        assert_eq!(features.len(), 2);
        assert!(features.contains("Sunroof"));
        assert!(features.contains("Ventilated Seats"));
    }

    #[test]
    fn test_empty_fields_do_not_reset() {
        let current = Preferences {
            fuel_type: "Diesel".to_string(),
            seating: 7,
            brand: "Mahindra".to_string(),
            ..Preferences::default()
        };
        let updates = PreferenceUpdates::from_value(&json!({
            "fuel_type": "",
            "body_type": null,
            "seating": 0,
            "brand": "  ",
            "features": []
        }));
        let outcome = merge(&current, &updates);
        assert!(!outcome.changed);
        assert_eq!(outcome.preferences, current);
    }

    #[test]
    fn test_budget_pair_and_brand_reset() {
        let current = Preferences {
            brand: "Tata".to_string(),
            ..Preferences::default()
        };
        let updates = PreferenceUpdates::from_value(&json!({
            "budget": [800000, "1,200,000"],
            "brand": "any"
        }));
        let outcome = merge(&current, &updates);
        assert_eq!(outcome.preferences.min_budget, 800_000);
        assert_eq!(outcome.preferences.max_budget, 1_200_000);
        assert_eq!(outcome.preferences.brand, ANY);
    }

    #[test]
    fn test_budget_pair_with_null_max_keeps_max() {
        let current = Preferences::default();
        let updates = PreferenceUpdates::from_value(&json!({ "budget": [300000, null] }));
        let outcome = merge(&current, &updates);
        assert_eq!(outcome.preferences.min_budget, 300_000);
        assert_eq!(outcome.preferences.max_budget, current.max_budget);
    }

    #[test]
    fn test_malformed_updates_are_ignored() {
        let updates = PreferenceUpdates::from_value(&json!({ "features_add": "Sunroof" }));
        assert_eq!(updates, PreferenceUpdates::default());
        assert!(!merge(&Preferences::default(), &updates).changed);
    }

    #[test]
    fn test_merge_into_reports_change_once() {
        let mut store = PreferenceStore::default();
        let updates = PreferenceUpdates::from_value(&json!({ "body_type": "SUV" }));
        assert!(merge_into(&mut store, &updates));
        assert!(!merge_into(&mut store, &updates));
        assert_eq!(store.preferences().body_type, "SUV");
    }

    #[test]
    fn test_split_flat_and_nested_payloads() {
        let payload = json!({
            "preferences": { "body_type": "SUV", "seating": 7 },
            "advanced_controls": { "brand_mode": "strict" },
            "fuel_type": "Diesel",
            "preferred_brands": ["Tata"]
        });
        let (basic, controls) = split_basic_and_controls(&payload);
        assert_eq!(basic["body_type"], "SUV");
        assert_eq!(basic["fuel_type"], "Diesel");
        assert_eq!(basic["seating"], 7);
        assert_eq!(controls["brand_mode"], "strict");
        assert_eq!(controls["preferred_brands"][0], "Tata");
        assert!(!basic.contains_key("preferred_brands"));
    }

    #[test]
    fn test_chat_snapshot_seeds_features_from_must_haves() {
        let mut store = PreferenceStore::default();
        let changed = merge_chat_snapshot(
            &mut store,
            Some(&json!({ "body_type": "SUV", "brand_mode": "preferred" })),
            Some(&json!({ "must_have_features": ["Sunroof"], "preferred_brands": ["Kia"] })),
        );
        assert!(changed);
        assert!(store.preferences().features.contains("Sunroof"));
        assert_eq!(store.controls().brand_mode, BrandRule::Preferred);
        assert_eq!(store.controls().preferred_brands, vec!["Kia".to_string()]);
    }

    fn echoed_controls(rate: f64) -> Value {
        let mut wire = AdvancedControls::default().to_wire().expect("serialize controls");
        wire["exploration_rate"] = json!(rate);
        wire
    }

    #[test]
    fn test_echoed_controls_with_new_rate_mark_exploration_set() {
        let mut store = PreferenceStore::default();
        let echoed = echoed_controls(0.3);
        assert_eq!(echoed["exploration_rate_set"], json!(false));

        assert!(merge_chat_snapshot(&mut store, None, Some(&echoed)));
        assert_eq!(store.controls().exploration_rate, 0.3);
        assert!(store.controls().exploration_rate_set);
        let wire = store.controls().to_wire().expect("serialize controls");
        assert!(wire.get("scoring_priorities").is_some());
    }

    #[test]
    fn test_unchanged_echo_leaves_controls_alone() {
        let mut store = PreferenceStore::default();
        let echoed = echoed_controls(AdvancedControls::default().exploration_rate);

        assert!(!merge_chat_snapshot(&mut store, None, Some(&echoed)));
        assert!(!store.controls().exploration_rate_set);
    }

    #[test]
    fn test_echo_does_not_clear_an_earlier_exploration_choice() {
        let mut store = PreferenceStore::default();
        merge_chat_snapshot(&mut store, None, Some(&echoed_controls(0.3)));
        let echoed = store.controls().to_wire().expect("serialize controls");

        merge_chat_snapshot(&mut store, None, Some(&echoed));
        assert!(store.controls().exploration_rate_set);
    }

    #[test]
    fn test_scalar_and_feature_updates_compose_in_either_order() {
        let start = Preferences {
            fuel_type: "Petrol".to_string(),
            ..prefs_with_features(&["ABS"])
        };
        let scalars = PreferenceUpdates::from_value(&json!({
            "fuel_type": "Diesel",
            "max_budget": 1500000,
            "seating": 7
        }));
        let features = PreferenceUpdates::from_value(&json!({
            "features_add": ["Sunroof"],
            "features_remove": ["abs"]
        }));
        let combined = PreferenceUpdates::from_value(&json!({
            "fuel_type": "Diesel",
            "max_budget": 1500000,
            "seating": 7,
            "features_add": ["Sunroof"],
            "features_remove": ["abs"]
        }));

        let expected = merge(&start, &combined).preferences;
        let scalar_first = merge(&merge(&start, &scalars).preferences, &features).preferences;
        let features_first = merge(&merge(&start, &features).preferences, &scalars).preferences;
        assert_eq!(scalar_first, expected);
        assert_eq!(features_first, expected);
        assert_eq!(expected.fuel_type, "Diesel");
        assert_eq!(expected.seating, 7);
        let names: Vec<&str> = expected.features.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["Sunroof"]);
    }

    #[test]
    fn test_follow_up_question_order() {
        let mut prefs = Preferences::default();
        assert!(follow_up_question(&prefs).contains("body style"));
        prefs.apply(&PreferencePatch {
            body_type: Some("SUV".to_string()),
            ..Default::default()
        });
        assert!(follow_up_question(&prefs).contains("Petrol"));
        prefs.max_budget = 0;
        assert!(follow_up_question(&prefs).contains("budget"));
    }
}
