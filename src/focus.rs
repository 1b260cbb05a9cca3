//! Detection of "show me other variants of X" requests.
//!
//! Pure and synchronous: the resolver only looks at the text and at variant
//! names the user can already see. It is a heuristic; odd phrasing may resolve
//! to the wrong model or to the raw text, which the remote service may still
//! understand.

use regex::Regex;
use std::sync::LazyLock;

static TRIGGER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(other|more|all|another|sibling)\b(?:\s+[\w\-\.&']+){0,3}?\s+(?:variants?|trims?|versions?)\b",
    )
    .expect("trigger regex must compile")
});

/// Candidate extraction patterns, tried in order.
static CANDIDATE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // "variants of the Altroz", "other trims for Creta"
        r"(?i)\b(?:variants?|trims?|versions?)\s+(?:of|for|from|in)\s+(?:the\s+)?(.+)$",
        // "show me other Altroz variants", "list all Nexon trims"
        r"(?i)\b(?:show|give|list|find|see|get)\s+(?:me\s+)?(?:the\s+)?(?:other|more|all|another|sibling)?\s*(.+?)\s+(?:variants?|trims?|versions?)\b",
        // "other Altroz variants"
        r"(?i)\b(?:other|more|all|another|sibling)\s+(.+?)\s+(?:variants?|trims?|versions?)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("candidate regex must compile"))
    .collect()
});

const FILLER_WORDS: [&str; 16] = [
    "please", "pls", "too", "also", "as", "well", "now", "model", "models", "car", "cars", "one",
    "ones", "available", "here", "instead",
];

const PRONOUNS: [&str; 8] = ["the", "this", "that", "it", "its", "these", "those", "them"];

/// How the focus target was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Candidate equals a visible variant name, ignoring case.
    Exact,
    /// Candidate and a visible variant name contain one another.
    Substring,
    /// No visible variant matched; the extracted text is sent as-is.
    Raw,
    /// Nothing could be extracted; the first visible variant is assumed.
    FirstVisible,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusTarget {
    /// Variant (or model text) to narrow the next search to.
    pub variant: String,
    pub resolution: Resolution,
    pub candidate: Option<String>,
    /// Set when the user asked for *other* variants of something already on screen.
    pub exclude_variant: Option<String>,
}

/// Returns `None` when the text carries no sibling-variant intent, or when it
/// does but nothing is visible to anchor it on.
pub fn resolve_focus(text: &str, visible: &[String]) -> Option<FocusTarget> {
    let trigger = TRIGGER_RE.captures(text)?;
    let wants_others = trigger
        .get(1)
        .map(|m| {
            let w = m.as_str().to_ascii_lowercase();
            matches!(w.as_str(), "other" | "another" | "sibling")
        })
        .unwrap_or(false);

    let candidate = extract_candidate(text);
    tracing::debug!("Variant focus intent detected, candidate: {:?}", candidate);

    let (variant, resolution) = match &candidate {
        Some(c) => match match_visible(c, visible) {
            Some((name, res)) => (name, res),
            None => (c.clone(), Resolution::Raw),
        },
        None => (visible.first()?.clone(), Resolution::FirstVisible),
    };

    let exclude_variant = (wants_others && resolution != Resolution::Raw).then(|| variant.clone());

    Some(FocusTarget {
        variant,
        resolution,
        candidate,
        exclude_variant,
    })
}

fn extract_candidate(text: &str) -> Option<String> {
    CANDIDATE_PATTERNS.iter().find_map(|re| {
        re.captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| clean_candidate(m.as_str()))
    })
}

fn clean_candidate(raw: &str) -> Option<String> {
    let trimmed = raw.trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace());
    let mut words: Vec<&str> = trimmed.split_whitespace().collect();

    while let Some(last) = words.last() {
        let w = last.trim_matches(|c: char| c.is_ascii_punctuation()).to_ascii_lowercase();
        if FILLER_WORDS.contains(&w.as_str()) || w.is_empty() {
            words.pop();
        } else {
            break;
        }
    }
    while let Some(first) = words.first() {
        let w = first.to_ascii_lowercase();
        if matches!(w.as_str(), "the" | "a" | "an" | "other" | "more" | "all" | "another") {
            words.remove(0);
        } else {
            break;
        }
    }

    let candidate = words
        .join(" ")
        .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_string();
    if candidate.is_empty() || PRONOUNS.contains(&candidate.to_ascii_lowercase().as_str()) {
        None
    } else {
        Some(candidate)
    }
}

fn match_visible(candidate: &str, visible: &[String]) -> Option<(String, Resolution)> {
    let needle = candidate.to_lowercase();
    if let Some(name) = visible.iter().find(|v| v.to_lowercase() == needle) {
        return Some((name.clone(), Resolution::Exact));
    }
    visible
        .iter()
        .find(|v| v.to_lowercase().contains(&needle))
        .or_else(|| visible.iter().find(|v| needle.contains(&v.to_lowercase())))
        .map(|name| (name.clone(), Resolution::Substring))
}

/// Union of result and shortlist names, results first, duplicates dropped.
pub fn visible_variants<'a>(
    results: impl IntoIterator<Item = &'a str>,
    shortlist: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in results.into_iter().chain(shortlist) {
        if !name.trim().is_empty() && !out.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            out.push(name.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_trigger_returns_none() {
        let visible = names(&["Tata Altroz XZ"]);
        assert!(resolve_focus("which one has better mileage?", &visible).is_none());
        assert!(resolve_focus("show me SUVs under 15 lakh", &visible).is_none());
        assert!(resolve_focus("variants are confusing", &visible).is_none());
    }

    #[test]
    fn test_variants_of_resolves_by_substring() {
        let visible = names(&["Hyundai Creta SX", "Tata Altroz XZ Plus"]);
        let focus = resolve_focus("Show me other variants of the Altroz please!", &visible)
            .expect("focus intent");
        assert_eq!(focus.variant, "Tata Altroz XZ Plus");
        assert_eq!(focus.resolution, Resolution::Substring);
        assert_eq!(focus.candidate.as_deref(), Some("Altroz"));
        assert_eq!(focus.exclude_variant.as_deref(), Some("Tata Altroz XZ Plus"));
    }

    #[test]
    fn test_exact_match_wins_over_substring() {
        let visible = names(&["Nexon EV Max", "Nexon"]);
        let focus = resolve_focus("more nexon variants", &visible).expect("focus intent");
        assert_eq!(focus.variant, "Nexon");
        assert_eq!(focus.resolution, Resolution::Exact);
        assert_eq!(focus.exclude_variant, None);
    }

    #[test]
    fn test_unknown_model_is_sent_raw() {
        let visible = names(&["Hyundai Creta SX"]);
        let focus = resolve_focus("show me all Seltos variants", &visible).expect("focus intent");
        assert_eq!(focus.variant, "Seltos");
        assert_eq!(focus.resolution, Resolution::Raw);
        assert_eq!(focus.exclude_variant, None);
    }

    #[test]
    fn test_pronoun_falls_back_to_first_visible() {
        let visible = names(&["Maruti Brezza ZXi", "Kia Sonet HTX"]);
        let focus = resolve_focus("show other variants of this", &visible).expect("focus intent");
        assert_eq!(focus.variant, "Maruti Brezza ZXi");
        assert_eq!(focus.resolution, Resolution::FirstVisible);

        let focus = resolve_focus("any other variants?", &visible).expect("focus intent");
        assert_eq!(focus.resolution, Resolution::FirstVisible);
    }

    #[test]
    fn test_trigger_without_anything_visible() {
        assert!(resolve_focus("show other variants", &[]).is_none());
        let focus = resolve_focus("show other variants of Venue", &[]).expect("raw candidate");
        assert_eq!(focus.variant, "Venue");
    }

    #[test]
    fn test_visible_variants_dedupes_across_sources() {
        let visible = visible_variants(
            ["Creta SX", "Altroz XZ"],
            ["altroz xz", "Sonet HTX", ""],
        );
        assert_eq!(visible, names(&["Creta SX", "Altroz XZ", "Sonet HTX"]));
    }
}
