//! Annotation synthesis
//!
//! Folds usable provider outputs, in priority order, into one annotation set.
//!
//! # Duplicate detection
//! Two annotations are duplicates when they share a category and either:
//! - their coordinates lie within `position_tolerance` on both axes and their
//!   normalized feedback similarity is at least `positional_text_similarity`
//! - or their normalized feedback similarity is at least `text_similarity`
//!
//! Similarity is `strsim::normalized_levenshtein` over lowercased,
//! punctuation-stripped, whitespace-collapsed feedback.
//!
//! # Merge rule
//! The earlier (higher-priority) annotation keeps its id, text and position.
//! Severity is the max of both, research flags are OR-ed, sources are
//! unioned and the later provider is recorded in `corroborated_by`.

use crate::config::MergeSettings;
use crate::types::{Annotation, ProviderOutput};
use std::collections::HashSet;
use strsim::normalized_levenshtein;

/// One usable provider output with its declared weight
#[derive(Debug, Clone)]
pub struct Contribution {
    pub provider: String,
    pub weight: f64,
    pub output: ProviderOutput,
}

/// Merge contributions (already in priority order) into one annotation list
pub fn merge_contributions(
    contributions: &[Contribution],
    settings: &MergeSettings,
) -> Vec<Annotation> {
    let mut merged: Vec<Annotation> = Vec::new();
    let mut used_ids: HashSet<String> = HashSet::new();

    for contribution in contributions {
        for incoming in &contribution.output.annotations {
            match merged.iter().position(|existing| is_duplicate(existing, incoming, settings)) {
                Some(index) => {
                    merged[index] = merge_pair(&merged[index], incoming);
                }
                None => {
                    let mut annotation = incoming.clone();
                    if used_ids.contains(&annotation.id) {
                        annotation.id = format!("{}:{}", contribution.provider, annotation.id);
                    }
                    used_ids.insert(annotation.id.clone());
                    merged.push(annotation);
                }
            }
        }
    }

    merged
}

/// Weighted mean of clamped confidences, weights renormalized over contributors
pub fn merged_confidence(contributions: &[Contribution]) -> f64 {
    let total_weight: f64 = contributions.iter().map(|c| c.weight).sum();
    if total_weight <= 0.0 {
        return 0.0;
    }
    let weighted: f64 = contributions
        .iter()
        .map(|c| c.weight * c.output.confidence.clamp(0.0, 1.0))
        .sum();
    (weighted / total_weight).clamp(0.0, 1.0)
}

/// Whether `a` and `b` describe the same finding
pub fn is_duplicate(a: &Annotation, b: &Annotation, settings: &MergeSettings) -> bool {
    if a.category != b.category {
        return false;
    }

    let similarity = text_similarity(&a.feedback, &b.feedback);

    let positional = match (a.coordinates, b.coordinates) {
        (Some(ca), Some(cb)) => {
            a.image_index == b.image_index
                && (ca.x - cb.x).abs() <= settings.position_tolerance
                && (ca.y - cb.y).abs() <= settings.position_tolerance
        }
        _ => false,
    };

    (positional && similarity >= settings.positional_text_similarity)
        || similarity >= settings.text_similarity
}

/// New annotation combining a duplicate into `existing`
pub fn merge_pair(existing: &Annotation, incoming: &Annotation) -> Annotation {
    let mut research_sources = existing.research_sources.clone();
    for source in &incoming.research_sources {
        if !research_sources.contains(source) {
            research_sources.push(source.clone());
        }
    }

    let mut corroborated_by = existing.corroborated_by.clone();
    if incoming.provider != existing.provider && !corroborated_by.contains(&incoming.provider) {
        corroborated_by.push(incoming.provider.clone());
    }

    Annotation {
        severity: existing.severity.max(incoming.severity),
        research_validated: existing.research_validated || incoming.research_validated,
        research_sources,
        corroborated_by,
        coordinates: existing.coordinates.or(incoming.coordinates),
        image_index: existing.image_index.or(incoming.image_index),
        ..existing.clone()
    }
}

fn text_similarity(a: &str, b: &str) -> f64 {
    normalized_levenshtein(&normalize_text(a), &normalize_text(b))
}

/// Lowercase, drop punctuation, collapse whitespace
fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, Severity};

    fn settings() -> MergeSettings {
        MergeSettings::default()
    }

    fn contribution(
        provider: &str,
        weight: f64,
        confidence: f64,
        annotations: Vec<Annotation>,
    ) -> Contribution {
        Contribution {
            provider: provider.to_string(),
            weight,
            output: ProviderOutput {
                annotations,
                confidence,
            },
        }
    }

    #[test]
    fn test_enhancement_and_critical_merge_to_critical() {
        let a = Annotation::new(
            "a1",
            "Checkout button has low contrast",
            Category::Accessibility,
            Severity::Enhancement,
            "p1",
        )
        .at(40.0, 60.0);
        let b = Annotation::new(
            "b1",
            "Checkout button has low contrast!",
            Category::Accessibility,
            Severity::Critical,
            "p2",
        )
        .at(42.0, 61.0);

        assert!(is_duplicate(&a, &b, &settings()));
        let merged = merge_pair(&a, &b);
        assert_eq!(merged.severity, Severity::Critical);
        assert_eq!(merged.id, "a1");
        assert_eq!(merged.corroborated_by, vec!["p2".to_string()]);

        // order does not matter for severity
        assert_eq!(merge_pair(&b, &a).severity, Severity::Critical);
    }

    #[test]
    fn test_different_categories_never_merge() {
        let a = Annotation::new(
            "a1",
            "Button colour is off-brand",
            Category::Brand,
            Severity::Suggested,
            "p1",
        );
        let b = Annotation::new(
            "b1",
            "Button colour is off-brand",
            Category::Visual,
            Severity::Suggested,
            "p2",
        );
        assert!(!is_duplicate(&a, &b, &settings()));
    }

    #[test]
    fn test_positional_match_needs_some_text_overlap() {
        let a = Annotation::new(
            "a1",
            "Search field is hard to find",
            Category::Ux,
            Severity::Suggested,
            "p1",
        )
        .at(10.0, 10.0);
        let near_related = Annotation::new(
            "b1",
            "Search field hard to locate",
            Category::Ux,
            Severity::Critical,
            "p2",
        )
        .at(12.0, 13.0);
        let near_unrelated = Annotation::new(
            "c1",
            "zzzz qqqq xxxx",
            Category::Ux,
            Severity::Critical,
            "p3",
        )
        .at(12.0, 13.0);
        let far_related = Annotation::new(
            "d1",
            "Search field hard to locate",
            Category::Ux,
            Severity::Critical,
            "p4",
        )
        .at(60.0, 13.0);

        assert!(is_duplicate(&a, &near_related, &settings()));
        assert!(!is_duplicate(&a, &near_unrelated, &settings()));
        assert!(!is_duplicate(&a, &far_related, &settings()));
    }

    #[test]
    fn test_merge_unions_research_metadata() {
        let a = Annotation::new(
            "a1",
            "Low contrast body text",
            Category::Accessibility,
            Severity::Suggested,
            "p1",
        )
        .with_research(&["WCAG 1.4.3".to_string()]);
        let b = Annotation::new(
            "b1",
            "Low contrast body text",
            Category::Accessibility,
            Severity::Suggested,
            "p2",
        )
        .with_research(&["WCAG 1.4.3".to_string(), "WebAIM".to_string()]);
        let merged = merge_pair(&a, &b);
        assert!(merged.research_validated);
        assert_eq!(merged.research_sources, vec!["WCAG 1.4.3".to_string(), "WebAIM".to_string()]);
    }

    #[test]
    fn test_merge_contributions_keeps_priority_order_and_unique_ids() {
        let primary = contribution(
            "p1",
            0.7,
            0.9,
            vec![
                Annotation::new(
                    "a1",
                    "Primary CTA is below the fold",
                    Category::Conversion,
                    Severity::Critical,
                    "p1",
                ),
                Annotation::new(
                    "a2",
                    "Logo is pixelated on retina displays",
                    Category::Brand,
                    Severity::Enhancement,
                    "p1",
                ),
            ],
        );
        let secondary = contribution(
            "p2",
            0.3,
            0.7,
            vec![
                Annotation::new(
                    "a1",
                    "Primary CTA is below the fold.",
                    Category::Conversion,
                    Severity::Suggested,
                    "p2",
                ),
                Annotation::new(
                    "a2",
                    "Footer links are too small to tap",
                    Category::Accessibility,
                    Severity::Suggested,
                    "p2",
                ),
            ],
        );

        let merged = merge_contributions(&[primary, secondary], &settings());
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].id, "a1");
        assert_eq!(merged[0].severity, Severity::Critical);
        assert_eq!(merged[0].corroborated_by, vec!["p2".to_string()]);
        assert_eq!(merged[1].id, "a2");
        assert_eq!(merged[2].id, "p2:a2");
    }

    #[test]
    fn test_confidence_renormalized_over_contributors() {
        let contributions = vec![
            contribution("p1", 0.7, 0.9, vec![]),
            contribution("p3", 0.1, 0.5, vec![]),
        ];
        // (0.7 × 0.9 + 0.1 × 0.5) / 0.8
        let expected = (0.63 + 0.05) / 0.8;
        assert!((merged_confidence(&contributions) - expected).abs() < 1e-9);
        assert_eq!(merged_confidence(&[]), 0.0);
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Low-Contrast   TEXT! "), "low contrast text");
    }
}
