//! Quality assessor
//!
//! Pure scoring of an annotation set plus its synthesis metadata. Metrics are
//! always computed from scratch; nothing is patched incrementally.
//!
//! # Formulas
//! - `provider_quality`: `min(confidence × preferred_boost, 1)` when the
//!   preferred provider led, else `confidence × fallback_penalty`
//! - `synthesis_quality`: `min(0.45 × diversity + 0.45 × length + bonus, 1)`
//!   - diversity: `0.5 × categories/5 + 0.5 × severities/3`
//!   - length: `min(mean feedback chars / target_feedback_length, 1)`
//!   - bonus: `multi_provider_bonus` when more than one provider contributed
//! - `research_validation`: share of annotations with research backing
//! - `overall_score`: `0.5 × provider + 0.3 × synthesis + 0.2 × research`

use crate::config::{AnnotationBounds, QualitySettings};
use crate::types::{Annotation, Category, QualityMetrics, Severity, SynthesisMetadata};
use std::collections::HashSet;

const PROVIDER_WEIGHT: f64 = 0.5;
const SYNTHESIS_WEIGHT: f64 = 0.3;
const RESEARCH_WEIGHT: f64 = 0.2;

const DIVERSITY_WEIGHT: f64 = 0.45;
const LENGTH_WEIGHT: f64 = 0.45;

/// Feedback phrases that count as research backing
const RESEARCH_PHRASES: [&str; 8] = [
    "research",
    "study",
    "studies",
    "wcag",
    "nielsen",
    "baymard",
    "according to",
    "data shows",
];

/// Deterministic quality scoring
#[derive(Debug, Clone)]
pub struct QualityAssessor {
    settings: QualitySettings,
    bounds: AnnotationBounds,
}

impl QualityAssessor {
    pub fn new(settings: QualitySettings, bounds: AnnotationBounds) -> Self {
        Self { settings, bounds }
    }

    pub fn bounds(&self) -> AnnotationBounds {
        self.bounds
    }

    /// Overall threshold for the requested strictness
    pub fn threshold(&self, strict: bool) -> f64 {
        self.settings.threshold(strict)
    }

    /// Score `annotations` produced under `synthesis`
    pub fn assess(
        &self,
        annotations: &[Annotation],
        synthesis: &SynthesisMetadata,
    ) -> QualityMetrics {
        let provider_quality = self.provider_quality(synthesis);
        let synthesis_quality = self.synthesis_quality(annotations, synthesis);
        let research_validation = research_validation(annotations);

        let overall_score = (PROVIDER_WEIGHT * provider_quality
            + SYNTHESIS_WEIGHT * synthesis_quality
            + RESEARCH_WEIGHT * research_validation)
            .clamp(0.0, 1.0);

        let count = annotations.len();
        let professional_standard = count >= self.bounds.professional
            && count <= self.bounds.maximum
            && overall_score >= self.settings.strict_threshold;

        QualityMetrics {
            overall_score,
            provider_quality,
            synthesis_quality,
            research_validation,
            professional_standard,
            annotation_count: count,
        }
    }

    /// Every failed threshold, in a fixed order
    pub fn violations(&self, metrics: &QualityMetrics, strict: bool) -> Vec<String> {
        let mut violations = Vec::new();

        if metrics.annotation_count < self.bounds.minimum {
            violations.push(format!(
                "annotation count {} < minimum {}",
                metrics.annotation_count, self.bounds.minimum
            ));
        }
        if metrics.annotation_count > self.bounds.maximum {
            violations.push(format!(
                "annotation count {} > maximum {}",
                metrics.annotation_count, self.bounds.maximum
            ));
        }

        let threshold = self.threshold(strict);
        if metrics.overall_score < threshold {
            violations.push(format!(
                "overall quality {:.1}% < {:.1}%",
                percent_floor(metrics.overall_score),
                percent_ceil(threshold)
            ));
        }

        violations
    }

    /// True when no threshold fails
    pub fn passes(&self, metrics: &QualityMetrics, strict: bool) -> bool {
        self.violations(metrics, strict).is_empty()
    }

    fn provider_quality(&self, synthesis: &SynthesisMetadata) -> f64 {
        let confidence = synthesis.confidence.clamp(0.0, 1.0);
        let quality = if synthesis.preferred_model {
            confidence * self.settings.preferred_boost
        } else {
            confidence * self.settings.fallback_penalty
        };
        quality.clamp(0.0, 1.0)
    }

    fn synthesis_quality(&self, annotations: &[Annotation], synthesis: &SynthesisMetadata) -> f64 {
        let bonus = if synthesis.providers_used > 1 {
            self.settings.multi_provider_bonus
        } else {
            0.0
        };

        let score = DIVERSITY_WEIGHT * diversity(annotations)
            + LENGTH_WEIGHT * self.length_score(annotations)
            + bonus;
        score.clamp(0.0, 1.0)
    }

    fn length_score(&self, annotations: &[Annotation]) -> f64 {
        if annotations.is_empty() || self.settings.target_feedback_length == 0 {
            return 0.0;
        }
        let total_chars: usize = annotations.iter().map(|a| a.feedback.chars().count()).sum();
        let mean = total_chars as f64 / annotations.len() as f64;
        (mean / self.settings.target_feedback_length as f64).min(1.0)
    }
}

fn diversity(annotations: &[Annotation]) -> f64 {
    let categories: HashSet<Category> = annotations.iter().map(|a| a.category).collect();
    let severities: HashSet<Severity> = annotations.iter().map(|a| a.severity).collect();
    0.5 * (categories.len() as f64 / Category::ALL.len() as f64)
        + 0.5 * (severities.len() as f64 / Severity::ALL.len() as f64)
}

fn research_validation(annotations: &[Annotation]) -> f64 {
    if annotations.is_empty() {
        return 0.0;
    }
    let backed = annotations.iter().filter(|a| has_research_backing(a)).count();
    backed as f64 / annotations.len() as f64
}

fn has_research_backing(annotation: &Annotation) -> bool {
    if annotation.research_validated || !annotation.research_sources.is_empty() {
        return true;
    }
    let feedback = annotation.feedback.to_lowercase();
    RESEARCH_PHRASES.iter().any(|phrase| feedback.contains(phrase))
}

/// Percent with one decimal, rounded down
fn percent_floor(value: f64) -> f64 {
    (value * 1000.0).floor() / 10.0
}

/// Percent with one decimal, rounded up; float noise below 1e-9 is ignored
fn percent_ceil(value: f64) -> f64 {
    (value * 1000.0 - 1e-9).ceil() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assessor() -> QualityAssessor {
        QualityAssessor::new(QualitySettings::default(), AnnotationBounds::default())
    }

    fn synthesis(confidence: f64, preferred: bool, providers_used: usize) -> SynthesisMetadata {
        SynthesisMetadata {
            primary_model: "p1".to_string(),
            preferred_model: preferred,
            confidence,
            fallbacks_triggered: vec![],
            providers_used,
            contributors: vec![],
        }
    }

    /// `count` annotations cycling through every category and severity
    fn diverse(count: usize, feedback_len: usize) -> Vec<Annotation> {
        (0..count)
            .map(|i| {
                Annotation::new(
                    format!("a{}", i),
                    "x".repeat(feedback_len),
                    Category::ALL[i % 5],
                    Severity::ALL[i % 3],
                    "p1",
                )
            })
            .collect()
    }

    #[test]
    fn test_assess_is_deterministic() {
        let annotations = diverse(14, 90);
        let synth = synthesis(0.82, true, 2);
        let first = assessor().assess(&annotations, &synth);
        let second = assessor().assess(&annotations, &synth);
        assert_eq!(first, second);
    }

    #[test]
    fn test_preferred_boost_and_fallback_penalty() {
        let annotations = diverse(12, 120);
        let preferred = assessor().assess(&annotations, &synthesis(0.95, true, 1));
        assert_eq!(preferred.provider_quality, 1.0);

        let fallback = assessor().assess(&annotations, &synthesis(0.5, false, 1));
        assert!((fallback.provider_quality - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_synthesis_quality_components() {
        // full diversity and length, single provider: 0.45 + 0.45
        let metrics = assessor().assess(&diverse(15, 120), &synthesis(0.9, true, 1));
        assert!((metrics.synthesis_quality - 0.90).abs() < 1e-9);

        // bonus caps at 1.0
        let metrics = assessor().assess(&diverse(15, 120), &synthesis(0.9, true, 3));
        assert_eq!(metrics.synthesis_quality, 1.0);

        // one category and one severity: diversity 0.5 × 1/5 + 0.5 × 1/3
        let uniform: Vec<Annotation> = (0..4)
            .map(|i| {
                let id = format!("u{}", i);
                Annotation::new(id, "x".repeat(60), Category::Ux, Severity::Critical, "p1")
            })
            .collect();
        let metrics = assessor().assess(&uniform, &synthesis(0.9, true, 1));
        let expected = 0.45 * (0.1 + 1.0 / 6.0) + 0.45 * 0.5;
        assert!((metrics.synthesis_quality - expected).abs() < 1e-9);
    }

    #[test]
    fn test_research_validation_counts_flags_sources_and_phrases() {
        let annotations = vec![
            Annotation::new("a", "Plain finding", Category::Ux, Severity::Critical, "p1"),
            Annotation::new(
                "b",
                "Fails WCAG 1.4.3 contrast",
                Category::Accessibility,
                Severity::Critical,
                "p1",
            ),
            Annotation::new("c", "Plain finding two", Category::Visual, Severity::Suggested, "p1")
                .with_research(&["Baymard 2023".to_string()]),
            Annotation::new("d", "Another plain one", Category::Brand, Severity::Enhancement, "p1"),
        ];
        let metrics = assessor().assess(&annotations, &synthesis(0.9, true, 1));
        assert_eq!(metrics.research_validation, 0.5);
    }

    #[test]
    fn test_professional_standard_needs_range_and_score() {
        let strong = synthesis(0.9, true, 3);
        let metrics = assessor().assess(&diverse(18, 130), &strong);
        assert!(metrics.overall_score >= 0.75);
        assert!(metrics.professional_standard);

        // 14 is acceptable but not professional
        let metrics = assessor().assess(&diverse(14, 130), &strong);
        assert!(!metrics.professional_standard);
        assert!(assessor().passes(&metrics, false));
    }

    #[test]
    fn test_violation_messages() {
        let metrics = assessor().assess(&diverse(10, 20), &synthesis(0.3, false, 1));
        let violations = assessor().violations(&metrics, true);
        assert_eq!(violations[0], "annotation count 10 < minimum 12");
        assert!(violations[1].starts_with("overall quality "));
        assert!(violations[1].ends_with("< 75.0%"));
    }

    #[test]
    fn test_near_threshold_message_states_real_inequality() {
        let metrics = QualityMetrics {
            overall_score: 0.7472,
            annotation_count: 14,
            ..QualityMetrics::empty()
        };
        assert_eq!(
            assessor().violations(&metrics, true),
            vec!["overall quality 74.7% < 75.0%".to_string()]
        );

        // just under the standard threshold
        let metrics = QualityMetrics {
            overall_score: 0.5999,
            annotation_count: 14,
            ..QualityMetrics::empty()
        };
        assert_eq!(
            assessor().violations(&metrics, false),
            vec!["overall quality 59.9% < 60.0%".to_string()]
        );
    }

    #[test]
    fn test_empty_annotations_score_zero_synthesis() {
        let metrics = assessor().assess(&[], &synthesis(0.9, true, 1));
        assert_eq!(metrics.annotation_count, 0);
        assert_eq!(metrics.synthesis_quality, 0.0);
        assert_eq!(metrics.research_validation, 0.0);
    }
}
