//! Business Impact Scorer
//!
//! Deterministic enrichment of accepted annotations with business-impact
//! estimates. Everything is table-driven from `(category, severity)`:
//!
//! - **Conversion lift**: category base range × severity lift multiplier
//! - **Revenue range**: baseline monthly revenue × lift / 100
//! - **Effort**: per-category effort bucket for each severity
//! - **ROI**: `clamp(round(value × value_multiplier − effort_penalty), 1, 10)`
//! - **Priority**: critical if ROI ≥ 8, important if ROI ≥ 5, else enhancement
//!
//! No I/O and no randomness: equal inputs always give equal outputs.

use crate::types::{Annotation, Category, Severity};
use serde::{Deserialize, Serialize};

/// Implementation effort bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    Low,
    Medium,
    High,
}

impl Effort {
    /// Penalty subtracted from business value when computing ROI
    fn penalty(self) -> f64 {
        match self {
            Effort::Low => 0.5,
            Effort::Medium => 1.5,
            Effort::High => 3.0,
        }
    }
}

/// Priority bucket derived from ROI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactPriority {
    Critical,
    Important,
    Enhancement,
}

/// Business impact estimate attached to an annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessImpact {
    /// Expected conversion lift range, percent
    pub conversion_lift_min: f64,
    pub conversion_lift_max: f64,
    /// Expected monthly revenue impact range
    pub revenue_min: f64,
    pub revenue_max: f64,
    pub effort: Effort,
    /// 1-10
    pub roi_score: u8,
    pub priority: ImpactPriority,
}

/// Per-category row of the lookup table
struct CategoryProfile {
    /// Conversion lift range (percent) for a `suggested` finding
    lift: (f64, f64),
    /// Business value on a 1-10 scale for a `critical` finding
    value: f64,
    /// Effort for critical / suggested / enhancement findings
    effort: [Effort; 3],
}

fn category_profile(category: Category) -> CategoryProfile {
    match category {
        Category::Conversion => CategoryProfile {
            lift: (5.0, 15.0),
            value: 10.0,
            effort: [Effort::Medium, Effort::Medium, Effort::Low],
        },
        Category::Accessibility => CategoryProfile {
            lift: (2.0, 8.0),
            value: 9.0,
            effort: [Effort::Medium, Effort::Low, Effort::Low],
        },
        Category::Ux => CategoryProfile {
            lift: (3.0, 10.0),
            value: 8.0,
            effort: [Effort::High, Effort::Medium, Effort::Low],
        },
        Category::Brand => CategoryProfile {
            lift: (1.0, 4.0),
            value: 6.0,
            effort: [Effort::High, Effort::Medium, Effort::Medium],
        },
        Category::Visual => CategoryProfile {
            lift: (1.0, 5.0),
            value: 5.0,
            effort: [Effort::Medium, Effort::Low, Effort::Low],
        },
    }
}

/// (lift multiplier, value multiplier, effort column)
fn severity_factors(severity: Severity) -> (f64, f64, usize) {
    match severity {
        Severity::Critical => (1.5, 1.0, 0),
        Severity::Suggested => (1.0, 0.8, 1),
        Severity::Enhancement => (0.5, 0.6, 2),
    }
}

/// Table-driven business impact scorer
#[derive(Debug, Clone)]
pub struct BusinessImpactScorer {
    baseline_monthly_revenue: f64,
}

impl BusinessImpactScorer {
    pub fn new(baseline_monthly_revenue: f64) -> Self {
        Self {
            baseline_monthly_revenue,
        }
    }

    /// Impact metrics for a `(category, severity)` pair
    pub fn score(&self, category: Category, severity: Severity) -> BusinessImpact {
        let profile = category_profile(category);
        let (lift_multiplier, value_multiplier, effort_column) = severity_factors(severity);

        let conversion_lift_min = round2(profile.lift.0 * lift_multiplier);
        let conversion_lift_max = round2(profile.lift.1 * lift_multiplier);
        let effort = profile.effort[effort_column];

        let business_value = profile.value * value_multiplier;
        let roi = (business_value - effort.penalty()).round().clamp(1.0, 10.0);
        let roi_score = roi as u8;

        let priority = if roi_score >= 8 {
            ImpactPriority::Critical
        } else if roi_score >= 5 {
            ImpactPriority::Important
        } else {
            ImpactPriority::Enhancement
        };

        BusinessImpact {
            conversion_lift_min,
            conversion_lift_max,
            revenue_min: round2(self.baseline_monthly_revenue * conversion_lift_min / 100.0),
            revenue_max: round2(self.baseline_monthly_revenue * conversion_lift_max / 100.0),
            effort,
            roi_score,
            priority,
        }
    }

    /// New annotation records carrying impact metadata
    pub fn enrich(&self, annotations: &[Annotation]) -> Vec<Annotation> {
        annotations
            .iter()
            .map(|a| a.with_business_impact(self.score(a.category, a.severity)))
            .collect()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> BusinessImpactScorer {
        BusinessImpactScorer::new(100_000.0)
    }

    #[test]
    fn test_critical_conversion_is_top_priority() {
        let impact = scorer().score(Category::Conversion, Severity::Critical);
        // 10 × 1.0 − 1.5 = 8.5 → 9
        assert_eq!(impact.roi_score, 9);
        assert_eq!(impact.priority, ImpactPriority::Critical);
        assert_eq!(impact.effort, Effort::Medium);
        assert_eq!(impact.conversion_lift_min, 7.5);
        assert_eq!(impact.conversion_lift_max, 22.5);
        assert_eq!(impact.revenue_min, 7_500.0);
        assert_eq!(impact.revenue_max, 22_500.0);
    }

    #[test]
    fn test_visual_enhancement_is_low_priority() {
        let impact = scorer().score(Category::Visual, Severity::Enhancement);
        // 5 × 0.6 − 0.5 = 2.5 → 3
        assert_eq!(impact.roi_score, 3);
        assert_eq!(impact.priority, ImpactPriority::Enhancement);
    }

    #[test]
    fn test_roi_always_within_range() {
        let scorer = scorer();
        for category in Category::ALL {
            for severity in Severity::ALL {
                let impact = scorer.score(category, severity);
                assert!((1..=10).contains(&impact.roi_score));
                assert!(impact.conversion_lift_min <= impact.conversion_lift_max);
                assert!(impact.revenue_min <= impact.revenue_max);
            }
        }
    }

    #[test]
    fn test_scoring_is_reproducible() {
        let scorer = scorer();
        let a = scorer.score(Category::Ux, Severity::Suggested);
        let b = scorer.score(Category::Ux, Severity::Suggested);
        assert_eq!(a, b);
        // 8 × 0.8 − 1.5 = 4.9 → 5
        assert_eq!(a.roi_score, 5);
        assert_eq!(a.priority, ImpactPriority::Important);
    }

    #[test]
    fn test_enrich_leaves_originals_untouched() {
        let original = vec![Annotation::new(
            "a1",
            "Checkout button hidden below the fold",
            Category::Conversion,
            Severity::Critical,
            "claude",
        )];
        let enriched = scorer().enrich(&original);
        assert!(original[0].business_impact.is_none());
        assert!(enriched[0].business_impact.is_some());
        assert_eq!(enriched[0].id, original[0].id);
    }
}
