//! Bounded recovery
//!
//! After a failed final validation at most two strategies run, in a fixed
//! order:
//! 1. **ForcePrimaryRerun**: only when a fallback provider led; re-dispatch to
//!    the preferred provider alone, without research augmentation
//! 2. **EnhancementOnly**: attach knowledge-source metadata from the run's
//!    validated context to matching annotations; no provider calls
//!
//! A candidate replaces the current result only when its overall score is
//! strictly higher. Recovery never lowers the score.

use crate::types::{Annotation, Category, QualityMetrics, SynthesisMetadata, ValidatedKnowledge};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Title keywords shorter than this are ignored for overlap matching
const MIN_KEYWORD_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryStrategy {
    ForcePrimaryRerun,
    EnhancementOnly,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::ForcePrimaryRerun => "ForcePrimaryRerun",
            RecoveryStrategy::EnhancementOnly => "EnhancementOnly",
        }
    }

    /// Strategies applicable to a result, in execution order
    pub fn plan(preferred_model_led: bool) -> Vec<RecoveryStrategy> {
        let mut strategies = Vec::with_capacity(2);
        if !preferred_model_led {
            strategies.push(RecoveryStrategy::ForcePrimaryRerun);
        }
        strategies.push(RecoveryStrategy::EnhancementOnly);
        strategies
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log entry for one evaluated strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryAttempt {
    pub strategy: RecoveryStrategy,
    pub accepted: bool,
    pub score_before: f64,
    /// Candidate score; absent when no candidate could be produced
    pub score_after: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Scored annotation set competing for acceptance
#[derive(Debug, Clone)]
pub struct ScoredResult {
    pub annotations: Vec<Annotation>,
    pub synthesis: SynthesisMetadata,
    pub quality: QualityMetrics,
}

/// Accept a candidate only when it strictly improves the overall score
pub fn accept_if_improved(current: ScoredResult, candidate: ScoredResult) -> (ScoredResult, bool) {
    if candidate.quality.overall_score > current.quality.overall_score {
        (candidate, true)
    } else {
        (current, false)
    }
}

/// New annotations carrying knowledge-source metadata where context matches
///
/// An entry matches an annotation when its category names the annotation's
/// category, or when a title keyword appears in the feedback.
pub fn enhance_with_knowledge(
    annotations: &[Annotation],
    context: &[ValidatedKnowledge],
) -> Vec<Annotation> {
    if context.is_empty() {
        return annotations.to_vec();
    }

    annotations
        .iter()
        .map(|annotation| {
            let sources: Vec<String> = context
                .iter()
                .filter(|entry| knowledge_matches(entry, annotation))
                .map(|entry| format!("{} ({})", entry.title, entry.id))
                .collect();
            if sources.is_empty() {
                annotation.clone()
            } else {
                annotation.with_research(&sources)
            }
        })
        .collect()
}

fn knowledge_matches(entry: &ValidatedKnowledge, annotation: &Annotation) -> bool {
    if Category::parse(&entry.category) == Some(annotation.category) {
        return true;
    }

    let feedback_words = keywords(&annotation.feedback);
    keywords(&entry.title)
        .iter()
        .any(|word| feedback_words.contains(word))
}

fn keywords(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= MIN_KEYWORD_LEN)
        .map(str::to_string)
        .collect()
}
