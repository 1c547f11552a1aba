//! Context validator (RAG)
//!
//! Filters retrieved knowledge candidates down to the entries that are safe
//! to inject into a provider prompt:
//! 1. Deduplicate by id (highest similarity wins)
//! 2. Drop entries below the relevance floor
//! 3. Drop entries not flagged image-relevant (when required)
//! 4. Sort by similarity descending, ties by id
//! 5. Cap to `max_entries`, truncate content to `max_content_length` chars
//!
//! The accompanying `ImpactAnalysis` estimates how much the filtering
//! reduced hallucination risk.

use crate::config::ContextSettings;
use crate::types::{KnowledgeCandidate, ValidatedKnowledge};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write;

/// Risk bucket for the retrieved context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// low < 0.2 ≤ medium < 0.4 ≤ high
    pub fn from_risk(risk: f64) -> Self {
        if risk < 0.2 {
            RiskLevel::Low
        } else if risk < 0.4 {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }
}

/// Filtering totals and hallucination risk estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactAnalysis {
    pub total_candidates: usize,
    pub duplicates_removed: usize,
    pub below_relevance: usize,
    pub not_image_relevant: usize,
    /// Relevant entries dropped by the entry cap
    pub capped: usize,
    /// Kept entries whose content was truncated
    pub truncated: usize,
    pub kept: usize,
    /// Mean similarity of kept entries (0 when nothing kept)
    pub average_similarity: f64,
    pub hallucination_risk: f64,
    pub risk_level: RiskLevel,
}

/// Validated entries plus the filtering analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextReport {
    pub entries: Vec<ValidatedKnowledge>,
    pub impact: ImpactAnalysis,
}

/// Knowledge candidate filter
#[derive(Debug, Clone)]
pub struct ContextValidator {
    settings: ContextSettings,
}

impl ContextValidator {
    pub fn new(settings: ContextSettings) -> Self {
        Self { settings }
    }

    /// Filter `candidates` into prompt-safe context
    pub fn validate(&self, candidates: &[KnowledgeCandidate]) -> ContextReport {
        let total_candidates = candidates.len();

        let mut unique: HashMap<&str, &KnowledgeCandidate> = HashMap::new();
        for candidate in candidates {
            unique
                .entry(candidate.id.as_str())
                .and_modify(|existing| {
                    if candidate.similarity > existing.similarity {
                        *existing = candidate;
                    }
                })
                .or_insert(candidate);
        }
        let duplicates_removed = total_candidates - unique.len();

        let mut below_relevance = 0;
        let mut not_image_relevant = 0;
        let mut relevant: Vec<&KnowledgeCandidate> = Vec::with_capacity(unique.len());
        for candidate in unique.into_values() {
            let similarity = candidate.similarity;
            if !similarity.is_finite() || similarity < self.settings.relevance_floor {
                below_relevance += 1;
            } else if self.settings.require_image_relevance && !candidate.image_relevant {
                not_image_relevant += 1;
            } else {
                relevant.push(candidate);
            }
        }

        relevant.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.id.cmp(&b.id))
        });

        let capped = relevant.len().saturating_sub(self.settings.max_entries);
        relevant.truncate(self.settings.max_entries);

        let entries: Vec<ValidatedKnowledge> = relevant
            .into_iter()
            .map(|candidate| self.to_validated(candidate))
            .collect();

        let kept = entries.len();
        let truncated = entries.iter().filter(|e| e.truncated).count();
        let average_similarity = if kept == 0 {
            0.0
        } else {
            entries.iter().map(|e| e.similarity).sum::<f64>() / kept as f64
        };
        let hallucination_risk = if kept == 0 {
            0.0
        } else {
            let filtered = total_candidates - kept;
            0.6 * (1.0 - average_similarity) + 0.4 * (filtered as f64 / total_candidates as f64)
        };

        ContextReport {
            entries,
            impact: ImpactAnalysis {
                total_candidates,
                duplicates_removed,
                below_relevance,
                not_image_relevant,
                capped,
                truncated,
                kept,
                average_similarity,
                hallucination_risk,
                risk_level: RiskLevel::from_risk(hallucination_risk),
            },
        }
    }

    fn to_validated(&self, candidate: &KnowledgeCandidate) -> ValidatedKnowledge {
        let (content, truncated) =
            truncate_chars(&candidate.content, self.settings.max_content_length);
        ValidatedKnowledge {
            id: candidate.id.clone(),
            title: candidate.title.clone(),
            content,
            category: candidate.category.clone(),
            similarity: candidate.similarity,
            industry: candidate.industry.clone(),
            truncated,
        }
    }
}

/// Cut `text` to at most `max_chars` characters on a char boundary
fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => (text[..byte_index].to_string(), true),
        None => (text.to_string(), false),
    }
}

/// Render validated entries as the context block of a provider prompt
///
/// Returns an empty string when there is nothing to inject.
pub fn format_for_prompt(entries: &[ValidatedKnowledge]) -> String {
    if entries.is_empty() {
        return String::new();
    }

    let mut block = String::from("Relevant UX knowledge (validated):\n");
    for (index, entry) in entries.iter().enumerate() {
        let _ = writeln!(
            block,
            "{}. [{}] {} (similarity {:.2})",
            index + 1,
            entry.category,
            entry.title,
            entry.similarity
        );
        if let Some(industry) = &entry.industry {
            let _ = writeln!(block, "   Industry: {}", industry);
        }
        let _ = writeln!(block, "   {}", entry.content);
    }
    block
}
