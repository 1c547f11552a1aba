//! Core Types and Trait Definitions for UXC analysis
//!
//! Defines the value objects that flow through the pipeline and the
//! collaborator traits it depends on:
//! - **AnalysisProvider**: vision/LLM provider producing annotations
//! - **KnowledgeRetriever**: knowledge-base similarity search
//! - **ResearchSource**: per-annotation research lookup
//!
//! Every value type here is immutable once built. Helpers that "change" an
//! annotation return a new record so provenance survives retries.

use crate::impact::BusinessImpact;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Request Types
// ============================================================================

/// Reference to an uploaded screenshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    /// Storage URI or URL of the image
    pub uri: String,
    /// Optional caller-supplied label (e.g. "checkout step 2")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ImageRef {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            label: None,
        }
    }
}

/// Immutable analysis input owned by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    /// Request identifier used for events, logs and cancellation
    #[serde(default = "Uuid::new_v4")]
    pub request_id: Uuid,
    /// Ordered image references
    pub images: Vec<ImageRef>,
    /// Free-text analysis prompt
    pub prompt: String,
}

impl AnalysisRequest {
    pub fn new(images: Vec<ImageRef>, prompt: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            images,
            prompt: prompt.into(),
        }
    }
}

/// Per-run flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOptions {
    /// Retrieve and validate knowledge-base context before dispatch
    pub rag_enabled: bool,
    /// Run the research enhancement stage
    pub research_enabled: bool,
    /// Apply the strict (professional) quality threshold
    pub strict_quality: bool,
}

// ============================================================================
// Annotation Types
// ============================================================================

/// Annotation category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Accessibility,
    Conversion,
    Ux,
    Visual,
    Brand,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Accessibility,
        Category::Conversion,
        Category::Ux,
        Category::Visual,
        Category::Brand,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Accessibility => "accessibility",
            Category::Conversion => "conversion",
            Category::Ux => "ux",
            Category::Visual => "visual",
            Category::Brand => "brand",
        }
    }

    /// Parse a provider-supplied category name (case-insensitive)
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Annotation severity
///
/// Declaration order defines `Ord`: Enhancement < Suggested < Critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Enhancement,
    Suggested,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Critical, Severity::Suggested, Severity::Enhancement];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Suggested => "suggested",
            Severity::Enhancement => "enhancement",
        }
    }

    /// Parse a provider-supplied severity name (case-insensitive)
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Severity::ALL
            .into_iter()
            .find(|s| s.as_str() == normalized)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a finding, in percent of image width/height (0-100)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
}

/// Single UX finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub id: String,
    pub feedback: String,
    pub category: Category,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    /// Index into `AnalysisRequest::images`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_index: Option<usize>,
    #[serde(default)]
    pub research_validated: bool,
    #[serde(default)]
    pub research_sources: Vec<String>,
    /// Provider that produced this finding
    pub provider: String,
    /// Providers whose duplicate finding was merged into this one
    #[serde(default)]
    pub corroborated_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_impact: Option<BusinessImpact>,
}

impl Annotation {
    /// Minimal annotation attributed to `provider`
    pub fn new(
        id: impl Into<String>,
        feedback: impl Into<String>,
        category: Category,
        severity: Severity,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            feedback: feedback.into(),
            category,
            severity,
            coordinates: None,
            image_index: None,
            research_validated: false,
            research_sources: Vec::new(),
            provider: provider.into(),
            corroborated_by: Vec::new(),
            business_impact: None,
        }
    }

    /// Copy positioned at `coordinates`
    pub fn at(&self, x: f64, y: f64) -> Self {
        Self {
            coordinates: Some(Coordinates { x, y }),
            ..self.clone()
        }
    }

    /// Copy marked research-validated, with `sources` appended (deduplicated)
    pub fn with_research(&self, sources: &[String]) -> Self {
        let mut research_sources = self.research_sources.clone();
        for source in sources {
            if !research_sources.contains(source) {
                research_sources.push(source.clone());
            }
        }
        Self {
            research_validated: true,
            research_sources,
            ..self.clone()
        }
    }

    /// Copy carrying business impact metadata
    pub fn with_business_impact(&self, impact: BusinessImpact) -> Self {
        Self {
            business_impact: Some(impact),
            ..self.clone()
        }
    }
}

// ============================================================================
// Knowledge Types
// ============================================================================

/// Knowledge-base entry as returned by the retrieval collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeCandidate {
    pub id: String,
    pub title: String,
    pub content: String,
    pub category: String,
    /// Similarity to the query (0.0-1.0)
    pub similarity: f64,
    /// Industry/context tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    /// Whether the entry applies to visual/screenshot analysis
    #[serde(default)]
    pub image_relevant: bool,
}

/// Knowledge entry that passed relevance, length and image-relevance filtering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedKnowledge {
    pub id: String,
    pub title: String,
    pub content: String,
    pub category: String,
    pub similarity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    /// Content was cut to the configured maximum length
    pub truncated: bool,
}

// ============================================================================
// Synthesis and Quality Types
// ============================================================================

/// Provenance of one dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisMetadata {
    /// Provider whose output led the synthesis
    pub primary_model: String,
    /// Lead provider is the configured preferred provider
    pub preferred_model: bool,
    /// Merged confidence (0.0-1.0)
    pub confidence: f64,
    /// Providers escalated to, in escalation order
    pub fallbacks_triggered: Vec<String>,
    /// Number of providers whose output was merged
    pub providers_used: usize,
    /// Ids of providers whose output was merged, in priority order
    pub contributors: Vec<String>,
}

/// Derived quality metrics; always recomputed, never patched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetrics {
    pub overall_score: f64,
    pub provider_quality: f64,
    pub synthesis_quality: f64,
    pub research_validation: f64,
    pub professional_standard: bool,
    pub annotation_count: usize,
}

impl QualityMetrics {
    /// Metrics for a run that produced nothing
    pub fn empty() -> Self {
        Self {
            overall_score: 0.0,
            provider_quality: 0.0,
            synthesis_quality: 0.0,
            research_validation: 0.0,
            professional_standard: false,
            annotation_count: 0,
        }
    }
}

// ============================================================================
// Provider Contract
// ============================================================================

/// Input handed to every analysis provider
#[derive(Debug, Clone, Copy)]
pub struct ProviderRequest<'a> {
    pub request_id: Uuid,
    pub images: &'a [ImageRef],
    pub prompt: &'a str,
    pub context: &'a [ValidatedKnowledge],
}

/// Validated provider output
#[derive(Debug, Clone)]
pub struct ProviderOutput {
    pub annotations: Vec<Annotation>,
    /// Provider self-reported confidence; untrusted, clamped on use
    pub confidence: f64,
}

/// Provider failure, distinguishable by cause
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// Call exceeded its time budget
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Payload failed schema validation
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Self-reported confidence below the provider's threshold
    #[error("low confidence {confidence:.2} < {threshold:.2}")]
    LowConfidence { confidence: f64, threshold: f64 },

    /// Transport or API error
    #[error("request failed: {0}")]
    Request(String),

    /// Provider not configured or not reachable
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// Vision/LLM provider behind a fixed contract
#[async_trait::async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Provider identifier for provenance tracking
    fn id(&self) -> &str;

    /// Analyze images + prompt + validated context
    async fn analyze(&self, request: &ProviderRequest<'_>) -> Result<ProviderOutput, ProviderError>;
}

// ============================================================================
// Retrieval and Research Contracts
// ============================================================================

/// Filters passed to knowledge retrieval
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalFilters {
    /// Restrict to these categories (empty = all)
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    /// Maximum candidates to return
    pub limit: usize,
}

/// Knowledge retrieval failure
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RetrievalError {
    #[error("retrieval timed out after {0:?}")]
    Timeout(Duration),

    #[error("retrieval request failed: {0}")]
    Request(String),

    #[error("malformed retrieval response: {0}")]
    Malformed(String),
}

/// Knowledge-base similarity search
#[async_trait::async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        filters: &RetrievalFilters,
    ) -> Result<Vec<KnowledgeCandidate>, RetrievalError>;
}

/// Per-annotation research lookup (read-only, order-independent)
#[async_trait::async_trait]
pub trait ResearchSource: Send + Sync {
    fn name(&self) -> &str;

    /// Sources backing the finding; empty when nothing relevant was found
    async fn research(&self, annotation: &Annotation) -> Result<Vec<String>, ProviderError>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Suggested);
        assert!(Severity::Suggested > Severity::Enhancement);
        assert_eq!(
            Severity::Enhancement.max(Severity::Critical),
            Severity::Critical
        );
    }

    #[test]
    fn test_category_parse_is_case_insensitive() {
        assert_eq!(Category::parse(" UX "), Some(Category::Ux));
        assert_eq!(Category::parse("Accessibility"), Some(Category::Accessibility));
        assert_eq!(Category::parse("layout"), None);
    }

    #[test]
    fn test_with_research_returns_new_record() {
        let original =
            Annotation::new("a1", "Low contrast", Category::Visual, Severity::Suggested, "p1");
        let enriched = original.with_research(&["WCAG 2.1 1.4.3".to_string()]);

        assert!(!original.research_validated);
        assert!(original.research_sources.is_empty());
        assert!(enriched.research_validated);
        assert_eq!(enriched.research_sources, vec!["WCAG 2.1 1.4.3".to_string()]);

        let twice = enriched.with_research(&["WCAG 2.1 1.4.3".to_string()]);
        assert_eq!(twice.research_sources.len(), 1);
    }

    #[test]
    fn test_annotation_wire_format() {
        let annotation = Annotation::new(
            "a1",
            "Button too small",
            Category::Accessibility,
            Severity::Critical,
            "p1",
        )
        .at(10.0, 20.0);
        let json = serde_json::to_value(&annotation).unwrap();
        assert_eq!(json["category"], "accessibility");
        assert_eq!(json["severity"], "critical");
        assert_eq!(json["researchValidated"], false);
        assert_eq!(json["coordinates"]["x"], 10.0);
    }

    #[test]
    fn test_request_id_generated_when_absent() {
        let request: AnalysisRequest =
            serde_json::from_str(r#"{"images":[{"uri":"s3://a.png"}],"prompt":"Review checkout"}"#)
                .unwrap();
        assert_ne!(request.request_id, Uuid::nil());
        assert_eq!(request.images[0].uri, "s3://a.png");
    }
}
