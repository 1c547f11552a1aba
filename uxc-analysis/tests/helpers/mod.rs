//! Shared fixtures for uxc-analysis integration tests
//!
//! Scripted providers and retrievers standing in for the HTTP adapters.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uxc_analysis::config::{AnalysisConfig, ProviderSettings};
use uxc_analysis::providers::WeightedProvider;
use uxc_analysis::types::{
    AnalysisProvider, AnalysisRequest, Annotation, Category, ImageRef, KnowledgeCandidate,
    KnowledgeRetriever, ProviderError, ProviderOutput, ProviderRequest, RetrievalError,
    RetrievalFilters, Severity,
};

/// Distinct findings; none of them merge with another
pub const FINDINGS: [&str; 24] = [
    "Primary call to action sits below the fold on common laptop viewports, so most visitors never reach the checkout entry point",
    "Body copy contrast against the pale grey panel is roughly three to one, which fails the minimum ratio for normal sized text",
    "Navigation labels mix verbs and nouns, making the information scent inconsistent while people scan the header menu",
    "The hero illustration competes with the headline for attention because both use the same saturated orange accent colour",
    "Logo lockup is stretched horizontally at the mobile breakpoint and no longer matches the published brand guidelines",
    "Form fields lack persistent labels; placeholders vanish on focus and users forget what each input was asking them for",
    "The pricing table hides the annual discount behind a toggle, weakening the strongest incentive to upgrade immediately",
    "An error banner appears at the very top of a long page, far away from the field that actually triggered the problem",
    "Icon-only buttons in the editor toolbar have no accessible names, leaving screen reader users with unlabeled controls",
    "Inconsistent corner radii between cards and modal dialogs make the interface feel assembled from unrelated design kits",
    "Testimonials rely on generic stock photography, which undercuts credibility compared with named customers and logos",
    "Spacing rhythm collapses in the footer where groups of links are crammed together without any vertical separation",
    "Keyboard focus disappears after closing the cookie dialog, so tabbing users lose their place somewhere in the document",
    "Shipping costs only appear on the final review step, a late surprise that commonly causes carts to be abandoned",
    "Breadcrumbs are missing on deep category pages, leaving shoppers unsure how to climb back to the broader listing",
    "Product thumbnails use three different aspect ratios on one grid, creating a ragged and visually noisy gallery row",
    "Tone of voice swings between playful jokes and stiff legal phrasing across adjacent sections of the onboarding flow",
    "Touch targets in the mobile filter drawer measure about thirty pixels, smaller than fingertips can hit reliably",
    "The newsletter modal interrupts people within two seconds of landing, before they have seen any reason to subscribe",
    "Search returns an empty page for misspelled queries instead of offering corrections or popular alternative products",
    "Heading weights barely differ from paragraph text, so the hierarchy of each section is hard to perceive at a glance",
    "Secondary buttons use the brand teal at full saturation and visually outrank the primary purchase button beside them",
    "Animated carousel slides advance every three seconds with no pause control, which is distracting and hard to read",
    "Favicon and social preview image still show the retired wordmark instead of the refreshed company identity",
];

/// Annotation `index` of a scripted output starting at `offset` in `FINDINGS`
pub fn finding(provider: &str, index: usize, offset: usize) -> Annotation {
    let position = offset + index;
    Annotation::new(
        format!("{}-{}", provider, index + 1),
        FINDINGS[position % FINDINGS.len()],
        Category::ALL[position % Category::ALL.len()],
        Severity::ALL[position % Severity::ALL.len()],
        provider,
    )
}

pub fn findings(provider: &str, count: usize, offset: usize) -> Vec<Annotation> {
    (0..count).map(|i| finding(provider, i, offset)).collect()
}

/// Scripted provider behavior
#[derive(Debug, Clone)]
pub enum Script {
    Respond {
        annotations: Vec<Annotation>,
        confidence: f64,
    },
    Fail(ProviderError),
    /// Never answers
    Hang,
}

/// Provider returning scripted output and counting calls
pub struct ScriptedProvider {
    id: String,
    script: Script,
    calls: AtomicUsize,
    last_context: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(id: &str, script: Script) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            script,
            calls: AtomicUsize::new(0),
            last_context: AtomicUsize::new(0),
        })
    }

    /// Provider answering with `count` findings from `offset`
    pub fn responding(id: &str, count: usize, offset: usize, confidence: f64) -> Arc<Self> {
        Self::new(
            id,
            Script::Respond {
                annotations: findings(id, count, offset),
                confidence,
            },
        )
    }

    pub fn failing(id: &str) -> Arc<Self> {
        Self::new(id, Script::Fail(ProviderError::Request("connection reset".to_string())))
    }

    pub fn hanging(id: &str) -> Arc<Self> {
        Self::new(id, Script::Hang)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Validated context entries seen by the most recent call
    pub fn last_context_len(&self) -> usize {
        self.last_context.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisProvider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn analyze(
        &self,
        request: &ProviderRequest<'_>,
    ) -> Result<ProviderOutput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_context.store(request.context.len(), Ordering::SeqCst);

        match &self.script {
            Script::Respond {
                annotations,
                confidence,
            } => Ok(ProviderOutput {
                annotations: annotations.clone(),
                confidence: *confidence,
            }),
            Script::Fail(error) => Err(error.clone()),
            Script::Hang => {
                std::future::pending::<()>().await;
                Err(ProviderError::Unavailable("unreachable".to_string()))
            }
        }
    }
}

/// Retriever returning a fixed candidate list
pub struct StaticRetriever {
    pub candidates: Vec<KnowledgeCandidate>,
}

#[async_trait]
impl KnowledgeRetriever for StaticRetriever {
    async fn retrieve(
        &self,
        _query: &str,
        _filters: &RetrievalFilters,
    ) -> Result<Vec<KnowledgeCandidate>, RetrievalError> {
        Ok(self.candidates.clone())
    }
}

/// Retriever whose search always fails
pub struct FailingRetriever;

#[async_trait]
impl KnowledgeRetriever for FailingRetriever {
    async fn retrieve(
        &self,
        _query: &str,
        _filters: &RetrievalFilters,
    ) -> Result<Vec<KnowledgeCandidate>, RetrievalError> {
        Err(RetrievalError::Request("knowledge index offline".to_string()))
    }
}

/// Retriever that never answers
pub struct HangingRetriever;

#[async_trait]
impl KnowledgeRetriever for HangingRetriever {
    async fn retrieve(
        &self,
        _query: &str,
        _filters: &RetrievalFilters,
    ) -> Result<Vec<KnowledgeCandidate>, RetrievalError> {
        std::future::pending::<()>().await;
        Ok(Vec::new())
    }
}

pub fn candidate(index: usize, similarity: f64) -> KnowledgeCandidate {
    KnowledgeCandidate {
        id: format!("kb-{}", index),
        title: format!("Guideline {}", index),
        content: format!("Guidance entry {} about checkout usability and visual hierarchy.", index),
        category: Category::ALL[index % Category::ALL.len()].as_str().to_string(),
        similarity,
        industry: None,
        image_relevant: true,
    }
}

/// Provider table entry with a short per-call timeout
pub fn weighted(
    provider: Arc<ScriptedProvider>,
    weight: f64,
    timeout: Duration,
) -> WeightedProvider {
    let settings = ProviderSettings::new(provider.id(), weight);
    let mut weighted = WeightedProvider::new(provider, &settings);
    weighted.timeout = timeout;
    weighted
}

/// Default configuration with the given provider ids and weights
pub fn config_for(providers: &[(&str, f64)]) -> AnalysisConfig {
    let mut config = AnalysisConfig::default();
    config.providers = providers
        .iter()
        .map(|(id, weight)| ProviderSettings::new(*id, *weight))
        .collect();
    config
}

pub fn checkout_request() -> AnalysisRequest {
    AnalysisRequest::new(
        vec![
            ImageRef::new("s3://shots/checkout-1.png"),
            ImageRef::new("s3://shots/checkout-2.png"),
        ],
        "Critique the checkout flow for conversion and accessibility issues",
    )
}
