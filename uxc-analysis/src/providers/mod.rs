//! Analysis provider table
//!
//! The orchestrator works on an ordered, fixed-size list of
//! `WeightedProvider`s. Priority is list order; the first entry is the
//! preferred provider. Escalation iterates the list, never a lookup by name.

pub mod adapter;
pub mod http;

use crate::config::{AnalysisConfig, ProviderSettings, WEIGHT_SUM_TOLERANCE};
use crate::types::{AnalysisProvider, KnowledgeRetriever, ResearchSource};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uxc_common::{Error, Result};

/// Provider plus its declared weight, escalation threshold and call timeout
#[derive(Clone)]
pub struct WeightedProvider {
    pub provider: Arc<dyn AnalysisProvider>,
    /// Synthesis weight (table sums to 1.0)
    pub weight: f64,
    /// Clamped confidence below this escalates to the next provider
    pub confidence_threshold: f64,
    /// Per-call timeout (clipped to the remaining dispatch budget)
    pub timeout: Duration,
}

impl WeightedProvider {
    pub fn new(provider: Arc<dyn AnalysisProvider>, settings: &ProviderSettings) -> Self {
        Self {
            provider,
            weight: settings.weight,
            confidence_threshold: settings.confidence_threshold,
            timeout: settings.timeout(),
        }
    }

    pub fn id(&self) -> &str {
        self.provider.id()
    }
}

impl std::fmt::Debug for WeightedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightedProvider")
            .field("id", &self.id())
            .field("weight", &self.weight)
            .field("confidence_threshold", &self.confidence_threshold)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Reject a provider table the orchestrator cannot weight
///
/// The table must be non-empty with unique ids, every weight in (0, 1], and
/// weights summing to 1.0.
pub fn validate_table(providers: &[WeightedProvider]) -> Result<()> {
    if providers.is_empty() {
        return Err(Error::InvalidInput("provider table is empty".to_string()));
    }

    let mut seen = HashSet::new();
    for entry in providers {
        if !seen.insert(entry.id()) {
            return Err(Error::InvalidInput(format!("duplicate provider id: {}", entry.id())));
        }
        if !(entry.weight > 0.0 && entry.weight <= 1.0) {
            return Err(Error::InvalidInput(format!(
                "provider {} weight {} outside (0, 1]",
                entry.id(),
                entry.weight
            )));
        }
    }

    let weight_sum: f64 = providers.iter().map(|p| p.weight).sum();
    if (weight_sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(Error::InvalidInput(format!(
            "provider weights must sum to 1.0 (got {:.4})",
            weight_sum
        )));
    }
    Ok(())
}

/// Check that `providers` lists exactly the configured ids, in order
pub fn check_matches_config(providers: &[WeightedProvider], config: &AnalysisConfig) -> Result<()> {
    let table: Vec<&str> = providers.iter().map(|p| p.id()).collect();
    let configured: Vec<&str> = config.providers.iter().map(|p| p.id.as_str()).collect();
    if table != configured {
        return Err(Error::InvalidInput(format!(
            "provider table [{}] does not match configured providers [{}]",
            table.join(", "),
            configured.join(", ")
        )));
    }
    Ok(())
}

/// HTTP-backed provider table in configured priority order
pub fn build_providers(config: &AnalysisConfig) -> Result<Vec<WeightedProvider>> {
    let mut providers = Vec::with_capacity(config.providers.len());
    for settings in &config.providers {
        let client = http::HttpAnalysisProvider::from_settings(settings)?;
        info!(
            provider = %settings.id,
            weight = settings.weight,
            threshold = settings.confidence_threshold,
            "Registered analysis provider"
        );
        providers.push(WeightedProvider::new(Arc::new(client), settings));
    }
    Ok(providers)
}

/// HTTP knowledge retriever, when `[retrieval]` is configured
pub fn build_retriever(config: &AnalysisConfig) -> Result<Option<Arc<dyn KnowledgeRetriever>>> {
    match &config.retrieval {
        Some(settings) => {
            let retriever = http::HttpKnowledgeRetriever::from_settings(settings)?;
            info!(endpoint = %settings.endpoint, "Knowledge retrieval enabled");
            Ok(Some(Arc::new(retriever)))
        }
        None => Ok(None),
    }
}

/// HTTP research client, when `[research]` is configured
pub fn build_research(config: &AnalysisConfig) -> Result<Option<Arc<dyn ResearchSource>>> {
    match &config.research {
        Some(settings) => {
            let client = http::HttpResearchClient::from_settings(settings)?;
            info!(endpoint = %settings.endpoint, "Research enhancement enabled");
            Ok(Some(Arc::new(client)))
        }
        None => Ok(None),
    }
}

// ============================================================================
// Mock Provider for Testing
// ============================================================================


// ============================================================================
// Tests
// ============================================================================
