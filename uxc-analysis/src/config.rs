//! Configuration for uxc-analysis
//!
//! A single immutable `AnalysisConfig` is loaded once (TOML file or built-in
//! defaults) and passed explicitly to the pipeline. Nothing here is read from
//! global state after startup.

use crate::types::PipelineOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use uxc_common::config::{
    load_toml_config, resolve_config_path, ConfigSource, LoggingConfig, CONFIG_ENV_VAR,
};
use uxc_common::{Error, Result};

/// Config file name looked up in the per-user config directory
pub const CONFIG_FILE_NAME: &str = "uxc-analysis.toml";

/// Tolerance for the provider weight sum check
pub(crate) const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub pipeline: PipelineSettings,
    pub bounds: AnnotationBounds,
    pub quality: QualitySettings,
    pub context: ContextSettings,
    pub merge: MergeSettings,
    pub impact: ImpactSettings,
    /// Provider priority table; the first entry is the preferred provider
    pub providers: Vec<ProviderSettings>,
    pub retrieval: Option<EndpointSettings>,
    pub research: Option<EndpointSettings>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            pipeline: PipelineSettings::default(),
            bounds: AnnotationBounds::default(),
            quality: QualitySettings::default(),
            context: ContextSettings::default(),
            merge: MergeSettings::default(),
            impact: ImpactSettings::default(),
            providers: default_providers(),
            retrieval: None,
            research: None,
        }
    }
}

/// HTTP server bind settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Capacity of the SSE event bus
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5740,
            event_capacity: 256,
        }
    }
}

/// Pipeline-level settings and option defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Minimum trimmed prompt length (chars)
    pub min_prompt_length: usize,
    /// Wall-clock budget for one run
    pub overall_budget_secs: u64,
    /// Fraction of the budget for knowledge retrieval
    pub retrieval_budget_fraction: f64,
    /// Fraction of the budget for provider dispatch
    pub dispatch_budget_fraction: f64,
    /// Fraction of the budget for research enhancement
    pub research_budget_fraction: f64,
    /// Query secondary providers alongside a successful primary
    pub multi_model_synthesis: bool,
    /// Default for `PipelineOptions::rag_enabled`
    pub rag_enabled: bool,
    /// Default for `PipelineOptions::research_enabled`
    pub research_enabled: bool,
    /// Default for `PipelineOptions::strict_quality`
    pub strict_quality: bool,
    /// Maximum knowledge candidates requested from retrieval
    pub retrieval_limit: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            min_prompt_length: 10,
            overall_budget_secs: 120,
            retrieval_budget_fraction: 0.10,
            dispatch_budget_fraction: 0.60,
            research_budget_fraction: 0.20,
            multi_model_synthesis: true,
            rag_enabled: true,
            research_enabled: false,
            strict_quality: false,
            retrieval_limit: 20,
        }
    }
}

impl PipelineSettings {
    pub fn overall_budget(&self) -> Duration {
        Duration::from_secs(self.overall_budget_secs)
    }

    /// Options used when a caller does not specify flags
    pub fn default_options(&self) -> PipelineOptions {
        PipelineOptions {
            rag_enabled: self.rag_enabled,
            research_enabled: self.research_enabled,
            strict_quality: self.strict_quality,
        }
    }
}

/// Target annotation count bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationBounds {
    /// Fewer annotations is an insufficient analysis
    pub minimum: usize,
    /// Lower bound of the professional range
    pub professional: usize,
    /// More annotations is noise; results are truncated to this
    pub maximum: usize,
}

impl Default for AnnotationBounds {
    fn default() -> Self {
        Self {
            minimum: 12,
            professional: 16,
            maximum: 24,
        }
    }
}

/// Quality scoring thresholds and multipliers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    /// Overall score required without strict quality
    pub standard_threshold: f64,
    /// Overall score required with strict quality, and for the professional standard
    pub strict_threshold: f64,
    /// Provider quality multiplier when the preferred provider led
    pub preferred_boost: f64,
    /// Provider quality multiplier when a fallback led
    pub fallback_penalty: f64,
    /// Feedback length (chars) that earns the full length score
    pub target_feedback_length: usize,
    /// Synthesis bonus when more than one provider contributed
    pub multi_provider_bonus: f64,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            standard_threshold: 0.60,
            strict_threshold: 0.75,
            preferred_boost: 1.1,
            fallback_penalty: 0.8,
            target_feedback_length: 120,
            multi_provider_bonus: 0.10,
        }
    }
}

impl QualitySettings {
    /// Overall score threshold for the requested strictness
    pub fn threshold(&self, strict: bool) -> f64 {
        if strict {
            self.strict_threshold
        } else {
            self.standard_threshold
        }
    }
}

/// Knowledge context filtering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    pub relevance_floor: f64,
    pub max_content_length: usize,
    pub max_entries: usize,
    pub require_image_relevance: bool,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            relevance_floor: 0.75,
            max_content_length: 600,
            max_entries: 8,
            require_image_relevance: false,
        }
    }
}

/// Duplicate detection during synthesis
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeSettings {
    /// Max |dx| and |dy| (percent units) for a positional match
    pub position_tolerance: f64,
    /// Text similarity needed alongside a positional match
    pub positional_text_similarity: f64,
    /// Text similarity that alone marks a duplicate
    pub text_similarity: f64,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            position_tolerance: 5.0,
            positional_text_similarity: 0.35,
            text_similarity: 0.85,
        }
    }
}

/// Business impact enrichment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactSettings {
    pub enabled: bool,
    /// Baseline monthly revenue used for revenue range estimates
    pub baseline_monthly_revenue: f64,
}

impl Default for ImpactSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            baseline_monthly_revenue: 100_000.0,
        }
    }
}

/// One entry of the provider priority table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub id: String,
    /// Synthesis weight; the table must sum to 1.0
    pub weight: f64,
    /// Self-reported confidence below this escalates to the next provider
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Per-call timeout
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
    /// HTTP endpoint (required for the HTTP adapter)
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Model name forwarded to the endpoint
    #[serde(default)]
    pub model: Option<String>,
    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Minimum interval between requests (ms)
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,
}

impl ProviderSettings {
    pub fn new(id: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            weight,
            confidence_threshold: default_confidence_threshold(),
            timeout_secs: default_provider_timeout_secs(),
            endpoint: None,
            model: None,
            api_key_env: None,
            rate_limit_ms: default_rate_limit_ms(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// HTTP endpoint for the retrieval or research collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSettings {
    pub endpoint: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,
}

fn default_confidence_threshold() -> f64 {
    0.6
}

fn default_provider_timeout_secs() -> u64 {
    60
}

fn default_rate_limit_ms() -> u64 {
    100
}

fn default_providers() -> Vec<ProviderSettings> {
    vec![
        ProviderSettings::new("claude", 0.70),
        ProviderSettings::new("gpt-vision", 0.20),
        ProviderSettings::new("gemini", 0.10),
    ]
}

impl AnalysisConfig {
    /// Resolve (CLI → ENV → user file → defaults), load and validate
    ///
    /// Returns the source alongside the config so it can be logged once
    /// tracing is up.
    pub fn load(cli_path: Option<&Path>) -> Result<(Self, ConfigSource)> {
        let source = resolve_config_path(cli_path, CONFIG_ENV_VAR, CONFIG_FILE_NAME)?;
        let config: AnalysisConfig = load_toml_config(&source)?;
        config.validate()?;
        Ok((config, source))
    }

    /// Id of the preferred (first) provider
    pub fn preferred_provider(&self) -> &str {
        self.providers.first().map(|p| p.id.as_str()).unwrap_or("")
    }

    /// Reject inconsistent configuration
    pub fn validate(&self) -> Result<()> {
        if self.providers.is_empty() {
            return Err(Error::Config("at least one provider must be configured".to_string()));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.id.trim().is_empty() {
                return Err(Error::Config("provider id must not be empty".to_string()));
            }
            if !seen.insert(provider.id.as_str()) {
                return Err(Error::Config(format!("duplicate provider id: {}", provider.id)));
            }
            if !(provider.weight > 0.0 && provider.weight <= 1.0) {
                return Err(Error::Config(format!(
                    "provider {} weight {} outside (0, 1]",
                    provider.id, provider.weight
                )));
            }
            check_unit_interval(
                &format!("{} confidence_threshold", provider.id),
                provider.confidence_threshold,
            )?;
        }

        let weight_sum: f64 = self.providers.iter().map(|p| p.weight).sum();
        if (weight_sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(Error::Config(format!(
                "provider weights must sum to 1.0 (got {:.4})",
                weight_sum
            )));
        }

        let b = &self.bounds;
        if b.minimum == 0 || b.minimum > b.professional || b.professional > b.maximum {
            return Err(Error::Config(format!(
                "annotation bounds must satisfy 0 < minimum <= professional <= maximum (got {} / {} / {})",
                b.minimum, b.professional, b.maximum
            )));
        }

        check_unit_interval("standard_threshold", self.quality.standard_threshold)?;
        check_unit_interval("strict_threshold", self.quality.strict_threshold)?;
        check_unit_interval("relevance_floor", self.context.relevance_floor)?;

        let p = &self.pipeline;
        let fractions =
            p.retrieval_budget_fraction + p.dispatch_budget_fraction + p.research_budget_fraction;
        if fractions > 1.0 + WEIGHT_SUM_TOLERANCE {
            return Err(Error::Config(format!(
                "stage budget fractions exceed the overall budget ({:.2})",
                fractions
            )));
        }
        if p.overall_budget_secs == 0 {
            return Err(Error::Config("overall_budget_secs must be positive".to_string()));
        }

        if self.context.max_entries == 0 {
            return Err(Error::Config("context.max_entries must be positive".to_string()));
        }

        Ok(())
    }
}

fn check_unit_interval(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::Config(format!("{} must be within [0, 1] (got {})", name, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AnalysisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.preferred_provider(), "claude");
        assert_eq!(config.bounds.minimum, 12);
        assert_eq!(config.quality.threshold(true), 0.75);
        assert_eq!(config.quality.threshold(false), 0.60);
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut config = AnalysisConfig::default();
        config.providers[2].weight = 0.2;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn test_duplicate_provider_ids_rejected() {
        let mut config = AnalysisConfig::default();
        config.providers[1].id = "claude".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bounds_ordering_enforced() {
        let mut config = AnalysisConfig::default();
        config.bounds = AnnotationBounds {
            minimum: 20,
            professional: 16,
            maximum: 24,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml_provider_table() {
        let toml = r#"
            [bounds]
            minimum = 8
            professional = 10
            maximum = 15

            [[providers]]
            id = "primary"
            weight = 0.75
            endpoint = "http://localhost:9000/analyze"
            api_key_env = "PRIMARY_KEY"

            [[providers]]
            id = "secondary"
            weight = 0.25
            confidence_threshold = 0.5
        "#;
        let config: AnalysisConfig = uxc_common::config::parse_toml(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].confidence_threshold, 0.6);
        assert_eq!(config.providers[1].confidence_threshold, 0.5);
        assert_eq!(config.bounds.maximum, 15);
        // untouched sections keep defaults
        assert_eq!(config.context.max_entries, 8);
        assert_eq!(config.pipeline.overall_budget_secs, 120);
    }

    #[test]
    fn test_load_returns_command_line_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[server]\nport = 6100\n").unwrap();

        let (config, source) = AnalysisConfig::load(Some(&path)).unwrap();
        assert_eq!(config.server.port, 6100);
        assert_eq!(source, ConfigSource::CommandLine(path.clone()));
    }

    #[test]
    fn test_load_rejects_invalid_weights() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let toml = r#"
            [[providers]]
            id = "claude"
            weight = 0.9

            [[providers]]
            id = "gpt-vision"
            weight = 0.9
        "#;
        std::fs::write(&path, toml).unwrap();

        let err = AnalysisConfig::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("must sum to 1.0 (got 1.8000)"));
    }
}
