//! HTTP adapters for the external collaborators
//!
//! - `HttpAnalysisProvider`: vision/LLM provider behind a JSON endpoint
//! - `HttpKnowledgeRetriever`: knowledge-base similarity search endpoint
//! - `HttpResearchClient`: per-annotation research lookup endpoint
//!
//! Each client owns a `reqwest::Client` with the configured timeout and a
//! `RequestPacer` spacing calls by the configured `rate_limit_ms`. Every
//! response body goes through strict validation before anything reaches the
//! pipeline.

use crate::config::{EndpointSettings, ProviderSettings};
use crate::providers::adapter;
use crate::types::{
    AnalysisProvider, Annotation, KnowledgeCandidate, KnowledgeRetriever, ProviderError,
    ProviderOutput, ProviderRequest, ResearchSource, RetrievalError, RetrievalFilters,
};
use crate::validators::context_validator::format_for_prompt;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use uxc_common::{Error, Result};

const USER_AGENT: &str = "uxc-analysis/0.1.0";

/// Spaces calls to one endpoint at least `interval` apart
///
/// Each caller reserves the next free slot under the lock and sleeps outside
/// it, so concurrent research lookups are released in arrival order.
struct RequestPacer {
    client: String,
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RequestPacer {
    fn new(client: impl Into<String>, interval_ms: u64) -> Self {
        Self {
            client: client.into(),
            interval: Duration::from_millis(interval_ms),
            next_slot: Mutex::new(None),
        }
    }

    /// Wait for this caller's slot; returns the delay applied
    async fn pace(&self) -> Duration {
        if self.interval.is_zero() {
            return Duration::ZERO;
        }

        let now = Instant::now();
        let slot = {
            let mut next_slot = self.next_slot.lock().await;
            let slot = match *next_slot {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next_slot = Some(slot + self.interval);
            slot
        };

        let delay = slot.saturating_duration_since(now);
        if !delay.is_zero() {
            debug!(client = %self.client, delay_ms = delay.as_millis() as u64, "Pacing request");
            tokio::time::sleep_until(slot).await;
        }
        delay
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Read an API key from the named environment variable
fn resolve_api_key(api_key_env: Option<&str>) -> Result<Option<String>> {
    match api_key_env {
        Some(var) => match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => Ok(Some(key)),
            _ => Err(Error::Config(format!("API key variable {} is not set", var))),
        },
        None => Ok(None),
    }
}

fn with_auth(
    builder: reqwest::RequestBuilder,
    api_key: Option<&String>,
) -> reqwest::RequestBuilder {
    match api_key {
        Some(key) => builder.bearer_auth(key),
        None => builder,
    }
}

/// Map a transport error onto the provider error taxonomy
fn provider_transport_error(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout)
    } else if err.is_connect() {
        ProviderError::Unavailable(err.to_string())
    } else {
        ProviderError::Request(err.to_string())
    }
}

fn provider_status_error(status: StatusCode, body: String) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
        ProviderError::Unavailable(format!("{}: {}", status, body))
    } else {
        ProviderError::Request(format!("API error {}: {}", status.as_u16(), body))
    }
}

// ============================================================================
// Analysis Provider
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeBody<'a> {
    request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    images: &'a [crate::types::ImageRef],
    prompt: &'a str,
    #[serde(skip_serializing_if = "String::is_empty")]
    context: String,
}

/// Analysis provider behind a JSON HTTP endpoint
pub struct HttpAnalysisProvider {
    id: String,
    endpoint: String,
    model: Option<String>,
    api_key: Option<String>,
    timeout: Duration,
    http_client: reqwest::Client,
    pacer: RequestPacer,
}

impl HttpAnalysisProvider {
    /// Build from a provider table entry; requires `endpoint`
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self> {
        let endpoint = settings.endpoint.clone().ok_or_else(|| {
            Error::Config(format!("provider {} has no endpoint", settings.id))
        })?;

        Ok(Self {
            id: settings.id.clone(),
            endpoint,
            model: settings.model.clone(),
            api_key: resolve_api_key(settings.api_key_env.as_deref())?,
            timeout: settings.timeout(),
            http_client: build_client(settings.timeout())?,
            pacer: RequestPacer::new(settings.id.as_str(), settings.rate_limit_ms),
        })
    }
}

#[async_trait]
impl AnalysisProvider for HttpAnalysisProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn analyze(
        &self,
        request: &ProviderRequest<'_>,
    ) -> std::result::Result<ProviderOutput, ProviderError> {
        self.pacer.pace().await;

        let body = AnalyzeBody {
            request_id: request.request_id.to_string(),
            model: self.model.as_deref(),
            images: request.images,
            prompt: request.prompt,
            context: format_for_prompt(request.context),
        };

        debug!(
            provider = %self.id,
            endpoint = %self.endpoint,
            images = request.images.len(),
            context_entries = request.context.len(),
            "Dispatching analysis request"
        );

        let response = with_auth(self.http_client.post(&self.endpoint), self.api_key.as_ref())
            .json(&body)
            .send()
            .await
            .map_err(|e| provider_transport_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(provider_status_error(status, error_text));
        }

        let text = response
            .text()
            .await
            .map_err(|e| provider_transport_error(e, self.timeout))?;

        adapter::parse_payload(&self.id, &text, request.images.len())
    }
}

// ============================================================================
// Knowledge Retriever
// ============================================================================

#[derive(Serialize)]
struct RetrieveBody<'a> {
    query: &'a str,
    filters: &'a RetrievalFilters,
}

#[derive(Deserialize)]
struct RetrieveResponse {
    candidates: Vec<KnowledgeCandidate>,
}

/// Knowledge retrieval behind a JSON HTTP endpoint
pub struct HttpKnowledgeRetriever {
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
    http_client: reqwest::Client,
    pacer: RequestPacer,
}

impl HttpKnowledgeRetriever {
    pub fn from_settings(settings: &EndpointSettings) -> Result<Self> {
        let timeout = Duration::from_secs(settings.timeout_secs);
        Ok(Self {
            endpoint: settings.endpoint.clone(),
            api_key: resolve_api_key(settings.api_key_env.as_deref())?,
            timeout,
            http_client: build_client(timeout)?,
            pacer: RequestPacer::new("knowledge-retrieval", settings.rate_limit_ms),
        })
    }
}

#[async_trait]
impl KnowledgeRetriever for HttpKnowledgeRetriever {
    async fn retrieve(
        &self,
        query: &str,
        filters: &RetrievalFilters,
    ) -> std::result::Result<Vec<KnowledgeCandidate>, RetrievalError> {
        self.pacer.pace().await;

        let response = with_auth(self.http_client.post(&self.endpoint), self.api_key.as_ref())
            .json(&RetrieveBody { query, filters })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RetrievalError::Timeout(self.timeout)
                } else {
                    RetrievalError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Request(format!(
                "API error {}: {}",
                status.as_u16(),
                error_text
            )));
        }

        let parsed: RetrieveResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Malformed(e.to_string()))?;

        sanitize_candidates(parsed.candidates)
    }
}

/// Reject non-finite similarities, clamp the rest, order by similarity descending
fn sanitize_candidates(
    candidates: Vec<KnowledgeCandidate>,
) -> std::result::Result<Vec<KnowledgeCandidate>, RetrievalError> {
    let mut sanitized = Vec::with_capacity(candidates.len());
    for mut candidate in candidates {
        if !candidate.similarity.is_finite() {
            return Err(RetrievalError::Malformed(format!(
                "candidate {} has non-finite similarity",
                candidate.id
            )));
        }
        candidate.similarity = candidate.similarity.clamp(0.0, 1.0);
        sanitized.push(candidate);
    }
    sanitized.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    Ok(sanitized)
}

// ============================================================================
// Research Client
// ============================================================================

#[derive(Serialize)]
struct ResearchBody<'a> {
    annotation: &'a Annotation,
}

#[derive(Deserialize)]
struct ResearchResponse {
    #[serde(default)]
    sources: Vec<String>,
}

/// Research lookup behind a JSON HTTP endpoint
pub struct HttpResearchClient {
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
    http_client: reqwest::Client,
    pacer: RequestPacer,
}

impl HttpResearchClient {
    pub fn from_settings(settings: &EndpointSettings) -> Result<Self> {
        let timeout = Duration::from_secs(settings.timeout_secs);
        Ok(Self {
            endpoint: settings.endpoint.clone(),
            api_key: resolve_api_key(settings.api_key_env.as_deref())?,
            timeout,
            http_client: build_client(timeout)?,
            pacer: RequestPacer::new("research", settings.rate_limit_ms),
        })
    }
}

#[async_trait]
impl ResearchSource for HttpResearchClient {
    fn name(&self) -> &str {
        "http-research"
    }

    async fn research(
        &self,
        annotation: &Annotation,
    ) -> std::result::Result<Vec<String>, ProviderError> {
        self.pacer.pace().await;

        let response = with_auth(self.http_client.post(&self.endpoint), self.api_key.as_ref())
            .json(&ResearchBody { annotation })
            .send()
            .await
            .map_err(|e| provider_transport_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(provider_status_error(status, error_text));
        }

        let parsed: ResearchResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        Ok(parsed
            .sources
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }
}
