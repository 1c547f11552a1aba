//! Model orchestrator
//!
//! Dispatches one analysis request across the weighted provider table:
//! 1. **Lead selection**: try providers in priority order until one is usable
//!    (no error, at least one valid annotation, clamped confidence at or above
//!    its threshold). Each miss records the next provider in
//!    `fallbacks_triggered`.
//! 2. **Supporting providers**: providers ranked after the lead run
//!    concurrently under the remaining dispatch budget.
//! 3. **Synthesis**: usable outputs are merged in priority order (see
//!    `merger`).
//!
//! Low confidence alone never fails a dispatch: when nothing is usable but
//! some provider returned valid output, the most confident one leads.
//! Raw provider errors never leave this module; callers only see
//! `OrchestratorError`.

pub mod merger;

use crate::config::MergeSettings;
use crate::providers::{validate_table, WeightedProvider};
use crate::types::{
    AnalysisRequest, Annotation, ProviderError, ProviderOutput, ProviderRequest, SynthesisMetadata,
    ValidatedKnowledge,
};
use futures::future::join_all;
use merger::Contribution;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uxc_common::events::{AnalysisEvent, EventBus};

/// One provider failure, kept for the terminal error message
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: ProviderError,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.error)
    }
}

/// Orchestrator errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OrchestratorError {
    /// No provider produced valid output
    #[error("all providers failed: {}", join_failures(.failures))]
    AllProvidersFailed { failures: Vec<ProviderFailure> },

    /// Cancellation token fired during dispatch
    #[error("dispatch cancelled")]
    Cancelled,
}

fn join_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Merged annotations plus provenance of one dispatch
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub annotations: Vec<Annotation>,
    pub synthesis: SynthesisMetadata,
}

/// Result of a single guarded provider call
enum CallOutcome {
    Output(ProviderOutput),
    Failed(ProviderError),
    Cancelled,
}

/// Weighted multi-provider dispatcher
pub struct ModelOrchestrator {
    providers: Vec<WeightedProvider>,
    merge: MergeSettings,
    multi_model_synthesis: bool,
    event_bus: Option<EventBus>,
}

impl ModelOrchestrator {
    /// Create dispatcher over a validated provider table
    ///
    /// # Errors
    /// `Error::InvalidInput` when the table is empty, has duplicate ids, or its
    /// weights are out of range or do not sum to 1.0.
    pub fn new(
        providers: Vec<WeightedProvider>,
        merge: MergeSettings,
        multi_model_synthesis: bool,
    ) -> uxc_common::Result<Self> {
        validate_table(&providers)?;
        Ok(Self {
            providers,
            merge,
            multi_model_synthesis,
            event_bus: None,
        })
    }

    /// Attach an event bus for `ProviderEscalated` events
    pub fn with_events(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Id of the preferred (first) provider
    pub fn preferred_provider(&self) -> Option<&str> {
        self.providers.first().map(|p| p.id())
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Dispatch `request` with validated `context`
    ///
    /// With `force_primary` only the preferred provider is called and its
    /// failure is terminal for this call.
    pub async fn dispatch(
        &self,
        request: &AnalysisRequest,
        context: &[ValidatedKnowledge],
        force_primary: bool,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, OrchestratorError> {
        let deadline = Instant::now() + budget;
        let provider_request = ProviderRequest {
            request_id: request.request_id,
            images: &request.images,
            prompt: &request.prompt,
            context,
        };

        let candidates = if force_primary {
            &self.providers[..self.providers.len().min(1)]
        } else {
            &self.providers[..]
        };

        let mut fallbacks = Vec::new();
        let mut failures = Vec::new();
        let mut low_confidence: Vec<(usize, ProviderOutput)> = Vec::new();
        let mut lead: Option<(usize, ProviderOutput)> = None;

        for (index, weighted) in candidates.iter().enumerate() {
            let reason = match self.call(weighted, &provider_request, deadline, cancel).await {
                CallOutcome::Cancelled => return Err(OrchestratorError::Cancelled),
                CallOutcome::Output(output)
                    if output.confidence >= weighted.confidence_threshold =>
                {
                    debug!(
                        request_id = %request.request_id,
                        provider = weighted.id(),
                        confidence = output.confidence,
                        annotations = output.annotations.len(),
                        "Provider accepted as lead"
                    );
                    lead = Some((index, output));
                    break;
                }
                CallOutcome::Output(output) => {
                    let error = ProviderError::LowConfidence {
                        confidence: output.confidence,
                        threshold: weighted.confidence_threshold,
                    };
                    low_confidence.push((index, output));
                    error
                }
                CallOutcome::Failed(error) => error,
            };

            warn!(
                request_id = %request.request_id,
                provider = weighted.id(),
                error = %reason,
                "Provider not usable"
            );

            if let Some(next) = candidates.get(index + 1) {
                fallbacks.push(next.id().to_string());
                self.emit(AnalysisEvent::ProviderEscalated {
                    request_id: request.request_id,
                    from_provider: weighted.id().to_string(),
                    to_provider: next.id().to_string(),
                    reason: reason.to_string(),
                });
            }

            failures.push(ProviderFailure {
                provider: weighted.id().to_string(),
                error: reason,
            });
        }

        let tried_all = lead.is_none();
        let (lead_index, lead_output) = match lead {
            Some(found) => found,
            None => match take_most_confident(low_confidence) {
                Some(found) => {
                    info!(
                        request_id = %request.request_id,
                        provider = self.providers[found.0].id(),
                        confidence = found.1.confidence,
                        "No provider met its threshold; using most confident output"
                    );
                    found
                }
                None => return Err(OrchestratorError::AllProvidersFailed { failures }),
            },
        };

        let lead_provider = &self.providers[lead_index];
        let mut contributions = vec![Contribution {
            provider: lead_provider.id().to_string(),
            weight: lead_provider.weight,
            output: lead_output,
        }];

        if self.multi_model_synthesis && !force_primary && !tried_all {
            let supporting = &candidates[lead_index + 1..];
            contributions.extend(
                self.run_supporting(supporting, &provider_request, deadline, cancel)
                    .await?,
            );
        }

        let annotations = merger::merge_contributions(&contributions, &self.merge);
        let synthesis = SynthesisMetadata {
            primary_model: lead_provider.id().to_string(),
            preferred_model: lead_index == 0,
            confidence: merger::merged_confidence(&contributions),
            fallbacks_triggered: fallbacks,
            providers_used: contributions.len(),
            contributors: contributions.iter().map(|c| c.provider.clone()).collect(),
        };

        info!(
            request_id = %request.request_id,
            primary_model = %synthesis.primary_model,
            providers_used = synthesis.providers_used,
            confidence = synthesis.confidence,
            annotations = annotations.len(),
            "Dispatch complete"
        );

        Ok(DispatchOutcome {
            annotations,
            synthesis,
        })
    }

    /// Call supporting providers concurrently; usable outputs in priority order
    async fn run_supporting(
        &self,
        supporting: &[WeightedProvider],
        request: &ProviderRequest<'_>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Vec<Contribution>, OrchestratorError> {
        if supporting.is_empty() {
            return Ok(Vec::new());
        }

        let calls = supporting.iter().map(|weighted| async move {
            (weighted, self.call(weighted, request, deadline, cancel).await)
        });

        let mut contributions = Vec::new();
        for (weighted, outcome) in join_all(calls).await {
            match outcome {
                CallOutcome::Cancelled => return Err(OrchestratorError::Cancelled),
                CallOutcome::Output(output)
                    if output.confidence >= weighted.confidence_threshold =>
                {
                    contributions.push(Contribution {
                        provider: weighted.id().to_string(),
                        weight: weighted.weight,
                        output,
                    });
                }
                CallOutcome::Output(output) => {
                    debug!(
                        request_id = %request.request_id,
                        provider = weighted.id(),
                        confidence = output.confidence,
                        "Supporting provider below threshold, not merged"
                    );
                }
                CallOutcome::Failed(error) => {
                    warn!(
                        request_id = %request.request_id,
                        provider = weighted.id(),
                        error = %error,
                        "Supporting provider failed"
                    );
                }
            }
        }

        Ok(contributions)
    }

    /// One provider call raced against its timeout and the cancellation token
    async fn call(
        &self,
        weighted: &WeightedProvider,
        request: &ProviderRequest<'_>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> CallOutcome {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let limit = weighted.timeout.min(remaining);
        let call = tokio::time::timeout(limit, weighted.provider.analyze(request));

        tokio::select! {
            _ = cancel.cancelled() => CallOutcome::Cancelled,
            result = call => match result {
                Err(_) => CallOutcome::Failed(ProviderError::Timeout(limit)),
                Ok(Err(error)) => CallOutcome::Failed(error),
                Ok(Ok(output)) if output.annotations.is_empty() => {
                    CallOutcome::Failed(ProviderError::Malformed("no annotations".to_string()))
                }
                Ok(Ok(output)) => CallOutcome::Output(ProviderOutput {
                    confidence: sanitize_confidence(output.confidence),
                    annotations: output.annotations,
                }),
            },
        }
    }

    fn emit(&self, event: AnalysisEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(event);
        }
    }
}

/// Clamp untrusted confidence into [0, 1]; NaN counts as zero
fn sanitize_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// Highest-confidence output; earlier (higher-priority) wins ties
fn take_most_confident(outputs: Vec<(usize, ProviderOutput)>) -> Option<(usize, ProviderOutput)> {
    outputs.into_iter().fold(None, |best, candidate| match best {
        Some(current) if current.1.confidence >= candidate.1.confidence => Some(current),
        _ => Some(candidate),
    })
}

// ============================================================================
// Tests
// ============================================================================
