//! Pipeline Controller
//!
//! Runs one analysis request through the named stages in strict order and
//! applies the professional-quality gate.
//!
//! # Architecture
//! - **KnowledgeRetrieval**: retriever → ContextValidator (optional)
//! - **ModelDispatch**: ModelOrchestrator with the validated context
//! - **QualityAssessment**: QualityAssessor over the merged annotations
//! - **ResearchEnhancement**: concurrent research lookups (optional)
//! - **FinalValidation**: truncate to the maximum, recompute, check thresholds
//! - **Recovery**: bounded, improvement-only strategies on failure
//!
//! # Error Handling
//! - Precondition failures return `PipelineError::InvalidRequest` before any
//!   provider call
//! - Retrieval and research failures degrade the run and are recorded as
//!   failed stages; the pipeline continues
//! - Provider failures end the run with `success=false` and an error listing
//!   every provider failure
//! - Cancellation returns `PipelineError::Cancelled`; no partial result
//!
//! # Example
//! ```rust,ignore
//! let controller = PipelineController::new(config, providers, retriever, research)?
//!     .with_events(event_bus);
//! let result = controller
//!     .execute_pipeline(&request, controller.default_options(), &CancellationToken::new())
//!     .await?;
//! ```

use super::recovery::{self, RecoveryAttempt, RecoveryStrategy, ScoredResult};
use super::research::{self, ResearchOutcome};
use super::{PipelineError, PipelineResult, PipelineStage, RunContext, StageStatus};
use crate::config::AnalysisConfig;
use crate::impact::BusinessImpactScorer;
use crate::orchestrator::{ModelOrchestrator, OrchestratorError};
use crate::providers::{check_matches_config, WeightedProvider};
use crate::types::{
    AnalysisRequest, Annotation, KnowledgeRetriever, PipelineOptions, QualityMetrics,
    ResearchSource, RetrievalError, RetrievalFilters, SynthesisMetadata, ValidatedKnowledge,
};
use crate::validators::{ContextReport, ContextValidator, QualityAssessor};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uxc_common::events::{AnalysisEvent, EventBus};

/// Stages that cannot run once dispatch has failed
const POST_DISPATCH_STAGES: [PipelineStage; 4] = [
    PipelineStage::QualityAssessment,
    PipelineStage::ResearchEnhancement,
    PipelineStage::FinalValidation,
    PipelineStage::Recovery,
];

/// Analysis pipeline controller
///
/// Holds one immutable configuration and the collaborators it needs. Safe to
/// share across concurrent runs; every run owns its own `RunContext`.
pub struct PipelineController {
    config: AnalysisConfig,
    orchestrator: ModelOrchestrator,
    assessor: QualityAssessor,
    context_validator: ContextValidator,
    impact_scorer: BusinessImpactScorer,
    retriever: Option<Arc<dyn KnowledgeRetriever>>,
    research: Option<Arc<dyn ResearchSource>>,
    event_bus: Option<EventBus>,
}

impl PipelineController {
    /// Create controller from configuration and collaborators
    ///
    /// `providers` must list the ids of `config.providers` in the same
    /// priority order; the first is the preferred provider.
    ///
    /// # Errors
    /// `Error::InvalidInput` when the table does not match the configuration
    /// or its weights are invalid.
    pub fn new(
        config: AnalysisConfig,
        providers: Vec<WeightedProvider>,
        retriever: Option<Arc<dyn KnowledgeRetriever>>,
        research: Option<Arc<dyn ResearchSource>>,
    ) -> uxc_common::Result<Self> {
        check_matches_config(&providers, &config)?;
        let orchestrator = ModelOrchestrator::new(
            providers,
            config.merge.clone(),
            config.pipeline.multi_model_synthesis,
        )?;
        Ok(Self {
            orchestrator,
            assessor: QualityAssessor::new(config.quality.clone(), config.bounds),
            context_validator: ContextValidator::new(config.context.clone()),
            impact_scorer: BusinessImpactScorer::new(config.impact.baseline_monthly_revenue),
            retriever,
            research,
            event_bus: None,
            config,
        })
    }

    /// Attach an event bus for progress reporting
    pub fn with_events(mut self, event_bus: EventBus) -> Self {
        self.orchestrator = self.orchestrator.with_events(event_bus.clone());
        self.event_bus = Some(event_bus);
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Options used when the caller does not specify flags
    pub fn default_options(&self) -> PipelineOptions {
        self.config.pipeline.default_options()
    }

    pub fn provider_count(&self) -> usize {
        self.orchestrator.provider_count()
    }

    /// Run the full pipeline for `request`
    ///
    /// # Returns
    /// * `Ok(PipelineResult)` for every run that reached a verdict, passing or not
    /// * `Err(PipelineError::InvalidRequest)` when preconditions fail
    /// * `Err(PipelineError::Cancelled)` when `cancel` fires
    pub async fn execute_pipeline(
        &self,
        request: &AnalysisRequest,
        options: PipelineOptions,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult, PipelineError> {
        self.check_preconditions(request)?;

        let mut run = RunContext::new(
            request.request_id,
            self.config.pipeline.overall_budget(),
            cancel.clone(),
        );

        info!(
            request_id = %request.request_id,
            images = request.images.len(),
            rag_enabled = options.rag_enabled,
            research_enabled = options.research_enabled,
            strict_quality = options.strict_quality,
            "Pipeline started"
        );
        self.emit(AnalysisEvent::PipelineStarted {
            request_id: request.request_id,
            image_count: request.images.len(),
            timestamp: chrono::Utc::now(),
        });

        match self.run_stages(request, options, &mut run).await {
            Ok(result) => {
                info!(
                    request_id = %request.request_id,
                    success = result.success,
                    overall_score = result.quality.overall_score,
                    annotations = result.annotations.len(),
                    "Pipeline completed"
                );
                self.emit(AnalysisEvent::PipelineCompleted {
                    request_id: request.request_id,
                    success: result.success,
                    overall_score: result.quality.overall_score,
                    annotation_count: result.annotations.len(),
                    timestamp: chrono::Utc::now(),
                });
                Ok(result)
            }
            Err(error) => {
                if let PipelineError::Cancelled { stage } = &error {
                    warn!(request_id = %request.request_id, stage = %stage, "Pipeline cancelled");
                    self.emit(AnalysisEvent::PipelineCancelled {
                        request_id: request.request_id,
                        stage: stage.to_string(),
                        timestamp: chrono::Utc::now(),
                    });
                }
                Err(error)
            }
        }
    }

    fn check_preconditions(&self, request: &AnalysisRequest) -> Result<(), PipelineError> {
        if request.images.is_empty() {
            return Err(PipelineError::InvalidRequest(
                "at least one image is required".to_string(),
            ));
        }

        let prompt_length = request.prompt.trim().chars().count();
        let minimum = self.config.pipeline.min_prompt_length;
        if prompt_length < minimum {
            return Err(PipelineError::InvalidRequest(format!(
                "prompt must be at least {} characters (got {})",
                minimum, prompt_length
            )));
        }

        Ok(())
    }

    async fn run_stages(
        &self,
        request: &AnalysisRequest,
        options: PipelineOptions,
        run: &mut RunContext,
    ) -> Result<PipelineResult, PipelineError> {
        let cancel = run.cancel_token().clone();

        // Stage 1: knowledge retrieval
        let context_report = self.retrieve_context(request, options, run).await?;
        let context: Vec<ValidatedKnowledge> = context_report
            .as_ref()
            .map(|report| report.entries.clone())
            .unwrap_or_default();

        // Stage 2: model dispatch
        let started = run.enter(PipelineStage::ModelDispatch)?;
        let budget = run.stage_budget(self.config.pipeline.dispatch_budget_fraction);
        let outcome = match self
            .orchestrator
            .dispatch(request, &context, false, budget, &cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(OrchestratorError::Cancelled) => return Err(run.cancelled()),
            Err(error) => {
                let message = error.to_string();
                warn!(request_id = %request.request_id, error = %message, "Model dispatch failed");
                self.finish_stage(
                    run,
                    PipelineStage::ModelDispatch,
                    StageStatus::Failed,
                    started,
                    Some(message.clone()),
                );
                for stage in POST_DISPATCH_STAGES {
                    self.skip_stage(run, stage, "no provider output");
                }
                return Ok(PipelineResult {
                    request_id: request.request_id,
                    success: false,
                    annotations: Vec::new(),
                    quality: QualityMetrics::empty(),
                    synthesis: None,
                    processing_stages: run.stages.clone(),
                    recovery: Vec::new(),
                    context: context_report,
                    violations: Vec::new(),
                    error: Some(message),
                });
            }
        };
        run.fallbacks
            .extend(outcome.synthesis.fallbacks_triggered.iter().cloned());
        self.finish_stage(
            run,
            PipelineStage::ModelDispatch,
            StageStatus::Completed,
            started,
            Some(format!(
                "{} annotations from {} provider(s), lead {}",
                outcome.annotations.len(),
                outcome.synthesis.providers_used,
                outcome.synthesis.primary_model
            )),
        );

        // Stage 3: quality assessment
        let started = run.enter(PipelineStage::QualityAssessment)?;
        let mut annotations = outcome.annotations;
        let synthesis = outcome.synthesis;
        let mut quality = self.assessor.assess(&annotations, &synthesis);
        self.finish_stage(
            run,
            PipelineStage::QualityAssessment,
            StageStatus::Completed,
            started,
            Some(format!("overall {:.3}", quality.overall_score)),
        );

        // Stage 4: research enhancement
        let started = run.enter(PipelineStage::ResearchEnhancement)?;
        match (&self.research, options.research_enabled) {
            (Some(source), true) => {
                let budget = run.stage_budget(self.config.pipeline.research_budget_fraction);
                match research::enhance(source.as_ref(), &annotations, budget, &cancel).await {
                    ResearchOutcome::Completed {
                        annotations: enhanced,
                        validated,
                        failed,
                    } => {
                        annotations = enhanced;
                        quality = self.assessor.assess(&annotations, &synthesis);
                        self.finish_stage(
                            run,
                            PipelineStage::ResearchEnhancement,
                            StageStatus::Completed,
                            started,
                            Some(format!(
                                "{} validated, {} lookups failed, overall {:.3}",
                                validated, failed, quality.overall_score
                            )),
                        );
                    }
                    ResearchOutcome::TimedOut(budget) => {
                        warn!(
                            request_id = %request.request_id,
                            budget = ?budget,
                            "Research enhancement timed out"
                        );
                        self.finish_stage(
                            run,
                            PipelineStage::ResearchEnhancement,
                            StageStatus::Failed,
                            started,
                            Some(format!("timed out after {:?}", budget)),
                        );
                    }
                    ResearchOutcome::Cancelled => return Err(run.cancelled()),
                }
            }
            (None, true) => self.skip_stage(
                run,
                PipelineStage::ResearchEnhancement,
                "no research source configured",
            ),
            (_, false) => {
                self.skip_stage(run, PipelineStage::ResearchEnhancement, "research disabled")
            }
        }

        // Stage 5: final validation
        let started = run.enter(PipelineStage::FinalValidation)?;
        let mut current = self.finalize(annotations, synthesis);
        let mut violations = self
            .assessor
            .violations(&current.quality, options.strict_quality);
        self.finish_stage(
            run,
            PipelineStage::FinalValidation,
            if violations.is_empty() {
                StageStatus::Completed
            } else {
                StageStatus::Failed
            },
            started,
            (!violations.is_empty()).then(|| violations.join("; ")),
        );

        // Stage 6: bounded recovery
        let mut attempts = Vec::new();
        if violations.is_empty() {
            self.skip_stage(run, PipelineStage::Recovery, "final validation passed");
        } else {
            let started = run.enter(PipelineStage::Recovery)?;
            let (recovered, recovery_attempts) = self
                .recover(request, &context, options, current, run)
                .await?;
            current = recovered;
            attempts = recovery_attempts;
            violations = self
                .assessor
                .violations(&current.quality, options.strict_quality);
            let accepted = attempts.iter().filter(|a| a.accepted).count();
            self.finish_stage(
                run,
                PipelineStage::Recovery,
                if violations.is_empty() {
                    StageStatus::Completed
                } else {
                    StageStatus::Failed
                },
                started,
                Some(format!("{} attempt(s), {} accepted", attempts.len(), accepted)),
            );
        }

        let success = violations.is_empty();
        let ScoredResult {
            mut annotations,
            mut synthesis,
            quality,
        } = current;

        if success && self.config.impact.enabled {
            annotations = self.impact_scorer.enrich(&annotations);
        }
        synthesis.fallbacks_triggered = run.fallbacks.clone();

        let error = (!success).then(|| format!("quality gate failed: {}", violations.join("; ")));

        Ok(PipelineResult {
            request_id: request.request_id,
            success,
            annotations,
            quality,
            synthesis: Some(synthesis),
            processing_stages: run.stages.clone(),
            recovery: attempts,
            context: context_report,
            violations,
            error,
        })
    }

    /// KnowledgeRetrieval stage; failures degrade to "no context"
    async fn retrieve_context(
        &self,
        request: &AnalysisRequest,
        options: PipelineOptions,
        run: &mut RunContext,
    ) -> Result<Option<ContextReport>, PipelineError> {
        let stage = PipelineStage::KnowledgeRetrieval;
        let started = run.enter(stage)?;

        let retriever = match (&self.retriever, options.rag_enabled) {
            (Some(retriever), true) => retriever,
            (None, true) => {
                self.skip_stage(run, stage, "no knowledge retriever configured");
                return Ok(None);
            }
            (_, false) => {
                self.skip_stage(run, stage, "rag disabled");
                return Ok(None);
            }
        };

        let budget = run.stage_budget(self.config.pipeline.retrieval_budget_fraction);
        let filters = RetrievalFilters {
            categories: Vec::new(),
            industry: None,
            limit: self.config.pipeline.retrieval_limit,
        };
        let cancel = run.cancel_token().clone();

        let search = tokio::time::timeout(budget, retriever.retrieve(&request.prompt, &filters));
        let retrieved = tokio::select! {
            _ = cancel.cancelled() => return Err(run.cancelled()),
            result = search => {
                result.unwrap_or(Err(RetrievalError::Timeout(budget)))
            }
        };

        match retrieved {
            Ok(candidates) => {
                let report = self.context_validator.validate(&candidates);
                debug!(
                    request_id = %request.request_id,
                    candidates = candidates.len(),
                    kept = report.impact.kept,
                    risk = report.impact.hallucination_risk,
                    "Knowledge context validated"
                );
                self.finish_stage(
                    run,
                    stage,
                    StageStatus::Completed,
                    started,
                    Some(format!(
                        "{} of {} candidates kept, risk {:.2}",
                        report.impact.kept,
                        report.impact.total_candidates,
                        report.impact.hallucination_risk
                    )),
                );
                Ok(Some(report))
            }
            Err(error) => {
                warn!(
                    request_id = %request.request_id,
                    error = %error,
                    "Knowledge retrieval failed, continuing without context"
                );
                let detail = Some(error.to_string());
                self.finish_stage(run, stage, StageStatus::Failed, started, detail);
                Ok(None)
            }
        }
    }

    /// Apply recovery strategies in order until one passes or all are spent
    async fn recover(
        &self,
        request: &AnalysisRequest,
        context: &[ValidatedKnowledge],
        options: PipelineOptions,
        mut current: ScoredResult,
        run: &mut RunContext,
    ) -> Result<(ScoredResult, Vec<RecoveryAttempt>), PipelineError> {
        let cancel = run.cancel_token().clone();
        let mut attempts = Vec::new();

        for strategy in RecoveryStrategy::plan(current.synthesis.preferred_model) {
            run.ensure_active()?;
            let score_before = current.quality.overall_score;

            let candidate = match strategy {
                RecoveryStrategy::ForcePrimaryRerun => {
                    match self
                        .orchestrator
                        .dispatch(request, context, true, run.remaining(), &cancel)
                        .await
                    {
                        Ok(outcome) => Ok(self.finalize(outcome.annotations, outcome.synthesis)),
                        Err(OrchestratorError::Cancelled) => return Err(run.cancelled()),
                        Err(error) => Err(error.to_string()),
                    }
                }
                RecoveryStrategy::EnhancementOnly => {
                    let annotations =
                        recovery::enhance_with_knowledge(&current.annotations, context);
                    Ok(self.score(annotations, current.synthesis.clone()))
                }
            };

            let attempt = match candidate {
                Ok(candidate) => {
                    let score_after = candidate.quality.overall_score;
                    let (kept, accepted) = recovery::accept_if_improved(current, candidate);
                    current = kept;
                    RecoveryAttempt {
                        strategy,
                        accepted,
                        score_before,
                        score_after: Some(score_after),
                        detail: (!accepted).then(|| "score did not improve".to_string()),
                    }
                }
                Err(detail) => RecoveryAttempt {
                    strategy,
                    accepted: false,
                    score_before,
                    score_after: None,
                    detail: Some(detail),
                },
            };

            info!(
                request_id = %request.request_id,
                strategy = %strategy,
                accepted = attempt.accepted,
                score_before = attempt.score_before,
                score_after = ?attempt.score_after,
                "Recovery strategy evaluated"
            );
            self.emit(AnalysisEvent::RecoveryAttempted {
                request_id: request.request_id,
                strategy: strategy.to_string(),
                accepted: attempt.accepted,
                score_before: attempt.score_before,
                score_after: attempt.score_after,
            });

            let accepted = attempt.accepted;
            attempts.push(attempt);

            if accepted && self.assessor.passes(&current.quality, options.strict_quality) {
                break;
            }
        }

        Ok((current, attempts))
    }

    /// Truncate to the maximum and score
    fn finalize(&self, annotations: Vec<Annotation>, synthesis: SynthesisMetadata) -> ScoredResult {
        let annotations = truncate_to_maximum(annotations, self.assessor.bounds().maximum);
        self.score(annotations, synthesis)
    }

    fn score(&self, annotations: Vec<Annotation>, synthesis: SynthesisMetadata) -> ScoredResult {
        let quality = self.assessor.assess(&annotations, &synthesis);
        ScoredResult {
            annotations,
            synthesis,
            quality,
        }
    }

    fn finish_stage(
        &self,
        run: &mut RunContext,
        stage: PipelineStage,
        status: StageStatus,
        started: Instant,
        detail: Option<String>,
    ) {
        let request_id = run.request_id;
        let record = run.record(stage, status, started, detail);
        debug!(
            request_id = %request_id,
            stage = %record.stage,
            status = record.status.as_str(),
            duration_ms = record.duration_ms,
            "Stage finished"
        );
        let event = AnalysisEvent::StageCompleted {
            request_id,
            stage: record.stage.to_string(),
            status: record.status.as_str().to_string(),
            duration_ms: record.duration_ms,
        };
        self.emit(event);
    }

    fn skip_stage(&self, run: &mut RunContext, stage: PipelineStage, reason: &str) {
        let detail = Some(reason.to_string());
        self.finish_stage(run, stage, StageStatus::Skipped, Instant::now(), detail);
    }

    fn emit(&self, event: AnalysisEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(event);
        }
    }
}

/// Keep at most `maximum` annotations: the most severe, in original order
pub fn truncate_to_maximum(annotations: Vec<Annotation>, maximum: usize) -> Vec<Annotation> {
    if annotations.len() <= maximum {
        return annotations;
    }

    let mut ranked: Vec<usize> = (0..annotations.len()).collect();
    // stable sort: equal severities keep their relative order
    ranked.sort_by(|&a, &b| annotations[b].severity.cmp(&annotations[a].severity));

    let mut keep = vec![false; annotations.len()];
    for index in ranked.into_iter().take(maximum) {
        keep[index] = true;
    }

    annotations
        .into_iter()
        .zip(keep)
        .filter_map(|(annotation, kept)| kept.then_some(annotation))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;
    use crate::providers::mock::{table, MockBehavior, MockProvider};
    use crate::types::{Category, ImageRef, Severity};
    use std::time::Duration;

    /// Small bounds; configured providers mirror `providers`
    fn config(providers: &[WeightedProvider]) -> AnalysisConfig {
        let mut config = AnalysisConfig::default();
        config.providers = providers
            .iter()
            .map(|p| ProviderSettings::new(p.id(), p.weight))
            .collect();
        config.bounds.minimum = 3;
        config.bounds.professional = 4;
        config.bounds.maximum = 6;
        config
    }

    fn build_controller(providers: Vec<WeightedProvider>) -> PipelineController {
        PipelineController::new(config(&providers), providers, None, None).unwrap()
    }

    fn request() -> AnalysisRequest {
        AnalysisRequest::new(vec![ImageRef::new("s3://shots/cart.png")], "Critique the cart page")
    }

    fn severity_list(severities: &[Severity]) -> Vec<Annotation> {
        severities
            .iter()
            .enumerate()
            .map(|(i, s)| {
                Annotation::new(format!("a{}", i), format!("finding {}", i), Category::Ux, *s, "p1")
            })
            .collect()
    }

    #[test]
    fn test_truncate_keeps_most_severe_in_order() {
        use Severity::*;
        let annotations =
            severity_list(&[Enhancement, Critical, Suggested, Enhancement, Critical, Suggested]);
        let kept = truncate_to_maximum(annotations, 3);
        let ids: Vec<_> = kept.iter().map(|a| a.id.as_str()).collect();
        // both criticals plus the first suggested, original order preserved
        assert_eq!(ids, vec!["a1", "a2", "a4"]);
    }

    #[test]
    fn test_truncate_noop_within_bounds() {
        let annotations = severity_list(&[Severity::Critical, Severity::Enhancement]);
        assert_eq!(truncate_to_maximum(annotations.clone(), 5), annotations);
    }

    #[tokio::test]
    async fn test_precondition_failures() {
        let p1 = Arc::new(MockProvider::succeeding("p1", 5, 0, 0.9));
        let controller = build_controller(table(vec![(p1.clone(), 1.0)]));
        let cancel = CancellationToken::new();

        let no_images = AnalysisRequest::new(vec![], "Critique the cart page");
        let err = controller
            .execute_pipeline(&no_images, PipelineOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::InvalidRequest("at least one image is required".to_string())
        );

        let short_prompt = AnalysisRequest::new(vec![ImageRef::new("s3://a.png")], "   hi    ");
        let err = controller
            .execute_pipeline(&short_prompt, PipelineOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("at least 10 characters (got 2)"));
        assert_eq!(p1.calls(), 0);
    }

    #[tokio::test]
    async fn test_every_stage_recorded() {
        let p1 = Arc::new(MockProvider::succeeding("p1", 5, 0, 0.9));
        let p2 = Arc::new(MockProvider::succeeding("p2", 2, 5, 0.9));
        let controller = build_controller(table(vec![(p1, 0.7), (p2, 0.3)]));

        let result = controller
            .execute_pipeline(&request(), PipelineOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        let stages: Vec<_> = result.processing_stages.iter().map(|s| s.stage).collect();
        assert_eq!(
            stages,
            vec![
                PipelineStage::KnowledgeRetrieval,
                PipelineStage::ModelDispatch,
                PipelineStage::QualityAssessment,
                PipelineStage::ResearchEnhancement,
                PipelineStage::FinalValidation,
                PipelineStage::Recovery,
            ]
        );
        // 7 merged, truncated to the maximum of 6
        assert!(result.success);
        assert_eq!(result.annotations.len(), 6);
        assert!(result.annotations.iter().all(|a| a.business_impact.is_some()));
    }

    #[tokio::test]
    async fn test_all_providers_failed_is_unsuccessful_result() {
        let p1 = Arc::new(MockProvider::failing("p1"));
        let p2 = Arc::new(MockProvider::new(
            "p2",
            MockBehavior::Fail(crate::types::ProviderError::Timeout(Duration::from_secs(1))),
        ));
        let controller = build_controller(table(vec![(p1, 0.7), (p2, 0.3)]));

        let result = controller
            .execute_pipeline(&request(), PipelineOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.synthesis.is_none());
        let error = result.error.unwrap();
        assert!(error.contains("p1: request failed"));
        assert!(error.contains("p2: timed out"));
        assert_eq!(result.processing_stages.len(), 6);
        assert_eq!(result.processing_stages[1].status, StageStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancellation_returns_error_and_event() {
        let p1 = Arc::new(MockProvider::new("p1", MockBehavior::Hang));
        let mut providers = table(vec![(p1, 1.0)]);
        providers[0].timeout = Duration::from_secs(30);
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();
        let controller = Arc::new(build_controller(providers).with_events(bus));

        let cancel = CancellationToken::new();
        let handle = {
            let controller = Arc::clone(&controller);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                controller
                    .execute_pipeline(&request(), PipelineOptions::default(), &cancel)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            PipelineError::Cancelled {
                stage: PipelineStage::ModelDispatch
            }
        );

        let mut saw_cancel = false;
        while let Ok(event) = rx.try_recv() {
            if let AnalysisEvent::PipelineCancelled { stage, .. } = event {
                assert_eq!(stage, "ModelDispatch");
                saw_cancel = true;
            }
        }
        assert!(saw_cancel);
    }

    #[test]
    fn test_table_must_match_configuration() {
        let p1 = Arc::new(MockProvider::succeeding("p1", 5, 0, 0.9));
        let p2 = Arc::new(MockProvider::succeeding("p2", 2, 5, 0.9));
        let configured = table(vec![(p1.clone(), 0.7), (p2.clone(), 0.3)]);

        // table missing a configured provider
        let partial = table(vec![(p1.clone(), 1.0)]);
        let result = PipelineController::new(config(&configured), partial, None, None);
        assert!(result.is_err());

        // configured weights that do not sum to 1.0
        let overweight = table(vec![(p1, 0.9), (p2, 0.9)]);
        let err = PipelineController::new(config(&overweight), overweight, None, None)
            .err()
            .unwrap();
        assert!(err.to_string().contains("must sum to 1.0 (got 1.8000)"));
    }
}
