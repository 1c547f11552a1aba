//! Analysis workflow engine
//!
//! Implements the sequential per-request pipeline as a state machine with
//! named stages:
//! - **KnowledgeRetrieval**: retrieve and validate knowledge-base context
//! - **ModelDispatch**: weighted multi-provider dispatch and synthesis
//! - **QualityAssessment**: score the merged annotation set
//! - **ResearchEnhancement**: optional per-annotation research lookups
//! - **FinalValidation**: enforce annotation bounds and quality thresholds
//! - **Recovery**: bounded, improvement-only retry after a failed validation
//!
//! # Architecture
//! `RunContext` is the only mutable object of a run. It is owned by a single
//! `execute_pipeline` call and carries the stage log, accumulated fallbacks,
//! the overall deadline and the cancellation token. Everything else that
//! flows between stages is an immutable value.

pub mod pipeline;
pub mod recovery;
pub mod research;

use crate::types::{Annotation, QualityMetrics, SynthesisMetadata};
use crate::validators::ContextReport;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// Re-exports for convenience
pub use pipeline::PipelineController;
pub use recovery::{RecoveryAttempt, RecoveryStrategy};

/// Named pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStage {
    KnowledgeRetrieval,
    ModelDispatch,
    QualityAssessment,
    ResearchEnhancement,
    FinalValidation,
    Recovery,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::KnowledgeRetrieval => "KnowledgeRetrieval",
            PipelineStage::ModelDispatch => "ModelDispatch",
            PipelineStage::QualityAssessment => "QualityAssessment",
            PipelineStage::ResearchEnhancement => "ResearchEnhancement",
            PipelineStage::FinalValidation => "FinalValidation",
            PipelineStage::Recovery => "Recovery",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Completed,
    Skipped,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Completed => "completed",
            StageStatus::Skipped => "skipped",
            StageStatus::Failed => "failed",
        }
    }
}

/// Stage log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    pub stage: PipelineStage,
    pub status: StageStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Terminal result of one pipeline run
///
/// `success` implies `minimum <= annotations.len() <= maximum` and an
/// overall score at or above the requested threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub request_id: Uuid,
    pub success: bool,
    pub annotations: Vec<Annotation>,
    pub quality: QualityMetrics,
    /// Absent when no provider produced output
    pub synthesis: Option<SynthesisMetadata>,
    pub processing_stages: Vec<StageRecord>,
    pub recovery: Vec<RecoveryAttempt>,
    pub context: Option<ContextReport>,
    /// Every failing threshold of the final result
    pub violations: Vec<String>,
    pub error: Option<String>,
}

/// Errors that end a run without a result
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    /// Precondition failure; no provider was called
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Cancellation observed; no partial result is returned
    #[error("pipeline cancelled during {stage}")]
    Cancelled { stage: PipelineStage },
}

/// Mutable per-run state
#[derive(Debug)]
pub struct RunContext {
    pub request_id: Uuid,
    pub stages: Vec<StageRecord>,
    /// Provider escalations across every dispatch of this run
    pub fallbacks: Vec<String>,
    current: PipelineStage,
    overall_budget: Duration,
    deadline: Instant,
    cancel: CancellationToken,
}

impl RunContext {
    pub fn new(request_id: Uuid, overall_budget: Duration, cancel: CancellationToken) -> Self {
        Self {
            request_id,
            stages: Vec::new(),
            fallbacks: Vec::new(),
            current: PipelineStage::KnowledgeRetrieval,
            overall_budget,
            deadline: Instant::now() + overall_budget,
            cancel,
        }
    }

    /// Mark `stage` as running; returns its start time
    pub fn enter(&mut self, stage: PipelineStage) -> Result<Instant, PipelineError> {
        self.current = stage;
        self.ensure_active()?;
        Ok(Instant::now())
    }

    pub fn current_stage(&self) -> PipelineStage {
        self.current
    }

    /// Time left before the overall deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// `fraction` of the overall budget, clipped to the remaining time
    pub fn stage_budget(&self, fraction: f64) -> Duration {
        self.overall_budget
            .mul_f64(fraction.clamp(0.0, 1.0))
            .min(self.remaining())
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Error for cancellation observed in the current stage
    pub fn cancelled(&self) -> PipelineError {
        PipelineError::Cancelled {
            stage: self.current,
        }
    }

    /// Fail fast when the caller cancelled
    pub fn ensure_active(&self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            Err(self.cancelled())
        } else {
            Ok(())
        }
    }

    /// Append a stage record
    pub fn record(
        &mut self,
        stage: PipelineStage,
        status: StageStatus,
        started: Instant,
        detail: Option<String>,
    ) -> &StageRecord {
        self.stages.push(StageRecord {
            stage,
            status,
            duration_ms: started.elapsed().as_millis() as u64,
            detail,
        });
        &self.stages[self.stages.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_budget_is_fraction_of_overall() {
        let cancel = CancellationToken::new();
        let run = RunContext::new(Uuid::new_v4(), Duration::from_secs(100), cancel);
        let budget = run.stage_budget(0.6);
        assert!(budget <= Duration::from_secs(60));
        assert!(budget > Duration::from_secs(59));
    }

    #[tokio::test]
    async fn test_stage_budget_clipped_to_remaining() {
        let cancel = CancellationToken::new();
        let run = RunContext::new(Uuid::new_v4(), Duration::from_millis(20), cancel);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(run.stage_budget(0.5), Duration::ZERO);
    }

    #[test]
    fn test_cancellation_reports_current_stage() {
        let cancel = CancellationToken::new();
        let mut run = RunContext::new(Uuid::new_v4(), Duration::from_secs(10), cancel.clone());
        assert!(run.enter(PipelineStage::KnowledgeRetrieval).is_ok());

        cancel.cancel();
        let err = run.enter(PipelineStage::ModelDispatch).unwrap_err();
        assert_eq!(
            err,
            PipelineError::Cancelled {
                stage: PipelineStage::ModelDispatch
            }
        );
        assert_eq!(err.to_string(), "pipeline cancelled during ModelDispatch");
    }

    #[test]
    fn test_stage_record_wire_format() {
        let cancel = CancellationToken::new();
        let mut run = RunContext::new(Uuid::new_v4(), Duration::from_secs(10), cancel);
        let started = Instant::now();
        let record = run.record(
            PipelineStage::ResearchEnhancement,
            StageStatus::Skipped,
            started,
            Some("research disabled".to_string()),
        );
        let json = serde_json::to_value(record).unwrap();
        assert_eq!(json["stage"], "ResearchEnhancement");
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["detail"], "research disabled");
    }
}
