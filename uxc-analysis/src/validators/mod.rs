//! Validation and scoring
//!
//! - `context_validator`: filters retrieved knowledge before it reaches a prompt
//! - `quality_assessor`: scores annotation sets and reports failed thresholds

pub mod context_validator;
pub mod quality_assessor;

pub use context_validator::{ContextReport, ContextValidator, ImpactAnalysis, RiskLevel};
pub use quality_assessor::QualityAssessor;
