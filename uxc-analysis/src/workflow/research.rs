//! Research enhancement stage
//!
//! Runs one research lookup per annotation concurrently under a single
//! combined stage timeout. A lookup that returns sources yields a new
//! annotation marked research-validated; failed or empty lookups leave the
//! annotation unchanged. Lookups are read-only and order-independent, so the
//! output preserves the input order.

use crate::types::{Annotation, ResearchSource};
use futures::future::join_all;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of the research stage
#[derive(Debug)]
pub enum ResearchOutcome {
    Completed {
        annotations: Vec<Annotation>,
        /// Annotations that gained research sources
        validated: usize,
        /// Lookups that returned an error
        failed: usize,
    },
    /// Combined stage timeout fired; input annotations stay as they were
    TimedOut(Duration),
    Cancelled,
}

/// Look up research for every annotation
pub async fn enhance(
    source: &dyn ResearchSource,
    annotations: &[Annotation],
    budget: Duration,
    cancel: &CancellationToken,
) -> ResearchOutcome {
    let lookups = annotations.iter().map(|annotation| async move {
        match source.research(annotation).await {
            Ok(sources) => Ok(sources),
            Err(e) => {
                warn!(
                    source = source.name(),
                    annotation_id = %annotation.id,
                    error = %e,
                    "Research lookup failed"
                );
                Err(e)
            }
        }
    });

    let results = tokio::select! {
        _ = cancel.cancelled() => return ResearchOutcome::Cancelled,
        joined = tokio::time::timeout(budget, join_all(lookups)) => match joined {
            Ok(results) => results,
            Err(_) => return ResearchOutcome::TimedOut(budget),
        },
    };

    let mut validated = 0;
    let mut failed = 0;
    let enhanced: Vec<Annotation> = annotations
        .iter()
        .zip(results)
        .map(|(annotation, result)| match result {
            Ok(sources) if !sources.is_empty() => {
                validated += 1;
                annotation.with_research(&sources)
            }
            Ok(_) => annotation.clone(),
            Err(_) => {
                failed += 1;
                annotation.clone()
            }
        })
        .collect();

    debug!(
        source = source.name(),
        validated,
        failed,
        "Research enhancement finished"
    );

    ResearchOutcome::Completed {
        annotations: enhanced,
        validated,
        failed,
    }
}
