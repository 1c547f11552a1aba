//! Event types for the analysis event system
//!
//! Provides the `AnalysisEvent` enum and the `EventBus` used to broadcast
//! pipeline progress to SSE subscribers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Analysis pipeline events
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AnalysisEvent {
    /// Pipeline run accepted and started
    PipelineStarted {
        request_id: Uuid,
        image_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A pipeline stage finished (completed, skipped or failed)
    StageCompleted {
        request_id: Uuid,
        /// Stage name (e.g. "ModelDispatch")
        stage: String,
        /// Stage status (e.g. "completed", "skipped", "failed")
        status: String,
        duration_ms: u64,
    },

    /// Orchestrator escalated from one provider to the next
    ProviderEscalated {
        request_id: Uuid,
        from_provider: String,
        to_provider: String,
        reason: String,
    },

    /// A recovery strategy was evaluated
    RecoveryAttempted {
        request_id: Uuid,
        strategy: String,
        accepted: bool,
        score_before: f64,
        score_after: Option<f64>,
    },

    /// Pipeline run finished with a terminal result
    PipelineCompleted {
        request_id: Uuid,
        success: bool,
        overall_score: f64,
        annotation_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Pipeline run was cancelled by the caller
    PipelineCancelled {
        request_id: Uuid,
        /// Stage that was running when cancellation was observed
        stage: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl AnalysisEvent {
    /// Event type name, used as the SSE event field
    pub fn event_type(&self) -> &'static str {
        match self {
            AnalysisEvent::PipelineStarted { .. } => "PipelineStarted",
            AnalysisEvent::StageCompleted { .. } => "StageCompleted",
            AnalysisEvent::ProviderEscalated { .. } => "ProviderEscalated",
            AnalysisEvent::RecoveryAttempted { .. } => "RecoveryAttempted",
            AnalysisEvent::PipelineCompleted { .. } => "PipelineCompleted",
            AnalysisEvent::PipelineCancelled { .. } => "PipelineCancelled",
        }
    }

    /// Request this event belongs to
    pub fn request_id(&self) -> Uuid {
        match self {
            AnalysisEvent::PipelineStarted { request_id, .. }
            | AnalysisEvent::StageCompleted { request_id, .. }
            | AnalysisEvent::ProviderEscalated { request_id, .. }
            | AnalysisEvent::RecoveryAttempted { request_id, .. }
            | AnalysisEvent::PipelineCompleted { request_id, .. }
            | AnalysisEvent::PipelineCancelled { request_id, .. } => *request_id,
        }
    }
}

/// Broadcast bus for analysis events
///
/// Cloning the bus shares the underlying channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AnalysisEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    ///
    /// # Examples
    ///
    /// ```
    /// use uxc_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<AnalysisEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: AnalysisEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
