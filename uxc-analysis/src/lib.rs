//! uxc-analysis library interface
//!
//! Multi-model UX critique orchestration: weighted provider dispatch,
//! synthesis, knowledge-context validation, quality gating and bounded
//! recovery, exposed over an axum HTTP service.

pub mod api;
pub mod config;
pub mod error;
pub mod impact;
pub mod orchestrator;
pub mod providers;
pub mod types;
pub mod validators;
pub mod workflow;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;
use uxc_common::events::EventBus;
use workflow::PipelineController;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Pipeline controller (shared by all runs)
    pub controller: Arc<PipelineController>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Cancellation tokens for in-flight analyses
    pub cancellation_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    /// Service startup timestamp (for uptime)
    pub startup_time: DateTime<Utc>,
    /// Last pipeline error (for health diagnostics)
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    /// Create state; the controller is wired to `event_bus`
    pub fn new(controller: PipelineController, event_bus: EventBus) -> Self {
        Self {
            controller: Arc::new(controller.with_events(event_bus.clone())),
            event_bus,
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::analyze_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
