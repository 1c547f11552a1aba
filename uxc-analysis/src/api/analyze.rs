//! Analysis endpoints
//!
//! POST /analyze, POST /analyze/cancel/:request_id

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    types::{AnalysisRequest, PipelineOptions},
    workflow::PipelineResult,
    AppState,
};

/// Per-request overrides of the configured option defaults
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionOverrides {
    pub rag_enabled: Option<bool>,
    pub research_enabled: Option<bool>,
    pub strict_quality: Option<bool>,
}

impl OptionOverrides {
    pub fn apply(&self, defaults: PipelineOptions) -> PipelineOptions {
        PipelineOptions {
            rag_enabled: self.rag_enabled.unwrap_or(defaults.rag_enabled),
            research_enabled: self.research_enabled.unwrap_or(defaults.research_enabled),
            strict_quality: self.strict_quality.unwrap_or(defaults.strict_quality),
        }
    }
}

/// POST /analyze request
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(flatten)]
    pub request: AnalysisRequest,
    #[serde(default)]
    pub options: OptionOverrides,
}

/// POST /analyze/cancel response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelAnalysisResponse {
    pub request_id: Uuid,
    pub cancelled_at: chrono::DateTime<chrono::Utc>,
}

/// Removes the request's token when the handler finishes or is dropped
struct TokenRegistration {
    tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    request_id: Uuid,
}

impl Drop for TokenRegistration {
    fn drop(&mut self) {
        // task fallback only when the map is contended
        match self.tokens.try_write() {
            Ok(mut tokens) => {
                tokens.remove(&self.request_id);
            }
            Err(_) => {
                let tokens = Arc::clone(&self.tokens);
                let request_id = self.request_id;
                tokio::spawn(async move {
                    tokens.write().await.remove(&request_id);
                });
            }
        }
    }
}

/// POST /analyze
///
/// Runs the pipeline to completion and returns the result. A run that
/// reaches a verdict returns 200 even when `success` is false.
pub async fn analyze(
    State(state): State<AppState>,
    Json(body): Json<AnalyzeRequest>,
) -> ApiResult<Json<PipelineResult>> {
    let request = body.request;
    let options = body.options.apply(state.controller.default_options());

    let token = CancellationToken::new();
    {
        let mut tokens = state.cancellation_tokens.write().await;
        if tokens.contains_key(&request.request_id) {
            return Err(ApiError::Conflict(format!(
                "Analysis already running: {}",
                request.request_id
            )));
        }
        tokens.insert(request.request_id, token.clone());
    }
    let _registration = TokenRegistration {
        tokens: Arc::clone(&state.cancellation_tokens),
        request_id: request.request_id,
    };

    let result = state
        .controller
        .execute_pipeline(&request, options, &token)
        .await?;

    if let Some(error) = &result.error {
        *state.last_error.write().await = Some(error.clone());
    }

    Ok(Json(result))
}

/// POST /analyze/cancel/:request_id
///
/// Signals an in-flight run to stop. The run's own response reports 409.
pub async fn cancel_analysis(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> ApiResult<Json<CancelAnalysisResponse>> {
    let tokens = state.cancellation_tokens.read().await;
    let token = tokens
        .get(&request_id)
        .ok_or_else(|| ApiError::NotFound(format!("Analysis not running: {}", request_id)))?;

    token.cancel();
    tracing::info!(request_id = %request_id, "Analysis cancellation requested");

    Ok(Json(CancelAnalysisResponse {
        request_id,
        cancelled_at: chrono::Utc::now(),
    }))
}

/// Build analysis routes
pub fn analyze_routes() -> Router<AppState> {
    Router::new()
        .route("/analyze", post(analyze))
        .route("/analyze/cancel/:request_id", post(cancel_analysis))
}
