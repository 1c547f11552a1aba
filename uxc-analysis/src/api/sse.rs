//! Server-Sent Events (SSE) for pipeline progress streaming

use crate::AppState;
use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Optional filter for GET /events
#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    /// Only forward events of this request
    pub request_id: Option<Uuid>,
}

/// GET /events - SSE event stream for pipeline progress
///
/// Streams events:
/// - PipelineStarted
/// - StageCompleted
/// - ProviderEscalated
/// - RecoveryAttempted
/// - PipelineCompleted
/// - PipelineCancelled
pub async fn event_stream(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(request_id = ?filter.request_id, "New SSE client connected to analysis events");

    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            tokio::select! {
                // Heartbeat every 15 seconds
                _ = tokio::time::sleep(Duration::from_secs(15)) => {
                    debug!("SSE: Sending heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }

                received = rx.recv() => match received {
                    Ok(event) => {
                        if filter.request_id.is_some_and(|id| id != event.request_id()) {
                            continue;
                        }

                        let event_type = event.event_type();
                        match serde_json::to_string(&event) {
                            Ok(event_json) => {
                                debug!("SSE: Broadcasting analysis event: {}", event_type);
                                yield Ok(Event::default()
                                    .event(event_type)
                                    .data(event_json));
                            }
                            Err(e) => {
                                warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("SSE: Client lagged, {} events dropped", skipped);
                    }
                    Err(RecvError::Closed) => {
                        info!("SSE: Event bus closed, ending stream");
                        break;
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
