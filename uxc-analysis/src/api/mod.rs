//! HTTP API handlers for uxc-analysis
//!
//! REST endpoints for running and cancelling analyses, plus SSE progress.

pub mod analyze;
pub mod health;
pub mod sse;

pub use analyze::analyze_routes;
pub use health::health_routes;
pub use sse::event_stream;
