//! API route handlers for the bizdiag server.

pub mod diagnostics;
pub mod health;
pub mod metrics;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined router: JSON API under /api, Prometheus at /metrics.
///
/// Routes:
/// - GET  /api/health - Health check
/// - POST /api/diagnostics - Submit a diagnostic job
/// - GET  /api/diagnostics/status - Job status (also POST with body)
/// - GET  /api/diagnostics/result - Job result (also POST with body)
/// - POST /api/diagnostics/cancel - Cancel a job
/// - GET  /api/diagnostics/active - In-flight jobs
/// - GET  /api/diagnostics/stream - SSE stream of job progress
/// - GET  /metrics - Prometheus metrics
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", diagnostics::router())
        .merge(metrics::router())
        .with_state(state)
}
