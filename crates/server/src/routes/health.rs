//! Health check endpoint for the API.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::error::ApiResult;
use crate::state::AppState;

/// Response for the health check endpoint.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub llm_provider: String,
    pub llm_model: String,
    /// Whether the LLM backend reports itself usable.
    pub llm_ready: bool,
    /// Job counts keyed by status.
    pub jobs: BTreeMap<String, u64>,
}

/// GET /api/health - Health check endpoint.
///
/// Returns server status, version, uptime, the configured LLM backend with
/// its readiness, and how many jobs sit in each status.
pub async fn health_check(State(state): State<Arc<AppState>>) -> ApiResult<Json<HealthResponse>> {
    let jobs = state
        .db
        .count_jobs_by_status()
        .await?
        .into_iter()
        .map(|(status, count)| (status.as_db_str().to_string(), count))
        .collect();
    let provider = state.runner.provider();
    let llm_ready = match provider.health_check().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(provider = provider.name(), error = %e, "LLM backend not ready");
            false
        }
    };

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        llm_provider: provider.name().to_string(),
        llm_model: provider.model().to_string(),
        llm_ready,
        jobs,
    }))
}

/// Create the health routes router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}
