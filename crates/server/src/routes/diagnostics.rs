// crates/server/src/routes/diagnostics.rs
//! Diagnostic job endpoints.
//!
//! - POST /diagnostics           - Submit a job (202, never waits on the worker)
//! - GET|POST /diagnostics/status - Job status and progress
//! - GET|POST /diagnostics/result - Report once terminal, 409 while working
//! - POST /diagnostics/cancel     - Cancel a queued or running job
//! - GET /diagnostics/active      - Jobs a worker is handling right now
//! - GET /diagnostics/stream      - SSE stream of job progress updates

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use bizdiag_core::{Job, JobStatus, NewJob, OutputMode, Provenance, Report, Tier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;

use crate::error::{ApiError, ApiResult};
use crate::jobs::JobProgress;
use crate::metrics;
use crate::state::AppState;

/// Body of `POST /diagnostics`, as sent by the intake wizard.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[serde(default)]
    pub wizard_data: Option<Value>,
    #[serde(default)]
    pub output_mode: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub normalized_intake: Option<Value>,
    #[serde(default)]
    pub simulate_overload: bool,
}

impl SubmitRequest {
    fn into_new_job(self) -> Result<NewJob, ApiError> {
        let tier = match self.tier.as_deref() {
            Some(t) => t.parse()?,
            None => Tier::default(),
        };
        let output_mode = match self.output_mode.as_deref() {
            Some(m) => m.parse()?,
            None => OutputMode::default(),
        };
        Ok(NewJob::new(
            self.wizard_data,
            self.normalized_intake,
            tier,
            output_mode,
            self.simulate_overload,
        )?)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: String,
}

/// Job id from the query string or a JSON body.
#[derive(Debug, Default, Deserialize)]
pub struct JobIdParam {
    #[serde(default, alias = "jobId")]
    pub job_id: Option<String>,
}

impl JobIdParam {
    fn require(self) -> ApiResult<String> {
        self.job_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ApiError::BadRequest("job_id is required".to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub id: String,
    pub status: JobStatus,
    pub tier: Tier,
    pub progress_pct: u8,
    pub last_event: String,
    pub ai_status: Option<String>,
    pub model_used: Option<String>,
    pub attempts: u32,
    pub fail_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for StatusResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            status: job.status,
            tier: job.tier,
            progress_pct: job.progress_pct,
            last_event: job.last_event,
            ai_status: job.ai_status,
            model_used: job.model_used,
            attempts: job.attempts,
            fail_reason: job.fail_reason,
            created_at: job.created_at,
            started_at: job.started_at,
            updated_at: job.updated_at,
        }
    }
}

/// Terminal outcome. `report` and `provenance` are null unless `COMPLETE`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResultResponse {
    pub status: JobStatus,
    pub report: Option<Report>,
    pub provenance: Option<Provenance>,
    pub ai_status: Option<String>,
    pub model_used: Option<String>,
    pub attempts: u32,
    pub fail_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub success: bool,
}

/// POST /api/diagnostics - Create a job and hand it to the dispatch queue.
async fn submit(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let new_job = request.into_new_job()?;

    let job = state.db.create_job(&new_job).await?;
    metrics::record_job_submitted();
    tracing::info!(
        job_id = %job.id,
        tier = %job.tier,
        output_mode = %job.output_mode,
        simulate_overload = job.simulate_overload,
        "Job submitted"
    );

    // A lost dispatch leaves the job QUEUED for the sweeper to pick up.
    if let Err(e) = state.runner.dispatch(&job.id) {
        metrics::record_dispatch_failure();
        tracing::warn!(job_id = %job.id, error = %e, "Dispatch failed, leaving job queued");
    }

    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id: job.id })))
}

async fn load_job(state: &AppState, job_id: &str) -> ApiResult<Job> {
    state
        .db
        .get_job(job_id)
        .await?
        .ok_or_else(|| ApiError::JobNotFound(job_id.to_string()))
}

async fn status_of(state: &AppState, param: JobIdParam) -> ApiResult<Json<StatusResponse>> {
    let job_id = param.require()?;
    Ok(Json(load_job(state, &job_id).await?.into()))
}

/// GET /api/diagnostics/status?job_id=...
async fn status_get(
    State(state): State<Arc<AppState>>,
    query: Result<Query<JobIdParam>, QueryRejection>,
) -> ApiResult<Json<StatusResponse>> {
    let Query(param) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    status_of(&state, param).await
}

/// POST /api/diagnostics/status {job_id}
async fn status_post(
    State(state): State<Arc<AppState>>,
    body: Result<Json<JobIdParam>, JsonRejection>,
) -> ApiResult<Json<StatusResponse>> {
    let Json(param) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    status_of(&state, param).await
}

async fn result_of(state: &AppState, param: JobIdParam) -> ApiResult<Json<ResultResponse>> {
    let job_id = param.require()?;
    let job = load_job(state, &job_id).await?;

    if !job.status.is_terminal() {
        return Err(ApiError::NotReady {
            job_id,
            status: job.status,
            progress_pct: job.progress_pct,
            last_event: job.last_event,
        });
    }

    let complete = job.status == JobStatus::Complete;
    Ok(Json(ResultResponse {
        status: job.status,
        report: job.report.filter(|_| complete),
        provenance: job.provenance.filter(|_| complete),
        ai_status: job.ai_status,
        model_used: job.model_used,
        attempts: job.attempts,
        fail_reason: job.fail_reason,
    }))
}

/// GET /api/diagnostics/result?job_id=...
async fn result_get(
    State(state): State<Arc<AppState>>,
    query: Result<Query<JobIdParam>, QueryRejection>,
) -> ApiResult<Json<ResultResponse>> {
    let Query(param) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    result_of(&state, param).await
}

/// POST /api/diagnostics/result {job_id}
async fn result_post(
    State(state): State<Arc<AppState>>,
    body: Result<Json<JobIdParam>, JsonRejection>,
) -> ApiResult<Json<ResultResponse>> {
    let Json(param) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    result_of(&state, param).await
}

/// POST /api/diagnostics/cancel {job_id}
///
/// Always `{success: true}` for a well-formed request: cancelling a finished
/// or unknown job is a no-op.
async fn cancel(
    State(state): State<Arc<AppState>>,
    body: Result<Json<JobIdParam>, JsonRejection>,
) -> ApiResult<Json<CancelResponse>> {
    let Json(param) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let job_id = param.require()?;

    if state.db.cancel_job(&job_id).await? {
        let signalled = state.runner.cancel(&job_id);
        metrics::record_job_finished(JobStatus::Cancelled, std::time::Duration::ZERO);
        tracing::info!(job_id = %job_id, in_flight = signalled, "Job cancelled");
    } else {
        tracing::debug!(job_id = %job_id, "Cancel had no effect");
    }

    Ok(Json(CancelResponse { success: true }))
}

/// GET /api/diagnostics/active - Snapshot of in-flight jobs.
async fn active(State(state): State<Arc<AppState>>) -> Json<Vec<JobProgress>> {
    Json(state.runner.active_jobs())
}

/// GET /api/diagnostics/stream - SSE stream of all job progress updates.
async fn stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.runner.subscribe();

    let stream = async_stream::stream! {
        let mut rx = rx;
        loop {
            match rx.recv().await {
                Ok(progress) => {
                    let json = serde_json::to_string(&progress).unwrap_or_default();
                    yield Ok(Event::default().event("progress").data(json));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Progress stream subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Build the diagnostics router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/diagnostics", post(submit))
        .route("/diagnostics/status", get(status_get).post(status_post))
        .route("/diagnostics/result", get(result_get).post(result_post))
        .route("/diagnostics/cancel", post(cancel))
        .route("/diagnostics/active", get(active))
        .route("/diagnostics/stream", get(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::RunnerConfig;
    use crate::test_util::{test_state, test_state_with};
    use axum::body::Body;
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tower::ServiceExt;

    fn app(state: Arc<AppState>) -> Router {
        Router::new().nest("/api", router()).with_state(state)
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                builder = builder.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let response = app.oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn submit_job(state: &Arc<AppState>) -> String {
        let (status, body) = send(
            app(state.clone()),
            "POST",
            "/api/diagnostics",
            Some(json!({"wizardData": {"company": "Acme"}, "tier": "premium"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        body["job_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_submit_creates_queued_job() {
        let state = test_state().await;
        let id = submit_job(&state).await;

        let job = state.db.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.tier, Tier::Premium);
        assert_eq!(job.output_mode, OutputMode::Rapid);
    }

    #[tokio::test]
    async fn test_submit_rejects_unknown_tier() {
        let state = test_state().await;
        let (status, body) = send(
            app(state),
            "POST",
            "/api/diagnostics",
            Some(json!({"wizardData": {"a": 1}, "tier": "gold"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Unknown tier: gold");
    }

    #[tokio::test]
    async fn test_submit_survives_full_queue() {
        let state = test_state_with(RunnerConfig {
            queue_capacity: 1,
            ..RunnerConfig::default()
        })
        .await;

        let first = submit_job(&state).await;
        let second = submit_job(&state).await;
        assert_ne!(first, second);
        assert_eq!(
            state.db.get_job_status(&second).await.unwrap(),
            Some(JobStatus::Queued)
        );
    }

    #[tokio::test]
    async fn test_status_via_query_and_body() {
        let state = test_state().await;
        let id = submit_job(&state).await;

        let (status, body) = send(
            app(state.clone()),
            "GET",
            &format!("/api/diagnostics/status?job_id={id}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "QUEUED");
        assert_eq!(body["progress_pct"], 0);
        assert_eq!(body["last_event"], "Queued");
        assert_eq!(body["tier"], "premium");

        let (status, body) = send(
            app(state),
            "POST",
            "/api/diagnostics/status",
            Some(json!({"jobId": id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], id.as_str());
    }

    #[tokio::test]
    async fn test_status_requires_job_id() {
        let state = test_state().await;
        let (status, body) = send(app(state), "GET", "/api/diagnostics/status", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "job_id is required");
    }

    #[tokio::test]
    async fn test_result_conflict_while_queued() {
        let state = test_state().await;
        let id = submit_job(&state).await;

        let (status, body) = send(
            app(state),
            "GET",
            &format!("/api/diagnostics/result?job_id={id}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["status"], "QUEUED");
        assert_eq!(body["error"], "Job not complete yet");
    }

    #[tokio::test]
    async fn test_cancel_queued_job_then_result() {
        let state = test_state().await;
        let id = submit_job(&state).await;

        let (status, body) = send(
            app(state.clone()),
            "POST",
            "/api/diagnostics/cancel",
            Some(json!({"job_id": id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));

        let (status, body) = send(
            app(state),
            "POST",
            "/api/diagnostics/result",
            Some(json!({"job_id": id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "CANCELLED");
        assert_eq!(body["report"], Value::Null);
    }

    #[tokio::test]
    async fn test_cancel_unknown_job_succeeds() {
        let state = test_state().await;
        let (status, body) = send(
            app(state),
            "POST",
            "/api/diagnostics/cancel",
            Some(json!({"job_id": "no-such-job"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn test_active_is_empty_when_idle() {
        let state = test_state().await;
        let (status, body) = send(app(state), "GET", "/api/diagnostics/active", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_stream_emits_progress_events() {
        use tokio_stream::StreamExt;

        let state = test_state().await;
        let response = app(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/api/diagnostics/stream")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "text/event-stream"
        );

        state.runner.start().unwrap();
        let id = submit_job(&state).await;

        let mut body = response.into_body().into_data_stream();
        let mut buffer = String::new();
        let mut seen: Vec<JobProgress> = Vec::new();
        let read = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while let Some(chunk) = body.next().await {
                buffer.push_str(&String::from_utf8_lossy(&chunk.unwrap()));
                while let Some(end) = buffer.find("\n\n") {
                    let frame: String = buffer.drain(..end + 2).collect();
                    if !frame.contains("event: progress") {
                        continue;
                    }
                    let data = frame
                        .lines()
                        .find_map(|l| l.strip_prefix("data: "))
                        .unwrap();
                    let progress: JobProgress = serde_json::from_str(data).unwrap();
                    let done = progress.job_id == id && progress.status == JobStatus::Complete;
                    seen.push(progress);
                    if done {
                        return;
                    }
                }
            }
        })
        .await;
        assert!(read.is_ok(), "no COMPLETE event within 5s, saw {seen:?}");

        let ours: Vec<_> = seen.iter().filter(|p| p.job_id == id).collect();
        assert!(ours.iter().any(|p| p.status == JobStatus::Running));
        assert!(ours.windows(2).all(|w| w[0].progress_pct <= w[1].progress_pct));
        assert_eq!(ours.last().unwrap().progress_pct, 100);
    }
}
