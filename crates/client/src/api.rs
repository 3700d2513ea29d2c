// crates/client/src/api.rs
//! Wire types of the diagnostics API and the `JobApi` seam the poller drives.

use async_trait::async_trait;
use bizdiag_core::{JobStatus, OutputMode, Provenance, Report, Tier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;

/// Body of a job submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub wizard_data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_mode: Option<OutputMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_intake: Option<Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub simulate_overload: bool,
}

impl Submission {
    pub fn new(wizard_data: Value) -> Self {
        Self {
            wizard_data,
            tier: None,
            output_mode: None,
            normalized_intake: None,
            simulate_overload: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubmitResponse {
    pub job_id: String,
}

/// Status endpoint payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub id: String,
    pub status: JobStatus,
    pub tier: Tier,
    pub progress_pct: u8,
    pub last_event: String,
    #[serde(default)]
    pub ai_status: Option<String>,
    #[serde(default)]
    pub model_used: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub fail_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Result endpoint payload for a terminal job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResultView {
    pub status: JobStatus,
    #[serde(default)]
    pub report: Option<Report>,
    #[serde(default)]
    pub provenance: Option<Provenance>,
    #[serde(default)]
    pub ai_status: Option<String>,
    #[serde(default)]
    pub model_used: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub fail_reason: Option<String>,
}

/// `{error}` body the server sends with every failure.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: String,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub progress_pct: Option<u8>,
}

/// The four job operations. Implemented over HTTP by
/// [`DiagnosticsClient`](crate::DiagnosticsClient); tests substitute fakes.
#[async_trait]
pub trait JobApi: Send + Sync {
    async fn submit(&self, submission: &Submission) -> Result<String, ClientError>;

    async fn status(&self, job_id: &str) -> Result<JobStatusView, ClientError>;

    /// 409 while the job is still working surfaces as [`ClientError::NotReady`].
    async fn result(&self, job_id: &str) -> Result<JobResultView, ClientError>;

    async fn cancel(&self, job_id: &str) -> Result<(), ClientError>;
}
