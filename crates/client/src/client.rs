// crates/client/src/client.rs
//! HTTP client for the diagnostics API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::api::{ErrorBody, JobApi, JobResultView, JobStatusView, SubmitResponse, Submission};
use crate::error::ClientError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Talks to a bizdiag server over HTTP.
#[derive(Debug, Clone)]
pub struct DiagnosticsClient {
    http: reqwest::Client,
    base_url: String,
}

impl DiagnosticsClient {
    /// Client for the server at `base_url` (scheme and host, no `/api`).
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let base_url = base_url.trim().trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }
        let http = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/diagnostics{}", self.base_url, path)
    }
}

/// Decode a success body, or turn the server's `{error}` body into a `ClientError`.
async fn decode<T: DeserializeOwned>(response: Response, job_id: &str) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()));
    }

    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<ErrorBody>(&text).ok();
    match (status, body) {
        (StatusCode::NOT_FOUND, _) => Err(ClientError::NotFound(job_id.to_string())),
        (
            StatusCode::CONFLICT,
            Some(ErrorBody {
                status: Some(job_status),
                progress_pct,
                ..
            }),
        ) => Err(ClientError::NotReady {
            status: job_status,
            progress_pct: progress_pct.unwrap_or(0),
        }),
        (_, Some(body)) => Err(ClientError::Api {
            status: status.as_u16(),
            message: body.error,
        }),
        (_, None) => Err(ClientError::Api {
            status: status.as_u16(),
            message: text.chars().take(200).collect(),
        }),
    }
}

#[async_trait]
impl JobApi for DiagnosticsClient {
    async fn submit(&self, submission: &Submission) -> Result<String, ClientError> {
        let response = self.http.post(self.url("")).json(submission).send().await?;
        let submitted: SubmitResponse = decode(response, "").await?;
        tracing::debug!(job_id = %submitted.job_id, "Job submitted");
        Ok(submitted.job_id)
    }

    async fn status(&self, job_id: &str) -> Result<JobStatusView, ClientError> {
        let response = self
            .http
            .get(self.url("/status"))
            .query(&[("job_id", job_id)])
            .send()
            .await?;
        decode(response, job_id).await
    }

    async fn result(&self, job_id: &str) -> Result<JobResultView, ClientError> {
        let response = self
            .http
            .get(self.url("/result"))
            .query(&[("job_id", job_id)])
            .send()
            .await?;
        decode(response, job_id).await
    }

    async fn cancel(&self, job_id: &str) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.url("/cancel"))
            .json(&json!({ "job_id": job_id }))
            .send()
            .await?;
        let _: serde_json::Value = decode(response, job_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_normalizes_base_url() {
        let client = DiagnosticsClient::new(" http://localhost:47900/ ").unwrap();
        assert_eq!(client.base_url(), "http://localhost:47900");
        assert_eq!(
            client.url("/status"),
            "http://localhost:47900/api/diagnostics/status"
        );
    }

    #[test]
    fn test_new_rejects_bare_host() {
        assert!(matches!(
            DiagnosticsClient::new("localhost:47900"),
            Err(ClientError::InvalidUrl(_))
        ));
    }
}
