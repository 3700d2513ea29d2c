// crates/client/src/poller.rs
//! Polls a submitted job until it reaches a terminal status.

use std::time::Duration;

use bizdiag_core::{JobStatus, Provenance, Report};
use thiserror::Error;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::api::{JobApi, JobStatusView};
use crate::error::ClientError;

/// Polling cadence and limits.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOptions {
    pub initial_interval: Duration,
    /// Interval growth per poll; `1.0` polls at a fixed rate.
    pub backoff_factor: f64,
    pub max_interval: Duration,
    /// Overall wall-clock budget.
    pub timeout: Duration,
    /// Transient failures in a row before polling gives up.
    pub max_consecutive_errors: u32,
    /// Ask the server to cancel the job when polling is aborted locally.
    pub cancel_remote_on_abort: bool,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_factor: 1.5,
            max_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(300),
            max_consecutive_errors: 5,
            cancel_remote_on_abort: true,
        }
    }
}

/// How a job ended on the server.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Complete {
        report: Report,
        provenance: Option<Provenance>,
    },
    Failed {
        reason: String,
        ai_status: Option<String>,
        attempts: u32,
    },
    Cancelled,
}

/// Why polling stopped without an outcome.
#[derive(Debug, Error)]
pub enum PollError {
    /// The local wall-clock budget ran out. The job may still finish server-side.
    #[error("Timed out after {elapsed:?} waiting for job {job_id}")]
    Timeout { job_id: String, elapsed: Duration },

    #[error("Polling aborted for job {job_id}")]
    Aborted { job_id: String },

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Drives a [`JobApi`] until a job is terminal.
pub struct Poller<A> {
    api: A,
    options: PollOptions,
}

impl<A: JobApi> Poller<A> {
    pub fn new(api: A, options: PollOptions) -> Self {
        Self { api, options }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Wait for `job_id` to finish.
    pub async fn wait(&self, job_id: &str, cancel: &CancellationToken) -> Result<JobOutcome, PollError> {
        self.wait_with_progress(job_id, cancel, |_| {}).await
    }

    /// Wait for `job_id` to finish, calling `on_progress` with every status read.
    pub async fn wait_with_progress(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
        mut on_progress: impl FnMut(&JobStatusView) + Send,
    ) -> Result<JobOutcome, PollError> {
        let started = Instant::now();
        let deadline = started + self.options.timeout;
        let mut interval = self.options.initial_interval;
        let mut consecutive_errors = 0u32;

        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => return Err(self.abort(job_id).await),
                _ = sleep_until(deadline) => return Err(self.timeout(job_id, started)),
                polled = self.api.status(job_id) => polled,
            };

            match polled {
                Ok(view) => {
                    consecutive_errors = 0;
                    on_progress(&view);
                    if view.status.is_terminal() {
                        return self.fetch_outcome(job_id, cancel, started, deadline, interval).await;
                    }
                }
                Err(e) if e.is_transient() => {
                    consecutive_errors += 1;
                    tracing::warn!(
                        job_id,
                        consecutive_errors,
                        error = %e,
                        "Status poll failed"
                    );
                    if consecutive_errors >= self.options.max_consecutive_errors {
                        return Err(e.into());
                    }
                }
                Err(e) => return Err(e.into()),
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(self.abort(job_id).await),
                _ = sleep_until(deadline) => return Err(self.timeout(job_id, started)),
                _ = sleep(interval) => {}
            }
            interval = interval
                .mul_f64(self.options.backoff_factor.max(1.0))
                .min(self.options.max_interval);
        }
    }

    /// Fetch the result of a terminal job under the same deadline, abort
    /// signal and transient-error budget as status polling.
    async fn fetch_outcome(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
        started: Instant,
        deadline: Instant,
        retry_interval: Duration,
    ) -> Result<JobOutcome, PollError> {
        let mut consecutive_errors = 0u32;
        loop {
            let fetched = tokio::select! {
                _ = cancel.cancelled() => return Err(self.abort(job_id).await),
                _ = sleep_until(deadline) => return Err(self.timeout(job_id, started)),
                fetched = self.outcome(job_id) => fetched,
            };

            match fetched {
                Err(PollError::Client(e)) if e.is_transient() => {
                    consecutive_errors += 1;
                    tracing::warn!(
                        job_id,
                        consecutive_errors,
                        error = %e,
                        "Result fetch failed"
                    );
                    if consecutive_errors >= self.options.max_consecutive_errors {
                        return Err(e.into());
                    }
                }
                other => return other,
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(self.abort(job_id).await),
                _ = sleep_until(deadline) => return Err(self.timeout(job_id, started)),
                _ = sleep(retry_interval) => {}
            }
        }
    }

    async fn outcome(&self, job_id: &str) -> Result<JobOutcome, PollError> {
        let result = self.api.result(job_id).await?;
        match result.status {
            JobStatus::Complete => {
                let report = result.report.ok_or_else(|| {
                    ClientError::InvalidResponse("COMPLETE job has no report".to_string())
                })?;
                Ok(JobOutcome::Complete {
                    report,
                    provenance: result.provenance,
                })
            }
            JobStatus::Failed => Ok(JobOutcome::Failed {
                reason: result.fail_reason.unwrap_or_default(),
                ai_status: result.ai_status,
                attempts: result.attempts,
            }),
            JobStatus::Cancelled => Ok(JobOutcome::Cancelled),
            other => Err(ClientError::NotReady {
                status: other,
                progress_pct: 0,
            }
            .into()),
        }
    }

    async fn abort(&self, job_id: &str) -> PollError {
        if self.options.cancel_remote_on_abort {
            if let Err(e) = self.api.cancel(job_id).await {
                tracing::warn!(job_id, error = %e, "Remote cancel failed");
            }
        }
        PollError::Aborted {
            job_id: job_id.to_string(),
        }
    }

    fn timeout(&self, job_id: &str, started: Instant) -> PollError {
        PollError::Timeout {
            job_id: job_id.to_string(),
            elapsed: started.elapsed(),
        }
    }
}
