// crates/server/src/jobs/worker.rs
//! Worker: turns one queued job into a report or a recorded failure.

use std::sync::Arc;
use std::time::Instant;

use bizdiag_core::llm::{CompletionRequest, CompletionResponse, LlmError, LlmProvider};
use bizdiag_core::{parse_report, parse_validation, prompt, Job, JobStatus, Provenance, Report};
use bizdiag_db::{Database, DbResult};
use chrono::Utc;

use super::state::JobState;
use super::types::WorkerConfig;
use crate::metrics;

const START_PROGRESS: u8 = 5;
const MAX_ATTEMPT_PROGRESS: u8 = 80;
const VALIDATION_PROGRESS: u8 = 90;

/// Progress shown while attempt `attempt` (1-based) is in flight: 15, 35, 55, then 80.
pub fn attempt_progress(attempt: u32) -> u8 {
    let pct = 15u32.saturating_add(20u32.saturating_mul(attempt.saturating_sub(1)));
    pct.min(MAX_ATTEMPT_PROGRESS as u32) as u8
}

enum AttemptOutcome {
    Success {
        report: Report,
        response: CompletionResponse,
        attempts: u32,
    },
    Failed {
        error: LlmError,
        attempts: u32,
    },
    /// The job left RUNNING (cancelled) or the cancel signal fired.
    Stopped,
}

pub struct Worker {
    db: Database,
    provider: Arc<dyn LlmProvider>,
    config: WorkerConfig,
    state: Arc<JobState>,
}

impl Worker {
    pub fn new(
        db: Database,
        provider: Arc<dyn LlmProvider>,
        config: WorkerConfig,
        state: Arc<JobState>,
    ) -> Self {
        Self {
            db,
            provider,
            config,
            state,
        }
    }

    /// Run the job to a terminal state. Store errors are logged, not
    /// propagated: the job stays non-terminal and the sweeper re-dispatches it.
    pub async fn run(self) {
        let job_id = self.state.id().to_string();
        let start = Instant::now();
        if let Err(e) = self.execute(&job_id, start).await {
            tracing::error!(job_id = %job_id, error = %e, "Worker aborted on job store error");
        }
    }

    async fn execute(&self, job_id: &str, start: Instant) -> DbResult<()> {
        let Some(job) = self.db.get_job(job_id).await? else {
            tracing::warn!(job_id = %job_id, "Dispatched job not found");
            return Ok(());
        };

        if !self.db.mark_running(job_id, "Starting analysis").await? {
            tracing::info!(job_id = %job_id, status = %job.status, "Job no longer runnable, skipping");
            return Ok(());
        }
        self.state.set_running(START_PROGRESS, "Starting analysis");
        tracing::info!(
            job_id = %job_id,
            tier = %job.tier,
            output_mode = %job.output_mode,
            dispatch_count = job.dispatch_count,
            "Worker started"
        );

        let started_at = job.started_at.unwrap_or_else(Utc::now);
        let request = prompt::build_report_request(&job);

        match self.attempt_loop(&job, request).await? {
            AttemptOutcome::Success {
                report,
                response,
                attempts,
            } => {
                let validation = if self.config.validation_pass {
                    self.validate(job_id, &report).await?
                } else {
                    None
                };
                let provenance = Provenance {
                    provider: self.provider.name().to_string(),
                    model: response
                        .model
                        .clone()
                        .unwrap_or_else(|| self.provider.model().to_string()),
                    tier: job.tier,
                    output_mode: job.output_mode,
                    attempts,
                    started_at,
                    generated_at: Utc::now(),
                    latency_ms: response.latency_ms,
                    input_tokens: response.input_tokens,
                    output_tokens: response.output_tokens,
                    validation,
                };

                if self.db.complete_job(job_id, &report, &provenance).await? {
                    self.state.finish(JobStatus::Complete, "Report ready");
                    metrics::record_job_finished(JobStatus::Complete, start.elapsed());
                    tracing::info!(
                        job_id = %job_id,
                        attempts,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Job complete"
                    );
                } else {
                    tracing::info!(job_id = %job_id, "Job left RUNNING before completion, report discarded");
                }
            }
            AttemptOutcome::Failed { error, attempts } => {
                let reason = error.to_string();
                if self
                    .db
                    .fail_job(job_id, &reason, error.ai_status(), attempts)
                    .await?
                {
                    self.state.finish(JobStatus::Failed, "Failed");
                    metrics::record_job_finished(JobStatus::Failed, start.elapsed());
                    tracing::warn!(
                        job_id = %job_id,
                        attempts,
                        error = %reason,
                        "Job failed"
                    );
                }
            }
            AttemptOutcome::Stopped => {
                tracing::info!(job_id = %job_id, "Worker stopped: job cancelled");
            }
        }
        Ok(())
    }

    async fn attempt_loop(&self, job: &Job, request: CompletionRequest) -> DbResult<AttemptOutcome> {
        let retry = &self.config.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if self.cancelled(&job.id).await? {
                return Ok(AttemptOutcome::Stopped);
            }

            let pct = attempt_progress(attempt);
            let event = format!("Calling model (attempt {attempt}/{max_attempts})");
            if !self
                .db
                .record_attempt(&job.id, attempt, self.provider.model(), pct, &event)
                .await?
            {
                return Ok(AttemptOutcome::Stopped);
            }
            self.state.set_progress(pct, event);

            let result = self.call_model(job, request.clone()).await;
            match result {
                Ok((report, response)) => {
                    metrics::record_llm_attempt("ok");
                    return Ok(AttemptOutcome::Success {
                        report,
                        response,
                        attempts: attempt,
                    });
                }
                Err(error) => {
                    let ai_status = error.ai_status();
                    metrics::record_llm_attempt(ai_status.as_str());
                    tracing::warn!(
                        job_id = %job.id,
                        attempt,
                        max_attempts,
                        error = %error,
                        "LLM attempt failed"
                    );

                    if attempt >= max_attempts || !retry.should_retry(attempt, &error) {
                        return Ok(AttemptOutcome::Failed {
                            error,
                            attempts: attempt,
                        });
                    }

                    let delay = retry.delay_for(attempt, error.retry_after());
                    let event = format!(
                        "{ai_status} on attempt {attempt}, retrying in {}s",
                        delay.as_secs()
                    );
                    if !self
                        .db
                        .update_progress(&job.id, pct, Some(ai_status), &event)
                        .await?
                    {
                        return Ok(AttemptOutcome::Stopped);
                    }
                    self.state.set_progress(pct, event);

                    let token = self.state.cancel_token();
                    tokio::select! {
                        _ = token.cancelled() => return Ok(AttemptOutcome::Stopped),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// One LLM call plus parsing. `simulate_overload` jobs never reach the provider.
    async fn call_model(
        &self,
        job: &Job,
        request: CompletionRequest,
    ) -> Result<(Report, CompletionResponse), LlmError> {
        if job.simulate_overload {
            return Err(LlmError::Overloaded("simulated overload".into()));
        }
        let response = self.complete_with_timeout(request).await?;
        let report = parse_report(&response.content)?;
        Ok((report, response))
    }

    async fn complete_with_timeout(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, LlmError> {
        let limit = self.config.llm_timeout;
        match tokio::time::timeout(limit, self.provider.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(limit.as_secs())),
        }
    }

    /// Consistency check on a finished report. Failures are logged and the
    /// report ships without a validation note.
    async fn validate(
        &self,
        job_id: &str,
        report: &Report,
    ) -> DbResult<Option<bizdiag_core::ValidationNote>> {
        if !self
            .db
            .update_progress(job_id, VALIDATION_PROGRESS, None, "Validating report")
            .await?
        {
            return Ok(None);
        }
        self.state.set_progress(VALIDATION_PROGRESS, "Validating report");

        let request = prompt::build_validation_request(report);
        let note = self
            .complete_with_timeout(request)
            .await
            .and_then(|resp| {
                let model = resp
                    .model
                    .clone()
                    .unwrap_or_else(|| self.provider.model().to_string());
                parse_validation(&resp.content, &model)
            });
        match note {
            Ok(note) => Ok(Some(note)),
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Validation pass failed, continuing without it");
                Ok(None)
            }
        }
    }

    async fn cancelled(&self, job_id: &str) -> DbResult<bool> {
        if self.state.is_cancelled() {
            return Ok(true);
        }
        Ok(matches!(
            self.db.get_job_status(job_id).await?,
            Some(JobStatus::Cancelled) | None
        ))
    }
}
