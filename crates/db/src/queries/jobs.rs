// crates/db/src/queries/jobs.rs
// Diagnostic job CRUD. Every status write is a single guarded UPDATE whose
// WHERE clause mirrors JobStatus::can_transition_to; callers learn from the
// returned bool whether their transition won.

use bizdiag_core::{new_job_id, AiStatus, Job, JobId, JobStatus, NewJob, Provenance, Report};
use chrono::{DateTime, Utc};

use super::row_types::JobRow;
use super::{now_db_time, to_db_time};
use crate::{Database, DbError, DbResult};

/// A job the sweeper considers abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleJob {
    pub id: JobId,
    pub status: JobStatus,
    pub dispatch_count: u32,
}

impl Database {
    /// Insert a new `QUEUED` job and return it as stored.
    ///
    /// `dispatch_count` starts at 1: the caller is expected to enqueue the id
    /// right after this returns.
    pub async fn create_job(&self, new_job: &NewJob) -> DbResult<Job> {
        let id = new_job_id();
        let now = now_db_time();
        let normalized = new_job
            .normalized_intake
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO diagnostic_jobs (
                id, status, tier, output_mode, input_payload, normalized_intake,
                simulate_overload, progress_pct, last_event, attempts, dispatch_count,
                created_at, updated_at
            )
            VALUES (?1, 'QUEUED', ?2, ?3, ?4, ?5, ?6, 0, 'Queued', 0, 1, ?7, ?7)
            "#,
        )
        .bind(&id)
        .bind(new_job.tier.as_str())
        .bind(new_job.output_mode.as_str())
        .bind(serde_json::to_string(&new_job.input_payload)?)
        .bind(normalized)
        .bind(new_job.simulate_overload)
        .bind(&now)
        .execute(self.pool())
        .await?;

        self.get_job(&id).await?.ok_or_else(|| DbError::Corrupt {
            id,
            reason: "inserted row not readable".into(),
        })
    }

    /// Load a job by id.
    pub async fn get_job(&self, id: &str) -> DbResult<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM diagnostic_jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(JobRow::into_job).transpose()
    }

    /// Current status only; the worker's cheap cancellation check.
    pub async fn get_job_status(&self, id: &str) -> DbResult<Option<JobStatus>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT status FROM diagnostic_jobs WHERE id = ?1")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        row.map(|(status,)| {
            JobStatus::from_db_str(&status).map_err(|e| DbError::Corrupt {
                id: id.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
    }

    /// `QUEUED | RUNNING -> RUNNING`. Keeps an existing `started_at` so a
    /// re-dispatched job reports when it first started.
    pub async fn mark_running(&self, id: &str, last_event: &str) -> DbResult<bool> {
        let now = now_db_time();
        let result = sqlx::query(
            r#"
            UPDATE diagnostic_jobs SET
                status = 'RUNNING',
                started_at = COALESCE(started_at, ?2),
                progress_pct = MAX(progress_pct, 5),
                ai_status = ?3,
                last_event = ?4,
                updated_at = ?2
            WHERE id = ?1 AND status IN ('QUEUED', 'RUNNING')
            "#,
        )
        .bind(id)
        .bind(&now)
        .bind(AiStatus::Pending.as_str())
        .bind(last_event)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Record the start of LLM attempt number `attempt` on a `RUNNING` job.
    pub async fn record_attempt(
        &self,
        id: &str,
        attempt: u32,
        model: &str,
        progress_pct: u8,
        last_event: &str,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE diagnostic_jobs SET
                attempts = ?2,
                ai_status = ?3,
                model_used = ?4,
                progress_pct = MAX(progress_pct, ?5),
                last_event = ?6,
                updated_at = ?7
            WHERE id = ?1 AND status = 'RUNNING'
            "#,
        )
        .bind(id)
        .bind(attempt as i64)
        .bind(AiStatus::Calling.as_str())
        .bind(model)
        .bind(progress_pct.min(100) as i64)
        .bind(last_event)
        .bind(now_db_time())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Update progress on a `RUNNING` job. Progress never moves backwards.
    pub async fn update_progress(
        &self,
        id: &str,
        progress_pct: u8,
        ai_status: Option<AiStatus>,
        last_event: &str,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE diagnostic_jobs SET
                progress_pct = MAX(progress_pct, ?2),
                ai_status = COALESCE(?3, ai_status),
                last_event = ?4,
                updated_at = ?5
            WHERE id = ?1 AND status = 'RUNNING'
            "#,
        )
        .bind(id)
        .bind(progress_pct.min(100) as i64)
        .bind(ai_status.map(|s| s.as_str()))
        .bind(last_event)
        .bind(now_db_time())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// `RUNNING -> COMPLETE`. Report, provenance and status land in one
    /// statement, so no reader can observe `COMPLETE` without a report.
    pub async fn complete_job(
        &self,
        id: &str,
        report: &Report,
        provenance: &Provenance,
    ) -> DbResult<bool> {
        let report_json = serde_json::to_string(report)?;
        let provenance_json = serde_json::to_string(provenance)?;
        let completed_at = to_db_time(provenance.generated_at);
        let result = sqlx::query(
            r#"
            UPDATE diagnostic_jobs SET
                status = 'COMPLETE',
                report = ?2,
                provenance = ?3,
                progress_pct = 100,
                ai_status = ?4,
                model_used = ?5,
                attempts = ?6,
                fail_reason = NULL,
                last_event = 'Report ready',
                completed_at = ?7,
                updated_at = ?7
            WHERE id = ?1 AND status = 'RUNNING'
            "#,
        )
        .bind(id)
        .bind(report_json)
        .bind(provenance_json)
        .bind(AiStatus::Ok.as_str())
        .bind(&provenance.model)
        .bind(provenance.attempts as i64)
        .bind(completed_at)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// `RUNNING -> FAILED`.
    pub async fn fail_job(
        &self,
        id: &str,
        fail_reason: &str,
        ai_status: AiStatus,
        attempts: u32,
    ) -> DbResult<bool> {
        let now = now_db_time();
        let result = sqlx::query(
            r#"
            UPDATE diagnostic_jobs SET
                status = 'FAILED',
                fail_reason = ?2,
                ai_status = ?3,
                attempts = ?4,
                last_event = 'Failed',
                completed_at = ?5,
                updated_at = ?5
            WHERE id = ?1 AND status = 'RUNNING'
            "#,
        )
        .bind(id)
        .bind(fail_reason)
        .bind(ai_status.as_str())
        .bind(attempts as i64)
        .bind(&now)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// `QUEUED | RUNNING -> CANCELLED`. Returns false when the job is unknown
    /// or already terminal; neither is an error.
    pub async fn cancel_job(&self, id: &str) -> DbResult<bool> {
        let now = now_db_time();
        let result = sqlx::query(
            r#"
            UPDATE diagnostic_jobs SET
                status = 'CANCELLED',
                ai_status = ?2,
                last_event = 'Cancelled',
                completed_at = ?3,
                updated_at = ?3
            WHERE id = ?1 AND status IN ('QUEUED', 'RUNNING')
            "#,
        )
        .bind(id)
        .bind(AiStatus::Cancelled.as_str())
        .bind(&now)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Non-terminal jobs untouched since `cutoff`, oldest first.
    pub async fn find_stale_jobs(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<Vec<StaleJob>> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT id, status, dispatch_count FROM diagnostic_jobs
            WHERE status IN ('QUEUED', 'RUNNING') AND updated_at < ?1
            ORDER BY created_at ASC, rowid ASC
            LIMIT ?2
            "#,
        )
        .bind(to_db_time(cutoff))
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|(id, status, dispatch_count)| {
                let status = JobStatus::from_db_str(&status).map_err(|e| DbError::Corrupt {
                    id: id.clone(),
                    reason: e.to_string(),
                })?;
                Ok(StaleJob {
                    id,
                    status,
                    dispatch_count: dispatch_count.max(0) as u32,
                })
            })
            .collect()
    }

    /// Count one more dispatch of a non-terminal job and touch `updated_at`
    /// so the next sweep does not pick it up again immediately.
    pub async fn bump_dispatch_count(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE diagnostic_jobs SET
                dispatch_count = dispatch_count + 1,
                updated_at = ?2
            WHERE id = ?1 AND status IN ('QUEUED', 'RUNNING')
            "#,
        )
        .bind(id)
        .bind(now_db_time())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// `QUEUED -> FAILED` for a job no worker ever picked up.
    pub async fn fail_stale_queued(&self, id: &str, fail_reason: &str) -> DbResult<bool> {
        let now = now_db_time();
        let result = sqlx::query(
            r#"
            UPDATE diagnostic_jobs SET
                status = 'FAILED',
                fail_reason = ?2,
                ai_status = ?3,
                last_event = 'Failed',
                completed_at = ?4,
                updated_at = ?4
            WHERE id = ?1 AND status = 'QUEUED'
            "#,
        )
        .bind(id)
        .bind(fail_reason)
        .bind(AiStatus::DispatchFailed.as_str())
        .bind(&now)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Job counts per status, for the health endpoint.
    pub async fn count_jobs_by_status(&self) -> DbResult<Vec<(JobStatus, u64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM diagnostic_jobs GROUP BY status")
                .fetch_all(self.pool())
                .await?;
        rows.into_iter()
            .map(|(status, count)| {
                let status = JobStatus::from_db_str(&status).map_err(|e| DbError::Corrupt {
                    id: String::new(),
                    reason: e.to_string(),
                })?;
                Ok((status, count.max(0) as u64))
            })
            .collect()
    }
}
