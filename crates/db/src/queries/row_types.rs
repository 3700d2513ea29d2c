// crates/db/src/queries/row_types.rs
// Internal row type for diagnostic_jobs and its conversion into the core model.

use bizdiag_core::{Job, JobStatus, ModelError, OutputMode, Provenance, Report, Tier};
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::{DbError, DbResult};

#[derive(Debug)]
pub(crate) struct JobRow {
    id: String,
    status: String,
    tier: String,
    output_mode: String,
    input_payload: String,
    normalized_intake: Option<String>,
    simulate_overload: bool,
    progress_pct: i64,
    last_event: String,
    attempts: i64,
    ai_status: Option<String>,
    model_used: Option<String>,
    fail_reason: Option<String>,
    report: Option<String>,
    provenance: Option<String>,
    dispatch_count: i64,
    created_at: String,
    started_at: Option<String>,
    updated_at: String,
    completed_at: Option<String>,
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for JobRow {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            status: row.try_get("status")?,
            tier: row.try_get("tier")?,
            output_mode: row.try_get("output_mode")?,
            input_payload: row.try_get("input_payload")?,
            normalized_intake: row.try_get("normalized_intake")?,
            simulate_overload: row.try_get("simulate_overload")?,
            progress_pct: row.try_get("progress_pct")?,
            last_event: row.try_get("last_event")?,
            attempts: row.try_get("attempts")?,
            ai_status: row.try_get("ai_status")?,
            model_used: row.try_get("model_used")?,
            fail_reason: row.try_get("fail_reason")?,
            report: row.try_get("report")?,
            provenance: row.try_get("provenance")?,
            dispatch_count: row.try_get("dispatch_count")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

impl JobRow {
    pub(crate) fn into_job(self) -> DbResult<Job> {
        let id = self.id;
        let corrupt = |reason: String| DbError::Corrupt {
            id: id.clone(),
            reason,
        };

        let status = JobStatus::from_db_str(&self.status).map_err(|e| corrupt(e.to_string()))?;
        let tier: Tier = self.tier.parse().map_err(|e: ModelError| corrupt(e.to_string()))?;
        let output_mode: OutputMode = self
            .output_mode
            .parse()
            .map_err(|e: ModelError| corrupt(e.to_string()))?;

        let report = self
            .report
            .as_deref()
            .map(serde_json::from_str::<Report>)
            .transpose()?;
        let provenance = self
            .provenance
            .as_deref()
            .map(serde_json::from_str::<Provenance>)
            .transpose()?;

        let created_at = parse_time(&self.created_at).map_err(&corrupt)?;
        let updated_at = parse_time(&self.updated_at).map_err(&corrupt)?;
        let started_at = parse_opt_time(self.started_at.as_deref()).map_err(&corrupt)?;
        let completed_at = parse_opt_time(self.completed_at.as_deref()).map_err(&corrupt)?;

        Ok(Job {
            id,
            status,
            tier,
            output_mode,
            input_payload: serde_json::from_str(&self.input_payload)?,
            normalized_intake: self
                .normalized_intake
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            simulate_overload: self.simulate_overload,
            progress_pct: self.progress_pct.clamp(0, 100) as u8,
            last_event: self.last_event,
            attempts: self.attempts.max(0) as u32,
            ai_status: self.ai_status,
            model_used: self.model_used,
            fail_reason: self.fail_reason,
            report,
            provenance,
            dispatch_count: self.dispatch_count.max(0) as u32,
            created_at,
            started_at,
            updated_at,
            completed_at,
        })
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp {s:?}: {e}"))
}

fn parse_opt_time(s: Option<&str>) -> Result<Option<DateTime<Utc>>, String> {
    s.map(parse_time).transpose()
}
