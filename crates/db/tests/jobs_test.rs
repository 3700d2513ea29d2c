//! Integration tests for the diagnostic job store: guarded transitions,
//! atomic completion and the sweeper queries.

use bizdiag_core::{AiStatus, JobStatus, NewJob, OutputMode, Provenance, Report, Tier};
use bizdiag_db::Database;
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;

fn new_job(tier: Tier) -> NewJob {
    NewJob::new(
        Some(json!({"company": {"name": "Acme Ltd", "employees": 12}})),
        None,
        tier,
        OutputMode::Rapid,
        false,
    )
    .unwrap()
}

fn report() -> Report {
    serde_json::from_value(json!({
        "executive_summary": "Cash conversion is the binding constraint.",
        "findings": [{"title": "Slow receivables", "severity": "high", "detail": "DSO 74 days"}],
        "recommendations": ["Tighten payment terms"]
    }))
    .unwrap()
}

fn provenance(tier: Tier, attempts: u32) -> Provenance {
    let now = Utc::now();
    Provenance {
        provider: "anthropic-api".into(),
        model: "claude-test".into(),
        tier,
        output_mode: OutputMode::Rapid,
        attempts,
        started_at: now,
        generated_at: now,
        latency_ms: 1200,
        input_tokens: Some(800),
        output_tokens: Some(400),
        validation: None,
    }
}

#[tokio::test]
async fn test_create_job_defaults() {
    let db = Database::new_in_memory().await.unwrap();
    let job = db.create_job(&new_job(Tier::Prospect)).await.unwrap();

    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.tier, Tier::Prospect);
    assert_eq!(job.progress_pct, 0);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.last_event, "Queued");
    assert_eq!(job.dispatch_count, 1);
    assert!(job.started_at.is_none());
    assert!(job.report.is_none());
    assert_eq!(job.input_payload["company"]["name"], "Acme Ltd");

    let loaded = db.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(loaded, job);
}

#[tokio::test]
async fn test_get_unknown_job_is_none() {
    let db = Database::new_in_memory().await.unwrap();
    assert!(db.get_job("missing").await.unwrap().is_none());
    assert!(db.get_job_status("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_happy_path_lifecycle() {
    let db = Database::new_in_memory().await.unwrap();
    let job = db.create_job(&new_job(Tier::Full)).await.unwrap();

    assert!(db.mark_running(&job.id, "Starting analysis").await.unwrap());
    assert!(db
        .record_attempt(&job.id, 1, "claude-test", 15, "Calling model (attempt 1)")
        .await
        .unwrap());

    let running = db.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(running.status, JobStatus::Running);
    assert_eq!(running.attempts, 1);
    assert_eq!(running.progress_pct, 15);
    assert_eq!(running.ai_status.as_deref(), Some("calling"));
    assert!(running.started_at.is_some());

    assert!(db
        .complete_job(&job.id, &report(), &provenance(Tier::Full, 1))
        .await
        .unwrap());

    let done = db.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Complete);
    assert_eq!(done.progress_pct, 100);
    assert_eq!(done.ai_status.as_deref(), Some("ok"));
    assert_eq!(done.model_used.as_deref(), Some("claude-test"));
    assert_eq!(done.report, Some(report()));
    assert_eq!(done.provenance.as_ref().map(|p| p.tier), Some(Tier::Full));
    assert!(done.completed_at.is_some());
}

#[tokio::test]
async fn test_progress_never_decreases() {
    let db = Database::new_in_memory().await.unwrap();
    let job = db.create_job(&new_job(Tier::Full)).await.unwrap();
    db.mark_running(&job.id, "Starting").await.unwrap();

    db.update_progress(&job.id, 55, None, "Calling").await.unwrap();
    db.update_progress(&job.id, 20, Some(AiStatus::Overloaded), "Retrying")
        .await
        .unwrap();

    let job = db.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(job.progress_pct, 55);
    assert_eq!(job.last_event, "Retrying");
    assert_eq!(job.ai_status.as_deref(), Some("overloaded"));
}

#[tokio::test]
async fn test_cancel_queued_blocks_worker() {
    let db = Database::new_in_memory().await.unwrap();
    let job = db.create_job(&new_job(Tier::Full)).await.unwrap();

    assert!(db.cancel_job(&job.id).await.unwrap());
    assert!(
        !db.mark_running(&job.id, "Starting").await.unwrap(),
        "a cancelled job must not move back to RUNNING"
    );

    let job = db.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.ai_status.as_deref(), Some("cancelled"));
    assert!(job.started_at.is_none());
}

#[tokio::test]
async fn test_cancel_running_discards_late_result() {
    let db = Database::new_in_memory().await.unwrap();
    let job = db.create_job(&new_job(Tier::Full)).await.unwrap();
    db.mark_running(&job.id, "Starting").await.unwrap();

    assert!(db.cancel_job(&job.id).await.unwrap());
    assert!(!db
        .complete_job(&job.id, &report(), &provenance(Tier::Full, 1))
        .await
        .unwrap());
    assert!(!db
        .fail_job(&job.id, "late failure", AiStatus::Timeout, 1)
        .await
        .unwrap());

    let job = db.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.report.is_none());
    assert!(job.provenance.is_none());
}

#[tokio::test]
async fn test_cancel_terminal_is_noop() {
    let db = Database::new_in_memory().await.unwrap();

    let complete = db.create_job(&new_job(Tier::Full)).await.unwrap();
    db.mark_running(&complete.id, "Starting").await.unwrap();
    db.complete_job(&complete.id, &report(), &provenance(Tier::Full, 1))
        .await
        .unwrap();

    let failed = db.create_job(&new_job(Tier::Full)).await.unwrap();
    db.mark_running(&failed.id, "Starting").await.unwrap();
    db.fail_job(&failed.id, "backend overloaded", AiStatus::Overloaded, 3)
        .await
        .unwrap();

    assert!(!db.cancel_job(&complete.id).await.unwrap());
    assert!(!db.cancel_job(&failed.id).await.unwrap());
    assert!(!db.cancel_job("unknown-id").await.unwrap());

    assert_eq!(
        db.get_job_status(&complete.id).await.unwrap(),
        Some(JobStatus::Complete)
    );
    let failed = db.get_job(&failed.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.fail_reason.as_deref(), Some("backend overloaded"));
    assert_eq!(failed.attempts, 3);
}

#[tokio::test]
async fn test_terminal_states_reject_all_writes() {
    let db = Database::new_in_memory().await.unwrap();
    let job = db.create_job(&new_job(Tier::Full)).await.unwrap();
    db.mark_running(&job.id, "Starting").await.unwrap();
    db.fail_job(&job.id, "rejected", AiStatus::Rejected, 1)
        .await
        .unwrap();

    assert!(!db.mark_running(&job.id, "again").await.unwrap());
    assert!(!db.record_attempt(&job.id, 2, "m", 35, "x").await.unwrap());
    assert!(!db.update_progress(&job.id, 90, None, "x").await.unwrap());
    assert!(!db
        .complete_job(&job.id, &report(), &provenance(Tier::Full, 2))
        .await
        .unwrap());
    assert!(!db.bump_dispatch_count(&job.id).await.unwrap());
    assert!(!db.fail_stale_queued(&job.id, "x").await.unwrap());

    let job = db.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.fail_reason.as_deref(), Some("rejected"));
}

#[tokio::test]
async fn test_complete_requires_running() {
    let db = Database::new_in_memory().await.unwrap();
    let job = db.create_job(&new_job(Tier::Full)).await.unwrap();
    assert!(!db
        .complete_job(&job.id, &report(), &provenance(Tier::Full, 1))
        .await
        .unwrap());
    assert_eq!(
        db.get_job_status(&job.id).await.unwrap(),
        Some(JobStatus::Queued)
    );
}

#[tokio::test]
async fn test_mark_running_keeps_first_start() {
    let db = Database::new_in_memory().await.unwrap();
    let job = db.create_job(&new_job(Tier::Full)).await.unwrap();
    db.mark_running(&job.id, "Starting").await.unwrap();
    let first = db.get_job(&job.id).await.unwrap().unwrap().started_at;

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    assert!(db.mark_running(&job.id, "Resuming").await.unwrap());
    let second = db.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(second.started_at, first);
    assert_eq!(second.last_event, "Resuming");
}

#[tokio::test]
async fn test_stale_scan_and_dispatch_timeout() {
    let db = Database::new_in_memory().await.unwrap();
    let queued = db.create_job(&new_job(Tier::Full)).await.unwrap();
    let running = db.create_job(&new_job(Tier::Full)).await.unwrap();
    db.mark_running(&running.id, "Starting").await.unwrap();
    let done = db.create_job(&new_job(Tier::Full)).await.unwrap();
    db.cancel_job(&done.id).await.unwrap();

    // Nothing is older than a cutoff in the past.
    let none = db
        .find_stale_jobs(Utc::now() - Duration::minutes(5), 50)
        .await
        .unwrap();
    assert!(none.is_empty());

    let stale = db
        .find_stale_jobs(Utc::now() + Duration::seconds(1), 50)
        .await
        .unwrap();
    let ids: Vec<_> = stale.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec![queued.id.as_str(), running.id.as_str()]);
    assert_eq!(stale[0].status, JobStatus::Queued);
    assert_eq!(stale[0].dispatch_count, 1);

    assert!(db.bump_dispatch_count(&queued.id).await.unwrap());
    assert_eq!(
        db.get_job(&queued.id).await.unwrap().unwrap().dispatch_count,
        2
    );

    assert!(!db.fail_stale_queued(&running.id, "dispatch timed out").await.unwrap());
    assert!(db.fail_stale_queued(&queued.id, "dispatch timed out").await.unwrap());
    let failed = db.get_job(&queued.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.fail_reason.as_deref(), Some("dispatch timed out"));
    assert_eq!(failed.ai_status.as_deref(), Some("dispatch_failed"));
}

#[tokio::test]
async fn test_count_jobs_by_status() {
    let db = Database::new_in_memory().await.unwrap();
    let a = db.create_job(&new_job(Tier::Full)).await.unwrap();
    db.create_job(&new_job(Tier::Full)).await.unwrap();
    db.cancel_job(&a.id).await.unwrap();

    let mut counts = db.count_jobs_by_status().await.unwrap();
    counts.sort_by_key(|(s, _)| s.as_db_str());
    assert_eq!(
        counts,
        vec![(JobStatus::Cancelled, 1), (JobStatus::Queued, 1)]
    );
}

#[tokio::test]
async fn test_normalized_intake_round_trips() {
    let db = Database::new_in_memory().await.unwrap();
    let new = NewJob::new(
        Some(json!({"raw": true})),
        Some(json!({"company": {"name": "Normalized"}})),
        Tier::Premium,
        OutputMode::Deep,
        true,
    )
    .unwrap();
    let job = db.create_job(&new).await.unwrap();
    assert_eq!(job.output_mode, OutputMode::Deep);
    assert!(job.simulate_overload);
    assert_eq!(job.prompt_input()["company"]["name"], "Normalized");
}
