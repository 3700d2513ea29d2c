// crates/server/src/jobs/sweeper.rs
//! Stale-job sweeper: recovers jobs whose dispatch was lost.
//!
//! A job can sit in `QUEUED` forever if its dispatch failed (queue full) or
//! the process restarted before a worker picked it up. A `RUNNING` job can be
//! orphaned by a crash mid-attempt. The sweeper re-dispatches both, up to
//! `max_dispatches` times per job, and fails queued jobs beyond that.
//! Jobs this process still holds (queued, waiting on a permit, or running)
//! are never touched, however long they have waited.

use std::sync::Arc;

use bizdiag_core::JobStatus;
use bizdiag_db::{Database, DbResult};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::runner::JobRunner;
use super::types::SweeperConfig;
use crate::metrics;

pub const DISPATCH_TIMEOUT_REASON: &str = "dispatch timed out";

/// What one sweep did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Spawn the periodic sweeper. The first sweep runs immediately so jobs
/// queued before a restart are recovered at startup.
pub fn spawn_sweeper(
    db: Database,
    runner: Arc<JobRunner>,
    config: SweeperConfig,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match sweep_once(&db, &runner, &config, Utc::now()).await {
                Ok(report) if report.requeued + report.failed > 0 => {
                    tracing::info!(
                        requeued = report.requeued,
                        failed = report.failed,
                        skipped = report.skipped,
                        "Stale-job sweep"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Stale-job sweep failed"),
            }
        }
        tracing::info!("Sweeper stopped");
    })
}

/// Run one sweep against jobs untouched since `now - stale_after`.
pub async fn sweep_once(
    db: &Database,
    runner: &JobRunner,
    config: &SweeperConfig,
    now: DateTime<Utc>,
) -> DbResult<SweepReport> {
    let stale_after = chrono::Duration::from_std(config.stale_after)
        .unwrap_or_else(|_| chrono::Duration::seconds(120));
    let cutoff = now - stale_after;
    let mut report = SweepReport::default();

    for stale in db.find_stale_jobs(cutoff, config.batch_size).await? {
        if runner.is_tracked(&stale.id) {
            report.skipped += 1;
            continue;
        }

        if stale.dispatch_count >= config.max_dispatches {
            if stale.status == JobStatus::Queued {
                if db.fail_stale_queued(&stale.id, DISPATCH_TIMEOUT_REASON).await? {
                    metrics::record_job_finished(JobStatus::Failed, std::time::Duration::ZERO);
                    tracing::warn!(
                        job_id = %stale.id,
                        dispatch_count = stale.dispatch_count,
                        "Queued job never picked up, marked failed"
                    );
                    report.failed += 1;
                }
            } else {
                tracing::warn!(
                    job_id = %stale.id,
                    dispatch_count = stale.dispatch_count,
                    "Running job exceeded re-dispatch budget, leaving as is"
                );
                report.skipped += 1;
            }
            continue;
        }

        match runner.dispatch(&stale.id) {
            Ok(()) => {
                db.bump_dispatch_count(&stale.id).await?;
                tracing::info!(
                    job_id = %stale.id,
                    status = %stale.status,
                    dispatch_count = stale.dispatch_count + 1,
                    "Re-dispatched stale job"
                );
                report.requeued += 1;
            }
            Err(e) => {
                metrics::record_dispatch_failure();
                tracing::warn!(job_id = %stale.id, error = %e, "Re-dispatch failed, will retry next sweep");
                report.skipped += 1;
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::test_support::{ScriptedProvider, Step};
    use crate::jobs::types::RunnerConfig;
    use bizdiag_core::{NewJob, OutputMode, Tier};
    use serde_json::json;
    use std::time::Duration;

    fn runner_for(db: &Database, queue_capacity: usize) -> (Database, Arc<JobRunner>) {
        let runner = JobRunner::new(
            db.clone(),
            Arc::new(ScriptedProvider::new(vec![])),
            RunnerConfig {
                queue_capacity,
                ..RunnerConfig::default()
            },
        );
        (db.clone(), runner)
    }

    async fn setup(queue_capacity: usize) -> (Database, Arc<JobRunner>) {
        let db = Database::new_in_memory().await.unwrap();
        runner_for(&db, queue_capacity)
    }

    async fn queued(db: &Database) -> String {
        let new = NewJob::new(
            Some(json!({"company": "Acme"})),
            None,
            Tier::Full,
            OutputMode::Rapid,
            false,
        )
        .unwrap();
        db.create_job(&new).await.unwrap().id
    }

    fn later() -> DateTime<Utc> {
        Utc::now() + chrono::Duration::minutes(10)
    }

    #[tokio::test]
    async fn test_fresh_jobs_are_left_alone() {
        let (db, runner) = setup(16).await;
        queued(&db).await;
        let report = sweep_once(&db, &runner, &SweeperConfig::default(), Utc::now())
            .await
            .unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn test_lost_queued_job_is_requeued_then_failed() {
        let (db, _runner) = setup(16).await;
        let id = queued(&db).await;
        let config = SweeperConfig::default();

        // Each sweep runs against a fresh runner, as after a restart that
        // dropped the queue. dispatch_count 1 -> 2 -> 3, then the budget is spent.
        for expected in [2, 3] {
            let (_, runner) = runner_for(&db, 16);
            let report = sweep_once(&db, &runner, &config, later()).await.unwrap();
            assert_eq!(report.requeued, 1);
            let job = db.get_job(&id).await.unwrap().unwrap();
            assert_eq!(job.dispatch_count, expected);
            assert_eq!(job.status, JobStatus::Queued);
        }

        let (_, runner) = runner_for(&db, 16);
        let report = sweep_once(&db, &runner, &config, later()).await.unwrap();
        assert_eq!(report.failed, 1);
        let job = db.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.fail_reason.as_deref(), Some(DISPATCH_TIMEOUT_REASON));
        assert_eq!(job.ai_status.as_deref(), Some("dispatch_failed"));
    }

    #[tokio::test]
    async fn test_requeued_job_is_not_dispatched_again_while_pending() {
        let (db, runner) = setup(16).await;
        let id = queued(&db).await;
        let config = SweeperConfig::default();

        assert_eq!(sweep_once(&db, &runner, &config, later()).await.unwrap().requeued, 1);
        // Nothing drains the queue, but the job is still held here.
        for _ in 0..3 {
            let report = sweep_once(&db, &runner, &config, later()).await.unwrap();
            assert_eq!(report.skipped, 1);
        }
        let job = db.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.dispatch_count, 2);
    }

    #[tokio::test]
    async fn test_backlogged_job_waiting_for_worker_is_not_failed() {
        let db = Database::new_in_memory().await.unwrap();
        let runner = JobRunner::new(
            db.clone(),
            Arc::new(ScriptedProvider::new(vec![
                Step::Delayed(Duration::from_millis(300), "Long one."),
                Step::Report("Waited its turn."),
            ])),
            RunnerConfig {
                worker_concurrency: 1,
                ..RunnerConfig::default()
            },
        );
        runner.start().unwrap();

        let long = queued(&db).await;
        let waiting = queued(&db).await;
        runner.dispatch(&long).unwrap();
        runner.dispatch(&waiting).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!runner.is_in_flight(&waiting));

        let config = SweeperConfig::default();
        for _ in 0..3 {
            let report = sweep_once(&db, &runner, &config, later()).await.unwrap();
            assert_eq!(report.requeued + report.failed, 0);
        }
        let job = db.get_job(&waiting).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.dispatch_count, 1);

        for id in [&long, &waiting] {
            let mut status = None;
            for _ in 0..200 {
                status = db.get_job_status(id).await.unwrap();
                if status.is_some_and(|s| s.is_terminal()) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert_eq!(status, Some(JobStatus::Complete));
        }
    }

    #[tokio::test]
    async fn test_full_queue_defers_requeue() {
        let (db, runner) = setup(1).await;
        runner.dispatch("occupying-the-only-slot").unwrap();
        let id = queued(&db).await;

        let report = sweep_once(&db, &runner, &SweeperConfig::default(), later())
            .await
            .unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(db.get_job(&id).await.unwrap().unwrap().dispatch_count, 1);
    }

    #[tokio::test]
    async fn test_orphaned_running_job_is_requeued() {
        let (db, runner) = setup(16).await;
        let id = queued(&db).await;
        db.mark_running(&id, "Starting analysis").await.unwrap();

        let report = sweep_once(&db, &runner, &SweeperConfig::default(), later())
            .await
            .unwrap();
        assert_eq!(report.requeued, 1);
        let job = db.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.dispatch_count, 2);
    }

    #[tokio::test]
    async fn test_terminal_jobs_are_ignored() {
        let (db, runner) = setup(16).await;
        let id = queued(&db).await;
        db.cancel_job(&id).await.unwrap();

        let report = sweep_once(&db, &runner, &SweeperConfig::default(), later())
            .await
            .unwrap();
        assert_eq!(report, SweepReport::default());
        assert_eq!(
            db.get_job_status(&id).await.unwrap(),
            Some(JobStatus::Cancelled)
        );
    }
}
