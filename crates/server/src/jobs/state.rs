// crates/server/src/jobs/state.rs
//! In-process state for a single in-flight job.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::RwLock;

use bizdiag_core::{JobId, JobStatus};
use chrono::{SecondsFormat, Utc};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::types::JobProgress;

/// Live state for a job a worker is handling in this process.
///
/// Mirrors what the worker writes to the job store so SSE subscribers get
/// updates without polling, and carries the cancel signal the cancellation
/// endpoint fires.
pub struct JobState {
    id: JobId,
    status: RwLock<JobStatus>,
    progress_pct: AtomicU8,
    last_event: RwLock<String>,
    cancel: CancellationToken,
    progress_tx: broadcast::Sender<JobProgress>,
}

impl JobState {
    pub fn new(id: JobId, progress_tx: broadcast::Sender<JobProgress>) -> Self {
        Self {
            id,
            status: RwLock::new(JobStatus::Queued),
            progress_pct: AtomicU8::new(0),
            last_event: RwLock::new("Queued".to_string()),
            cancel: CancellationToken::new(),
            progress_tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Transition to Running and broadcast.
    pub fn set_running(&self, progress_pct: u8, event: impl Into<String>) {
        self.set_status(JobStatus::Running);
        self.set_progress(progress_pct, event);
    }

    /// Raise progress (never lowers it), replace the event line and broadcast.
    pub fn set_progress(&self, progress_pct: u8, event: impl Into<String>) {
        self.progress_pct
            .fetch_max(progress_pct.min(100), Ordering::Relaxed);
        self.set_event(event);
        self.broadcast_progress();
    }

    /// Record a terminal status and broadcast.
    pub fn finish(&self, status: JobStatus, event: impl Into<String>) {
        if status == JobStatus::Complete {
            self.progress_pct.store(100, Ordering::Relaxed);
        }
        self.set_status(status);
        self.set_event(event);
        self.broadcast_progress();
    }

    /// Fire the cancel signal. Workers observe it between attempts.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token for `select!`-ing on cancellation during backoff sleeps.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn snapshot(&self) -> JobProgress {
        JobProgress {
            job_id: self.id.clone(),
            status: match self.status.read() {
                Ok(g) => *g,
                Err(e) => {
                    tracing::error!("RwLock poisoned reading status: {e}");
                    JobStatus::Running
                }
            },
            progress_pct: self.progress_pct.load(Ordering::Relaxed),
            last_event: match self.last_event.read() {
                Ok(g) => g.clone(),
                Err(e) => {
                    tracing::error!("RwLock poisoned reading last_event: {e}");
                    String::new()
                }
            },
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    fn set_status(&self, status: JobStatus) {
        match self.status.write() {
            Ok(mut guard) => *guard = status,
            Err(e) => tracing::error!("RwLock poisoned writing status: {e}"),
        }
    }

    fn set_event(&self, event: impl Into<String>) {
        match self.last_event.write() {
            Ok(mut guard) => *guard = event.into(),
            Err(e) => tracing::error!("RwLock poisoned writing last_event: {e}"),
        }
    }

    fn broadcast_progress(&self) {
        // No subscribers is fine.
        let _ = self.progress_tx.send(self.snapshot());
    }
}
