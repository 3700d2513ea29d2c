// crates/server/src/jobs/types.rs
//! Types for the background job system.

use std::time::Duration;

use bizdiag_core::{JobId, JobStatus, RetryPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Progress update published on every worker step and sent via SSE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress_pct: u8,
    pub last_event: String,
    pub timestamp: String,
}

/// Why a job id could not be put on the dispatch queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("dispatch queue is full")]
    QueueFull,
    #[error("dispatch queue is closed")]
    Closed,
}

/// Settings a worker runs with. The runner hands each job its own clone, so
/// changing the runner's config never affects a job already in progress.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub retry: RetryPolicy,
    /// Hard ceiling on a single LLM call, on top of the provider's own timeout.
    pub llm_timeout: Duration,
    /// Run a second completion that checks the report for consistency.
    pub validation_pass: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            llm_timeout: Duration::from_secs(90),
            validation_pass: false,
        }
    }
}

/// Dispatch queue and worker pool sizing.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    pub queue_capacity: usize,
    pub worker_concurrency: usize,
    pub worker: WorkerConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            worker_concurrency: 4,
            worker: WorkerConfig::default(),
        }
    }
}

/// Stale-job sweeper settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SweeperConfig {
    pub interval: Duration,
    pub stale_after: Duration,
    /// Dispatches allowed per job (including the first) before a queued job is failed.
    pub max_dispatches: u32,
    pub batch_size: u32,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(120),
            max_dispatches: 3,
            batch_size: 100,
        }
    }
}
