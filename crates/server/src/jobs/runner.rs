// crates/server/src/jobs/runner.rs
//! Dispatch queue and worker pool for diagnostic jobs.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use bizdiag_core::llm::LlmProvider;
use bizdiag_core::{JobId, JobStatus};
use bizdiag_db::Database;
use chrono::{SecondsFormat, Utc};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::state::JobState;
use super::types::{DispatchError, JobProgress, RunnerConfig, WorkerConfig};
use super::worker::Worker;

/// Central job runner.
///
/// Submissions enqueue job ids with [`JobRunner::dispatch`], which never
/// waits on a worker. A single dispatch loop (started by [`JobRunner::start`])
/// drains the queue and spawns one task per job, bounded by a semaphore.
/// Ids already in flight are skipped, so at most one worker per job runs in
/// this process. An id counts as tracked from a successful dispatch until its
/// worker finishes, including the time it waits in the queue or on a permit.
pub struct JobRunner {
    db: Database,
    provider: Arc<dyn LlmProvider>,
    worker_config: RwLock<WorkerConfig>,
    queue_tx: mpsc::Sender<JobId>,
    queue_rx: Mutex<Option<mpsc::Receiver<JobId>>>,
    pending: RwLock<HashSet<JobId>>,
    in_flight: RwLock<HashMap<JobId, Arc<JobState>>>,
    global_tx: broadcast::Sender<JobProgress>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl JobRunner {
    pub fn new(db: Database, provider: Arc<dyn LlmProvider>, config: RunnerConfig) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (global_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            db,
            provider,
            worker_config: RwLock::new(config.worker),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            pending: RwLock::new(HashSet::new()),
            in_flight: RwLock::new(HashMap::new()),
            global_tx,
            permits: Arc::new(Semaphore::new(config.worker_concurrency.max(1))),
            shutdown: CancellationToken::new(),
        })
    }

    /// Put a job id on the dispatch queue without waiting. An id that is
    /// already waiting for a worker is not queued twice.
    pub fn dispatch(&self, job_id: &str) -> Result<(), DispatchError> {
        match self.pending.write() {
            Ok(mut pending) => {
                if !pending.insert(job_id.to_string()) {
                    tracing::debug!(job_id, "Job already waiting for a worker");
                    return Ok(());
                }
            }
            Err(e) => tracing::error!("RwLock poisoned writing pending set: {e}"),
        }

        self.queue_tx.try_send(job_id.to_string()).map_err(|e| {
            self.clear_pending(job_id);
            match e {
                TrySendError::Full(_) => DispatchError::QueueFull,
                TrySendError::Closed(_) => DispatchError::Closed,
            }
        })
    }

    fn clear_pending(&self, job_id: &str) {
        match self.pending.write() {
            Ok(mut pending) => {
                pending.remove(job_id);
            }
            Err(e) => tracing::error!("RwLock poisoned writing pending set: {e}"),
        }
    }

    /// Spawn the dispatch loop. Returns `None` if it was already started.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let rx = match self.queue_rx.lock() {
            Ok(mut guard) => guard.take()?,
            Err(e) => {
                tracing::error!("Mutex poisoned taking dispatch queue: {e}");
                return None;
            }
        };
        let runner = Arc::clone(self);
        Some(tokio::spawn(runner.dispatch_loop(rx)))
    }

    async fn dispatch_loop(self: Arc<Self>, mut rx: mpsc::Receiver<JobId>) {
        tracing::info!("Dispatch loop started");
        loop {
            let job_id = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(id) => id,
                    None => break,
                },
            };

            if self.is_in_flight(&job_id) {
                tracing::debug!(job_id = %job_id, "Job already in flight, skipping dispatch");
                self.clear_pending(&job_id);
                continue;
            }

            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            // Register before clearing pending so the id is never untracked.
            let registered = self.register(&job_id);
            self.clear_pending(&job_id);
            let Some(state) = registered else {
                continue;
            };
            let worker = Worker::new(
                self.db.clone(),
                Arc::clone(&self.provider),
                self.worker_config(),
                Arc::clone(&state),
            );
            let guard = InFlightGuard {
                runner: Arc::clone(&self),
                job_id,
            };
            tokio::spawn(async move {
                let _guard = guard;
                let _permit = permit;
                worker.run().await;
            });
        }
        tracing::info!("Dispatch loop stopped");
    }

    fn register(&self, job_id: &str) -> Option<Arc<JobState>> {
        match self.in_flight.write() {
            Ok(mut jobs) => {
                if jobs.contains_key(job_id) {
                    return None;
                }
                let state = Arc::new(JobState::new(job_id.to_string(), self.global_tx.clone()));
                jobs.insert(job_id.to_string(), Arc::clone(&state));
                Some(state)
            }
            Err(e) => {
                tracing::error!("RwLock poisoned writing in-flight map: {e}");
                None
            }
        }
    }

    fn unregister(&self, job_id: &str) {
        match self.in_flight.write() {
            Ok(mut jobs) => {
                jobs.remove(job_id);
            }
            Err(e) => tracing::error!("RwLock poisoned writing in-flight map: {e}"),
        }
    }

    /// Signal an in-flight worker that its job was cancelled and tell stream
    /// subscribers. Returns true if a worker was running the job here.
    pub fn cancel(&self, job_id: &str) -> bool {
        let state = match self.in_flight.read() {
            Ok(jobs) => jobs.get(job_id).cloned(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading in-flight map: {e}");
                None
            }
        };
        match state {
            Some(state) => {
                state.cancel();
                state.finish(JobStatus::Cancelled, "Cancelled");
                true
            }
            None => {
                let _ = self.global_tx.send(JobProgress {
                    job_id: job_id.to_string(),
                    status: JobStatus::Cancelled,
                    progress_pct: 0,
                    last_event: "Cancelled".to_string(),
                    timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                });
                false
            }
        }
    }

    pub fn is_in_flight(&self, job_id: &str) -> bool {
        match self.in_flight.read() {
            Ok(jobs) => jobs.contains_key(job_id),
            Err(e) => {
                tracing::error!("RwLock poisoned reading in-flight map: {e}");
                false
            }
        }
    }

    /// True while the job is queued here, waiting for a permit or running.
    pub fn is_tracked(&self, job_id: &str) -> bool {
        let pending = match self.pending.read() {
            Ok(pending) => pending.contains(job_id),
            Err(e) => {
                tracing::error!("RwLock poisoned reading pending set: {e}");
                false
            }
        };
        pending || self.is_in_flight(job_id)
    }

    /// Subscribe to all job progress updates (for SSE streaming).
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgress> {
        self.global_tx.subscribe()
    }

    /// Snapshots of every job a worker is handling right now.
    pub fn active_jobs(&self) -> Vec<JobProgress> {
        match self.in_flight.read() {
            Ok(jobs) => jobs.values().map(|s| s.snapshot()).collect(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading in-flight map: {e}");
                Vec::new()
            }
        }
    }

    /// The config the next job will start with.
    pub fn worker_config(&self) -> WorkerConfig {
        match self.worker_config.read() {
            Ok(cfg) => cfg.clone(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading worker config: {e}");
                WorkerConfig::default()
            }
        }
    }

    /// Replace the worker config. Jobs already running keep their snapshot.
    pub fn set_worker_config(&self, config: WorkerConfig) {
        match self.worker_config.write() {
            Ok(mut cfg) => *cfg = config,
            Err(e) => tracing::error!("RwLock poisoned writing worker config: {e}"),
        }
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Stop the dispatch loop. In-flight workers run to completion.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

struct InFlightGuard {
    runner: Arc<JobRunner>,
    job_id: JobId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.runner.unregister(&self.job_id);
    }
}
