//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use bizdiag_db::Database;

use crate::jobs::JobRunner;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Job store.
    pub db: Database,
    /// Dispatch queue and worker pool. Submission enqueues here and never waits.
    pub runner: Arc<JobRunner>,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    pub fn new(db: Database, runner: Arc<JobRunner>) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            db,
            runner,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
