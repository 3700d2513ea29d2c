// crates/server/src/test_util.rs
//! Shared fixtures for router tests.

use std::sync::Arc;

use bizdiag_db::Database;

use crate::jobs::test_support::ScriptedProvider;
use crate::jobs::{JobRunner, RunnerConfig};
use crate::state::AppState;

/// App state over an in-memory store. The dispatch loop is never started,
/// so submitted jobs stay `QUEUED`.
pub async fn test_state() -> Arc<AppState> {
    test_state_with(RunnerConfig::default()).await
}

pub async fn test_state_with(config: RunnerConfig) -> Arc<AppState> {
    let db = Database::new_in_memory().await.unwrap();
    let runner = JobRunner::new(db.clone(), Arc::new(ScriptedProvider::new(vec![])), config);
    AppState::new(db, runner)
}
