// crates/server/src/jobs/mod.rs
//! Background job system for diagnostic jobs.
//!
//! Provides:
//! - `JobRunner`: dispatch queue, bounded worker pool, in-flight tracking
//! - `Worker`: runs one job through the LLM retry loop
//! - `JobState`: live progress and cancel signal per in-flight job
//! - sweeper: re-dispatches or fails jobs whose dispatch was lost

pub mod runner;
pub mod state;
pub mod sweeper;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use runner::JobRunner;
pub use state::JobState;
pub use sweeper::{spawn_sweeper, sweep_once, SweepReport};
pub use types::{DispatchError, JobProgress, RunnerConfig, SweeperConfig, WorkerConfig};
pub use worker::Worker;
