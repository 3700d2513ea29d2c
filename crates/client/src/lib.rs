// crates/client/src/lib.rs
//! Client for the bizdiag diagnostics API: submit jobs, read status and
//! results, cancel, and poll a job to completion.

pub mod api;
pub mod client;
pub mod error;
pub mod poller;

pub use api::{JobApi, JobResultView, JobStatusView, Submission};
pub use client::DiagnosticsClient;
pub use error::ClientError;
pub use poller::{JobOutcome, PollError, PollOptions, Poller};
