// crates/core/src/lib.rs
pub mod error;
pub mod job;
pub mod llm;
pub mod paths;
pub mod prompt;
pub mod report;
pub mod retry;

pub use error::ModelError;
pub use job::{new_job_id, AiStatus, Job, JobId, JobStatus, NewJob, OutputMode, Tier};
pub use report::{parse_report, parse_validation, Finding, Provenance, Report, ValidationNote};
pub use retry::RetryPolicy;
