// crates/core/src/job.rs
//! Diagnostic job model and its status state machine.
//!
//! ```text
//! QUEUED ──► RUNNING ──► COMPLETE
//!   │           │
//!   │           ├──────► FAILED
//!   │           │
//!   ├───────────┴──────► CANCELLED
//!   │
//!   └──────────────────► FAILED   (dispatch timeout, sweeper only)
//! ```
//!
//! No edge leaves a terminal state. The SQL guards in the job store mirror
//! [`JobStatus::can_transition_to`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ModelError;
use crate::report::{Provenance, Report};

/// Opaque job identifier (UUID v4 string).
pub type JobId = String;

/// Allocate a fresh job identifier.
pub fn new_job_id() -> JobId {
    uuid::Uuid::new_v4().to_string()
}

/// Lifecycle status of a diagnostic job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Statuses from which a cancellation request takes effect.
    pub const CANCELLABLE: [JobStatus; 2] = [JobStatus::Queued, JobStatus::Running];

    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, ModelError> {
        match s {
            "QUEUED" => Ok(Self::Queued),
            "RUNNING" => Ok(Self::Running),
            "COMPLETE" => Ok(Self::Complete),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(ModelError::UnknownStatus(other.to_string())),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is an edge of the job state machine.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Queued, Failed)
                | (Running, Complete)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// Depth-of-analysis level. Selects the system prompt and token budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Prospect,
    #[default]
    Full,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prospect => "prospect",
            Self::Full => "full",
            Self::Premium => "premium",
        }
    }
}

impl FromStr for Tier {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prospect" => Ok(Self::Prospect),
            "full" => Ok(Self::Full),
            "premium" => Ok(Self::Premium),
            _ => Err(ModelError::UnknownTier(s.to_string())),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much report detail the caller asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Rapid,
    Deep,
}

impl OutputMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rapid => "rapid",
            Self::Deep => "deep",
        }
    }
}

impl FromStr for OutputMode {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rapid" => Ok(Self::Rapid),
            "deep" => Ok(Self::Deep),
            _ => Err(ModelError::UnknownOutputMode(s.to_string())),
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic metadata about the most recent LLM attempt, stored as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiStatus {
    Pending,
    Calling,
    RateLimited,
    Overloaded,
    Timeout,
    TransportError,
    ParseError,
    Rejected,
    Ok,
    Cancelled,
    DispatchFailed,
}

impl AiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Calling => "calling",
            Self::RateLimited => "rate_limited",
            Self::Overloaded => "overloaded",
            Self::Timeout => "timeout",
            Self::TransportError => "transport_error",
            Self::ParseError => "parse_error",
            Self::Rejected => "rejected",
            Self::Ok => "ok",
            Self::Cancelled => "cancelled",
            Self::DispatchFailed => "dispatch_failed",
        }
    }
}

impl fmt::Display for AiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated submission, ready to be persisted as a `QUEUED` job.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub tier: Tier,
    pub output_mode: OutputMode,
    pub input_payload: Value,
    pub normalized_intake: Option<Value>,
    pub simulate_overload: bool,
}

impl NewJob {
    /// Validate the intake bundle. `input_payload` must be a non-empty object;
    /// `normalized_intake`, when given, must be an object (an empty one is dropped).
    pub fn new(
        input_payload: Option<Value>,
        normalized_intake: Option<Value>,
        tier: Tier,
        output_mode: OutputMode,
        simulate_overload: bool,
    ) -> Result<Self, ModelError> {
        let input_payload = match input_payload {
            Some(Value::Object(map)) if !map.is_empty() => Value::Object(map),
            Some(Value::Object(_)) => {
                return Err(ModelError::invalid_payload("wizardData must not be empty"))
            }
            Some(Value::Null) | None => {
                return Err(ModelError::invalid_payload("wizardData is required"))
            }
            Some(_) => return Err(ModelError::invalid_payload("wizardData must be an object")),
        };

        let normalized_intake = match normalized_intake {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) if map.is_empty() => None,
            Some(Value::Object(map)) => Some(Value::Object(map)),
            Some(_) => {
                return Err(ModelError::invalid_payload(
                    "normalizedIntake must be an object",
                ))
            }
        };

        Ok(Self {
            tier,
            output_mode,
            input_payload,
            normalized_intake,
            simulate_overload,
        })
    }
}

/// A diagnostic job as stored in the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub tier: Tier,
    pub output_mode: OutputMode,
    pub input_payload: Value,
    pub normalized_intake: Option<Value>,
    pub simulate_overload: bool,
    pub progress_pct: u8,
    pub last_event: String,
    pub attempts: u32,
    pub ai_status: Option<String>,
    pub model_used: Option<String>,
    pub fail_reason: Option<String>,
    pub report: Option<Report>,
    pub provenance: Option<Provenance>,
    pub dispatch_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// The intake the prompt is built from: the normalized bundle when the
    /// client sent one, the raw wizard data otherwise.
    pub fn prompt_input(&self) -> &Value {
        self.normalized_intake.as_ref().unwrap_or(&self.input_payload)
    }
}
