// crates/core/src/error.rs
use thiserror::Error;

/// Errors raised while building or decoding the job data model.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("Unknown tier: {0}")]
    UnknownTier(String),

    #[error("Unknown output mode: {0}")]
    UnknownOutputMode(String),

    #[error("Unknown job status: {0}")]
    UnknownStatus(String),

    #[error("Invalid intake payload: {0}")]
    InvalidPayload(String),
}

impl ModelError {
    pub fn invalid_payload(reason: impl Into<String>) -> Self {
        Self::InvalidPayload(reason.into())
    }
}
