// crates/client/src/error.rs
use bizdiag_core::JobStatus;
use thiserror::Error;

/// Errors returned by the diagnostics API client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job not complete yet ({status}, {progress_pct}%)")]
    NotReady { status: JobStatus, progress_pct: u8 },

    #[error("Server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// Failures worth another poll: connection problems, timeouts and
    /// server-side errors. Client mistakes and missing jobs are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Api { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            Self::InvalidUrl(_)
            | Self::NotFound(_)
            | Self::NotReady { .. }
            | Self::InvalidResponse(_) => false,
        }
    }
}
