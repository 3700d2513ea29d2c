// crates/core/src/llm/types.rs
//! Request/response/error types for LLM integration.

use std::time::Duration;

use thiserror::Error;

use crate::job::AiStatus;

/// Request for a general-purpose LLM completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Response from a general-purpose LLM completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub model: Option<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub latency_ms: u64,
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Rate limited{}", fmt_retry_after(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Backend overloaded: {0}")]
    Overloaded(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    ParseFailed(String),

    #[error("Invalid response format: {0}")]
    InvalidFormat(String),

    #[error("Provider not available: {0}")]
    NotAvailable(String),
}

fn fmt_retry_after(secs: &Option<u64>) -> String {
    match secs {
        Some(s) => format!(", retry after {s} seconds"),
        None => String::new(),
    }
}

impl LlmError {
    /// Transport, timeout, rate-limit, overload and parse failures are worth
    /// another attempt; configuration and request rejections are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_)
            | Self::Timeout(_)
            | Self::RateLimited { .. }
            | Self::Overloaded(_)
            | Self::ParseFailed(_)
            | Self::InvalidFormat(_) => true,
            Self::Api { .. } | Self::NotAvailable(_) => false,
        }
    }

    /// Server-suggested wait before retrying, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                retry_after_secs: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }

    /// The `ai_status` recorded on the job after this failure.
    pub fn ai_status(&self) -> AiStatus {
        match self {
            Self::Transport(_) => AiStatus::TransportError,
            Self::Timeout(_) => AiStatus::Timeout,
            Self::RateLimited { .. } => AiStatus::RateLimited,
            Self::Overloaded(_) => AiStatus::Overloaded,
            Self::ParseFailed(_) | Self::InvalidFormat(_) => AiStatus::ParseError,
            Self::Api { .. } | Self::NotAvailable(_) => AiStatus::Rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_display() {
        let err = LlmError::Timeout(30);
        assert_eq!(err.to_string(), "Timeout after 30 seconds");

        let err = LlmError::RateLimited {
            retry_after_secs: Some(60),
        };
        assert_eq!(err.to_string(), "Rate limited, retry after 60 seconds");

        let err = LlmError::RateLimited {
            retry_after_secs: None,
        };
        assert_eq!(err.to_string(), "Rate limited");

        let err = LlmError::Api {
            status: 401,
            message: "invalid x-api-key".into(),
        };
        assert_eq!(err.to_string(), "API error 401: invalid x-api-key");
    }

    #[test]
    fn test_retry_classification() {
        assert!(LlmError::Transport("reset".into()).is_retryable());
        assert!(LlmError::Overloaded("529".into()).is_retryable());
        assert!(LlmError::InvalidFormat("no summary".into()).is_retryable());
        assert!(!LlmError::NotAvailable("no key".into()).is_retryable());
        assert!(!LlmError::Api {
            status: 400,
            message: "bad".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_retry_after_only_for_rate_limits() {
        let err = LlmError::RateLimited {
            retry_after_secs: Some(7),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(LlmError::Timeout(5).retry_after(), None);
    }

    #[test]
    fn test_ai_status_mapping() {
        assert_eq!(LlmError::Overloaded("x".into()).ai_status(), AiStatus::Overloaded);
        assert_eq!(LlmError::ParseFailed("x".into()).ai_status(), AiStatus::ParseError);
        assert_eq!(
            LlmError::NotAvailable("x".into()).ai_status().as_str(),
            "rejected"
        );
    }
}
