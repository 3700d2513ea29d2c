// crates/core/src/retry.rs
//! Retry policy for LLM attempts.

use std::time::Duration;

use crate::llm::LlmError;

/// Configuration for worker retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total LLM attempts per job, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Cap on any single delay, including server-provided `retry-after`.
    pub max_delay: Duration,
    /// Growth factor per failed attempt.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that retries without sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Whether another attempt should follow failed attempt number `attempt` (1-based).
    pub fn should_retry(&self, attempt: u32, error: &LlmError) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }

    /// Wait after failed attempt number `attempt` (1-based). A server-provided
    /// `retry_after` wins over the computed backoff.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(server_delay) = retry_after {
            return server_delay.min(self.max_delay);
        }
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }
}
