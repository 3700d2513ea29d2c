// crates/server/src/config.rs
//! Server configuration: command-line flags with environment fallbacks.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use bizdiag_core::llm::LlmConfig;
use bizdiag_core::RetryPolicy;
use clap::Parser;

use crate::jobs::{RunnerConfig, SweeperConfig, WorkerConfig};

#[derive(Parser, Debug, Clone)]
#[command(name = "bizdiag-server", version, about = "Business diagnostic job server")]
pub struct Config {
    /// Interface to bind.
    #[arg(long, default_value = "127.0.0.1", env = "BIZDIAG_HOST")]
    pub host: String,

    #[arg(long, default_value_t = 47900, env = "BIZDIAG_PORT")]
    pub port: u16,

    /// SQLite job store. Defaults to `<cache dir>/bizdiag/bizdiag.db`.
    #[arg(long, env = "BIZDIAG_DB_PATH")]
    pub db_path: Option<PathBuf>,

    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, default_value = "claude-sonnet-4-5", env = "BIZDIAG_LLM_MODEL")]
    pub llm_model: String,

    /// Override the Anthropic API base URL.
    #[arg(long, env = "BIZDIAG_LLM_BASE_URL")]
    pub llm_base_url: Option<String>,

    /// Per-call timeout for the LLM request.
    #[arg(long, default_value_t = 90, env = "BIZDIAG_LLM_TIMEOUT_SECS")]
    pub llm_timeout_secs: u64,

    /// LLM attempts per job, including the first.
    #[arg(long, default_value_t = 3, env = "BIZDIAG_MAX_ATTEMPTS")]
    pub max_attempts: u32,

    /// Backoff after the first failed attempt; doubles per attempt.
    #[arg(long, default_value_t = 2000, env = "BIZDIAG_RETRY_BASE_MS")]
    pub retry_base_ms: u64,

    /// Cap on a single backoff delay.
    #[arg(long, default_value_t = 30_000, env = "BIZDIAG_RETRY_MAX_MS")]
    pub retry_max_ms: u64,

    /// Jobs processed concurrently.
    #[arg(long, default_value_t = 4, env = "BIZDIAG_WORKERS")]
    pub workers: usize,

    #[arg(long, default_value_t = 256, env = "BIZDIAG_QUEUE_CAPACITY")]
    pub queue_capacity: usize,

    /// Ask the model to check each report for internal consistency.
    #[arg(long, default_value_t = false, env = "BIZDIAG_VALIDATION_PASS")]
    pub validation_pass: bool,

    #[arg(long, default_value_t = 30, env = "BIZDIAG_SWEEP_INTERVAL_SECS")]
    pub sweep_interval_secs: u64,

    /// Age after which an unfinished job counts as stale.
    #[arg(long, default_value_t = 120, env = "BIZDIAG_STALE_AFTER_SECS")]
    pub stale_after_secs: u64,

    /// Dispatches per job before a queued job is failed.
    #[arg(long, default_value_t = 3, env = "BIZDIAG_MAX_DISPATCHES")]
    pub max_dispatches: u32,

    /// Emit logs as JSON lines.
    #[arg(long, default_value_t = false, env = "BIZDIAG_LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse()
            .map_err(|e| anyhow::anyhow!("invalid bind address {addr}: {e}"))
    }

    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig {
            model: self.llm_model.clone(),
            api_key: self.api_key.clone(),
            base_url: self.llm_base_url.clone(),
            timeout_secs: self.llm_timeout_secs,
        }
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            queue_capacity: self.queue_capacity,
            worker_concurrency: self.workers,
            worker: WorkerConfig {
                retry: RetryPolicy {
                    max_attempts: self.max_attempts.max(1),
                    base_delay: Duration::from_millis(self.retry_base_ms),
                    max_delay: Duration::from_millis(self.retry_max_ms.max(self.retry_base_ms)),
                    ..RetryPolicy::default()
                },
                llm_timeout: Duration::from_secs(self.llm_timeout_secs),
                validation_pass: self.validation_pass,
            },
        }
    }

    pub fn sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
            stale_after: Duration::from_secs(self.stale_after_secs),
            max_dispatches: self.max_dispatches.max(1),
            ..SweeperConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_map_onto_runner_config() {
        let config = Config::try_parse_from([
            "bizdiag-server",
            "--max-attempts",
            "5",
            "--retry-base-ms",
            "100",
            "--workers",
            "2",
            "--validation-pass",
        ])
        .unwrap();

        let runner = config.runner_config();
        assert_eq!(runner.worker_concurrency, 2);
        assert_eq!(runner.worker.retry.max_attempts, 5);
        assert_eq!(runner.worker.retry.base_delay, Duration::from_millis(100));
        assert!(runner.worker.validation_pass);
    }

    #[test]
    fn test_zero_budgets_are_clamped() {
        let config = Config::try_parse_from([
            "bizdiag-server",
            "--max-attempts",
            "0",
            "--max-dispatches",
            "0",
        ])
        .unwrap();
        assert_eq!(config.runner_config().worker.retry.max_attempts, 1);
        assert_eq!(config.sweeper_config().max_dispatches, 1);
    }

    #[test]
    fn test_bind_addr() {
        let config =
            Config::try_parse_from(["bizdiag-server", "--host", "0.0.0.0", "--port", "8080"])
                .unwrap();
        assert_eq!(config.bind_addr().unwrap().port(), 8080);

        let bad = Config::try_parse_from(["bizdiag-server", "--host", "not a host"]).unwrap();
        assert!(bad.bind_addr().is_err());
    }
}
