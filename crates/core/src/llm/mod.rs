// crates/core/src/llm/mod.rs
//! LLM integration module for report generation.
//!
//! Provides the `LlmProvider` trait and the HTTP provider the worker calls
//! to turn an intake bundle into a structured report.

pub mod anthropic;
pub mod config;
pub mod factory;
pub mod provider;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use config::LlmConfig;
pub use factory::create_provider;
pub use provider::LlmProvider;
pub use types::{CompletionRequest, CompletionResponse, LlmError};
