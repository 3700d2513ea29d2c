// crates/core/src/llm/provider.rs
//! LlmProvider trait defining the interface for LLM integrations.

use async_trait::async_trait;

use super::types::{CompletionRequest, CompletionResponse, LlmError};

/// Trait for LLM backends the worker can call.
///
/// Implementations include:
/// - `AnthropicProvider`: Anthropic Messages API over HTTPS
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run a completion with system + user prompt and a token budget.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Check if the provider is usable (API key set, etc.)
    async fn health_check(&self) -> Result<(), LlmError>;

    /// Provider name for logging/provenance (e.g. "anthropic-api").
    fn name(&self) -> &str;

    /// Model identifier (e.g. "claude-sonnet-4-5").
    fn model(&self) -> &str;
}
