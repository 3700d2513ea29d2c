// crates/core/src/llm/factory.rs
//! Provider factory: creates an LlmProvider from configuration.

use std::sync::Arc;

use super::anthropic::AnthropicProvider;
use super::config::LlmConfig;
use super::provider::LlmProvider;
use super::types::LlmError;

/// Create an LLM provider based on the given configuration.
///
/// Fails with `NotAvailable` when no API key is configured, so a
/// misconfigured server refuses to start instead of failing every job.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let api_key = config
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| LlmError::NotAvailable("ANTHROPIC_API_KEY is not set".into()))?;

    let mut provider =
        AnthropicProvider::new(api_key, &config.model).with_timeout(config.timeout_secs);
    if let Some(base_url) = &config.base_url {
        provider = provider.with_base_url(base_url);
    }
    Ok(Arc::new(provider))
}
