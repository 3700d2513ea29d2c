// crates/core/src/llm/config.rs
//! LLM provider configuration types.

/// Configuration for an LLM provider instance.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".into(),
            api_key: None,
            base_url: None,
            timeout_secs: 90,
        }
    }
}
