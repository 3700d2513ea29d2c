// crates/core/src/llm/anthropic.rs
//! Anthropic Messages API provider. POSTs to `/v1/messages` and maps HTTP
//! failures onto the retryable/non-retryable `LlmError` taxonomy.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::provider::LlmProvider;
use super::types::{CompletionRequest, CompletionResponse, LlmError};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// LLM provider backed by the Anthropic Messages API.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout_secs: u64,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 90,
        }
    }

    /// Point the provider at a different host (proxy, mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the per-request timeout in seconds.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
}

/// Map a non-success HTTP status to an `LlmError`.
fn classify_status(status: u16, retry_after_secs: Option<u64>, body: &str) -> LlmError {
    let message = body.chars().take(500).collect::<String>();
    match status {
        429 => LlmError::RateLimited { retry_after_secs },
        408 => LlmError::Transport(format!("HTTP 408: {message}")),
        503 | 529 => LlmError::Overloaded(format!("HTTP {status}: {message}")),
        500..=599 => LlmError::Transport(format!("HTTP {status}: {message}")),
        _ => LlmError::Api { status, message },
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::NotAvailable("ANTHROPIC_API_KEY is not set".into()));
        }

        let start = Instant::now();
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request.system_prompt.as_deref(),
            messages: vec![Message {
                role: "user",
                content: &request.user_prompt,
            }],
        };

        tracing::debug!(
            model = %self.model,
            max_tokens = request.max_tokens,
            timeout_secs = self.timeout_secs,
            "anthropic: sending request"
        );

        let resp = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .timeout(Duration::from_secs(self.timeout_secs))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.timeout_secs)
                } else {
                    LlmError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after_secs = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok());
            let text = resp.text().await.unwrap_or_default();
            let err = classify_status(status.as_u16(), retry_after_secs, &text);
            tracing::warn!(
                status = status.as_u16(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                error = %err,
                "anthropic: request failed"
            );
            return Err(err);
        }

        let parsed: MessagesResponse = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(self.timeout_secs)
            } else {
                LlmError::ParseFailed(format!("invalid Messages API body: {e}"))
            }
        })?;

        let content = parsed
            .content
            .iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        if content.trim().is_empty() {
            return Err(LlmError::InvalidFormat("completion contained no text".into()));
        }

        let latency_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            model = %self.model,
            latency_ms,
            content_len = content.len(),
            "anthropic: response received"
        );

        Ok(CompletionResponse {
            content,
            model: parsed.model,
            input_tokens: parsed.usage.as_ref().and_then(|u| u.input_tokens),
            output_tokens: parsed.usage.as_ref().and_then(|u| u.output_tokens),
            latency_ms,
        })
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        if self.api_key.is_empty() {
            Err(LlmError::NotAvailable("ANTHROPIC_API_KEY is not set".into()))
        } else {
            Ok(())
        }
    }

    fn name(&self) -> &str {
        "anthropic-api"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
