// crates/server/src/jobs/test_support.rs
//! Scripted LLM provider for worker and runner tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bizdiag_core::llm::{CompletionRequest, CompletionResponse, LlmError, LlmProvider};

/// One scripted reply. Once the script runs out every call gets a report.
#[derive(Debug, Clone)]
pub enum Step {
    Report(&'static str),
    Delayed(Duration, &'static str),
    Text(&'static str),
    Overloaded,
    RateLimited(Option<u64>),
    Rejected,
}

pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            calls: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub fn requests(&self) -> Arc<Mutex<Vec<CompletionRequest>>> {
        Arc::clone(&self.requests)
    }
}

pub fn report_json(summary: &str) -> String {
    serde_json::json!({
        "executive_summary": summary,
        "findings": [{"title": "Margin squeeze", "severity": "medium", "detail": "COGS up 8%"}],
        "recommendations": ["Renegotiate supplier terms"]
    })
    .to_string()
}

fn response(content: String) -> CompletionResponse {
    CompletionResponse {
        content,
        model: Some("claude-scripted".into()),
        input_tokens: Some(100),
        output_tokens: Some(50),
        latency_ms: 7,
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        let step = self.steps.lock().unwrap().pop_front();
        match step.unwrap_or(Step::Report("Default summary.")) {
            Step::Report(summary) => Ok(response(report_json(summary))),
            Step::Delayed(delay, summary) => {
                tokio::time::sleep(delay).await;
                Ok(response(report_json(summary)))
            }
            Step::Text(text) => Ok(response(text.to_string())),
            Step::Overloaded => Err(LlmError::Overloaded("HTTP 529: overloaded".into())),
            Step::RateLimited(retry_after_secs) => Err(LlmError::RateLimited { retry_after_secs }),
            Step::Rejected => Err(LlmError::Api {
                status: 401,
                message: "invalid x-api-key".into(),
            }),
        }
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "claude-scripted"
    }
}
