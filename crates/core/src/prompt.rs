// crates/core/src/prompt.rs
//! Tier-dependent prompt and token-budget selection.
//!
//! The prompt wording is a placeholder contract with the model: it asks for a
//! JSON object with an `executive_summary`, `findings` and `recommendations`.

use serde_json::Value;

use crate::job::{Job, OutputMode, Tier};
use crate::llm::CompletionRequest;
use crate::report::Report;

/// Upper bound on any single completion's `max_tokens`.
pub const MAX_TOKEN_BUDGET: u32 = 16_384;

const VALIDATION_TOKEN_BUDGET: u32 = 1_024;

/// Token budget for a report completion. Higher tiers get more room; deep
/// output mode adds half again, capped at [`MAX_TOKEN_BUDGET`].
pub fn token_budget(tier: Tier, mode: OutputMode) -> u32 {
    let base = match tier {
        Tier::Prospect => 2_048,
        Tier::Full => 6_144,
        Tier::Premium => 12_288,
    };
    match mode {
        OutputMode::Rapid => base,
        OutputMode::Deep => (base + base / 2).min(MAX_TOKEN_BUDGET),
    }
}

/// System prompt for a tier. Each tier layers more frameworks on the last.
pub fn system_prompt(tier: Tier) -> String {
    let scope = match tier {
        Tier::Prospect => "Give a short first-look triage: the three most pressing issues only.",
        Tier::Full => {
            "Cover strategy, operations, finance and go-to-market. Rate each finding's severity."
        }
        Tier::Premium => {
            "Cover strategy, operations, finance, go-to-market, organisation and risk. \
             Apply SWOT and unit-economics framing, rate each finding's severity, and \
             sequence recommendations into a 90-day plan."
        }
    };
    format!(
        "You are a business diagnostician. {scope}\n\
         Output ONLY a JSON object, no other text:\n\
         {{\"executive_summary\": \"...\", \
         \"findings\": [{{\"title\": \"...\", \"severity\": \"low|medium|high\", \"detail\": \"...\"}}], \
         \"recommendations\": [\"...\"]}}"
    )
}

fn user_prompt(intake: &Value, mode: OutputMode) -> String {
    let depth = match mode {
        OutputMode::Rapid => "Keep each finding to two sentences.",
        OutputMode::Deep => "Explain the evidence behind each finding in detail.",
    };
    let intake = serde_json::to_string_pretty(intake).unwrap_or_else(|_| intake.to_string());
    format!("{depth}\n\nDiagnostic intake:\n{intake}")
}

/// Build the report completion request for a stored job.
pub fn build_report_request(job: &Job) -> CompletionRequest {
    CompletionRequest {
        system_prompt: Some(system_prompt(job.tier)),
        user_prompt: user_prompt(job.prompt_input(), job.output_mode),
        max_tokens: token_budget(job.tier, job.output_mode),
        temperature: 0.3,
    }
}

/// Build the consistency-check request run when the validation pass is on.
pub fn build_validation_request(report: &Report) -> CompletionRequest {
    let report_json = serde_json::to_string(report).unwrap_or_default();
    CompletionRequest {
        system_prompt: Some(
            "You review business diagnostic reports for internal consistency. \
             Output ONLY a JSON object: {\"consistent\": true|false, \"notes\": \"...\"}"
                .to_string(),
        ),
        user_prompt: format!("Report:\n{report_json}"),
        max_tokens: VALIDATION_TOKEN_BUDGET,
        temperature: 0.0,
    }
}
