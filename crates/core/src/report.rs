// crates/core/src/report.rs
//! Structured diagnostic report and provenance, plus parsing of raw model output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::job::{OutputMode, Tier};
use crate::llm::LlmError;

/// Report produced by the worker for a `COMPLETE` job.
///
/// Only `executive_summary` is required; the rest of the model's object is
/// kept verbatim in `extra` so downstream renderers see everything it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub executive_summary: String,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default)]
    pub detail: String,
}

/// How a completed report was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub provider: String,
    pub model: String,
    pub tier: Tier,
    pub output_mode: OutputMode,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationNote>,
}

/// Verdict of the optional consistency-check pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationNote {
    pub consistent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub model: String,
}

/// Parse raw completion text into a [`Report`].
///
/// Accepts a bare JSON object or an object embedded in surrounding prose or a
/// markdown fence. An empty `executive_summary` is rejected.
pub fn parse_report(text: &str) -> Result<Report, LlmError> {
    let value = parse_json_object(text)?;
    let report: Report = serde_json::from_value(value)
        .map_err(|e| LlmError::InvalidFormat(format!("report missing required fields: {e}")))?;

    if report.executive_summary.trim().is_empty() {
        return Err(LlmError::InvalidFormat(
            "report has an empty executive_summary".to_string(),
        ));
    }
    Ok(report)
}

/// Parse the validation pass output: `{"consistent": bool, "notes": "..."}`.
pub fn parse_validation(text: &str, model: &str) -> Result<ValidationNote, LlmError> {
    #[derive(Deserialize)]
    struct Raw {
        consistent: bool,
        #[serde(default)]
        notes: Option<String>,
    }

    let value = parse_json_object(text)?;
    let raw: Raw = serde_json::from_value(value)
        .map_err(|e| LlmError::InvalidFormat(format!("validation verdict malformed: {e}")))?;
    Ok(ValidationNote {
        consistent: raw.consistent,
        notes: raw.notes.filter(|n| !n.trim().is_empty()),
        model: model.to_string(),
    })
}

fn parse_json_object(text: &str) -> Result<Value, LlmError> {
    let trimmed = text.trim();
    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Ok(v);
    }
    extract_json_from_text(trimmed).ok_or_else(|| {
        LlmError::ParseFailed(format!(
            "no JSON object found in model output: {}",
            truncate(trimmed, 200)
        ))
    })
}

/// Extract the first balanced JSON object `{...}` from a text string.
///
/// Braces inside string literals are ignored. Each candidate that fails to
/// parse is skipped and the scan continues after its opening brace.
pub fn extract_json_from_text(text: &str) -> Option<Value> {
    let mut search_from = 0;
    while let Some(rel) = text[search_from..].find('{') {
        let start = search_from + rel;
        if let Some(end) = balanced_object_end(&text[start..]) {
            if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(&text[start..start + end]) {
                return Some(v);
            }
        }
        search_from = start + 1;
    }
    None
}

fn balanced_object_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
