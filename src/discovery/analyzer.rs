//! Model-backed repository analysis: prompt construction and response parsing.

use serde::Deserialize;
use serde_json::Value;

use crate::discovery::models::{AiAnalysis, RepositoryMetadata};
use crate::dispatch::{CompletionRequest, Message};
use crate::error::AnalysisParseError;

pub const MAX_README_CHARS: usize = 4000;
pub const ANALYSIS_MAX_TOKENS: u32 = 1000;
pub const ANALYSIS_TEMPERATURE: f64 = 0.3;

pub const ANALYSIS_SYSTEM_PROMPT: &str = r#"You are a technical analyst evaluating open-source repositories for revival potential.

For the repository you are given, provide:
1. A brief summary of what the project does
2. Key strengths of the codebase
3. Key weaknesses or areas needing improvement
4. Recommendation for revival effort (low/medium/high)
5. Estimated hours to bring it to production quality
6. Target audience for the project
7. Code quality estimate between 0.0 and 1.0

Be concise and factual. Focus on technical aspects, not popularity.

Respond with a single JSON object and nothing else:
{
    "summary": "...",
    "strengths": ["...", "..."],
    "weaknesses": ["...", "..."],
    "revival_recommendation": "low|medium|high effort, <reason>",
    "estimated_effort_hours": 100,
    "target_audience": "...",
    "quality": 0.6
}"#;

fn or_unknown(value: Option<&str>) -> &str {
    value.filter(|v| !v.trim().is_empty()).unwrap_or("Unknown")
}

/// User prompt for one repository. README text beyond `MAX_README_CHARS` is cut.
pub fn build_prompt(meta: &RepositoryMetadata) -> String {
    let readme = match meta.readme.as_deref() {
        Some(text) if text.chars().count() > MAX_README_CHARS => {
            let cut: String = text.chars().take(MAX_README_CHARS).collect();
            format!("{cut}\n\n[README truncated...]")
        }
        Some(text) if !text.trim().is_empty() => text.to_string(),
        _ => "No README available.".to_string(),
    };

    let topics = if meta.topics.is_empty() {
        "None".to_string()
    } else {
        meta.topics.join(", ")
    };
    let fmt_time = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map_or_else(|| "Unknown".to_string(), |t| t.to_rfc3339())
    };

    format!(
        "Analyze this repository:\n\n\
         **Repository:** {id}\n\
         **Description:** {description}\n\
         **Language:** {language}\n\
         **Stars:** {stars}\n\
         **Forks:** {forks}\n\
         **Open Issues:** {issues}\n\
         **Topics:** {topics}\n\
         **License:** {license}\n\
         **Created:** {created}\n\
         **Last Push:** {pushed}\n\n\
         **README Content:**\n```\n{readme}\n```\n\n\
         Analyze this repository for revival potential.",
        id = meta.id(),
        description = meta.description.as_deref().unwrap_or("No description"),
        language = or_unknown(meta.language.as_deref()),
        stars = meta.stars,
        forks = meta.forks,
        issues = meta.open_issues,
        license = meta.license.as_deref().unwrap_or("None"),
        created = fmt_time(meta.created_at),
        pushed = fmt_time(meta.pushed_at),
    )
}

pub fn analysis_request(meta: &RepositoryMetadata) -> CompletionRequest {
    CompletionRequest::new(vec![
        Message::system(ANALYSIS_SYSTEM_PROMPT),
        Message::user(build_prompt(meta)),
    ])
    .with_max_tokens(ANALYSIS_MAX_TOKENS)
    .with_temperature(ANALYSIS_TEMPERATURE)
}

/// Remove a surrounding markdown code fence (with or without a language tag).
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

// Models are loose with numeric types; accept 120, 120.0 and "120".
#[derive(Deserialize, Default)]
#[serde(default)]
struct WireAnalysis {
    summary: String,
    strengths: Vec<String>,
    weaknesses: Vec<String>,
    revival_recommendation: String,
    estimated_effort_hours: Option<Value>,
    target_audience: String,
    quality: Option<Value>,
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|n: &f64| n.is_finite())
}

/// Parse the model's reply into an `AiAnalysis`.
///
/// The reply must be a JSON object, optionally wrapped in a markdown fence.
/// Missing fields default; `quality` is clamped to [0, 1].
pub fn parse_analysis(text: &str) -> Result<AiAnalysis, AnalysisParseError> {
    let body = strip_fences(text);
    if body.is_empty() {
        return Err(AnalysisParseError("empty response".to_string()));
    }

    let value: Value =
        serde_json::from_str(body).map_err(|e| AnalysisParseError(e.to_string()))?;
    if !value.is_object() {
        return Err(AnalysisParseError(format!(
            "expected a JSON object, got {}",
            json_kind(&value)
        )));
    }
    let wire: WireAnalysis =
        serde_json::from_value(value).map_err(|e| AnalysisParseError(e.to_string()))?;

    Ok(AiAnalysis {
        summary: wire.summary,
        strengths: wire.strengths,
        weaknesses: wire.weaknesses,
        revival_recommendation: wire.revival_recommendation,
        estimated_effort_hours: wire
            .estimated_effort_hours
            .as_ref()
            .and_then(as_number)
            .map(|h| h.clamp(0.0, f64::from(u32::MAX)).round() as u32),
        target_audience: wire.target_audience,
        quality: wire
            .quality
            .as_ref()
            .and_then(as_number)
            .map(|q| q.clamp(0.0, 1.0)),
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
