use serde::Deserialize;
use serde_json::Value;

use crate::{ClassificationResult, PipelineError, RiskLabel, SummaryResult};

#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(default, alias = "nivel_riesgo", alias = "risk_level")]
    risk_label: Option<Value>,
    #[serde(default, alias = "justificacion")]
    justification: Option<Value>,
}

/// Remove an optional Markdown code fence (```` ```json ```` or ```` ``` ````) around model output.
#[must_use]
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    let inner = match inner.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => &inner[4..],
        _ => inner,
    };
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Parse and validate a classification response.
///
/// Out-of-domain labels are rejected; there is no fallback category.
///
/// # Errors
/// Returns `PipelineError::Validation` when the payload is not a JSON object, a required field is
/// missing or blank, or the label does not normalize to LOW, MEDIUM or HIGH.
pub fn validate_classification(raw: &str) -> Result<ClassificationResult, PipelineError> {
    let payload = strip_code_fence(raw);
    let value: Value = serde_json::from_str(payload).map_err(|err| {
        PipelineError::Validation(format!("classification response is not valid JSON: {err}"))
    })?;
    if !value.is_object() {
        return Err(PipelineError::Validation(
            "classification response must be a JSON object".to_string(),
        ));
    }

    let parsed: RawClassification = serde_json::from_value(value).map_err(|err| {
        PipelineError::Validation(format!("classification response has invalid fields: {err}"))
    })?;

    let label_value = parsed.risk_label.ok_or_else(|| {
        PipelineError::Validation("classification response is missing `risk_label`".to_string())
    })?;
    let label_text = label_value.as_str().ok_or_else(|| {
        PipelineError::Validation(format!("`risk_label` must be a string, got {label_value}"))
    })?;
    let risk_label = RiskLabel::parse(label_text).ok_or_else(|| {
        PipelineError::Validation(format!(
            "`risk_label` value `{label_text}` is outside LOW, MEDIUM, HIGH"
        ))
    })?;

    let justification = parsed
        .justification
        .ok_or_else(|| {
            PipelineError::Validation(
                "classification response is missing `justification`".to_string(),
            )
        })?
        .as_str()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            PipelineError::Validation("`justification` must be a non-empty string".to_string())
        })?;

    Ok(ClassificationResult { risk_label, justification })
}

/// Cut `text` after its `max_words`-th word, keeping the original spacing of the kept prefix.
///
/// Returns the kept prefix, its word count and whether anything was dropped.
#[must_use]
pub fn truncate_words(text: &str, max_words: usize) -> (&str, usize, bool) {
    let mut words = 0;
    let mut in_word = false;
    let mut end = 0;

    for (index, ch) in text.char_indices() {
        if ch.is_whitespace() {
            in_word = false;
            continue;
        }
        if !in_word {
            in_word = true;
            words += 1;
            if words > max_words {
                return (text[..end].trim_end(), max_words, true);
            }
        }
        end = index + ch.len_utf8();
    }

    (text, words, false)
}

/// Validate free-text output (summaries, notification drafts): non-empty and bounded.
///
/// # Errors
/// Returns `PipelineError::Validation` when the output is empty after trimming.
pub fn validate_free_text(raw: &str, word_budget: usize) -> Result<SummaryResult, PipelineError> {
    let text = strip_code_fence(raw);
    if text.is_empty() {
        return Err(PipelineError::Validation("model returned empty text".to_string()));
    }

    let (kept, word_count, truncated) = truncate_words(text, word_budget);
    if kept.is_empty() {
        return Err(PipelineError::Validation(format!(
            "word budget {word_budget} leaves no output text"
        )));
    }

    Ok(SummaryResult { text: kept.to_string(), word_count, truncated })
}
