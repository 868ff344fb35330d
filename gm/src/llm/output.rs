//! Tolerant parsing of JSON objects out of model text

use serde_json::Value;
use tracing::debug;

use super::LlmError;

/// Parse the JSON object a model was asked to produce
///
/// Accepts a bare object, an object inside a markdown code fence, or an
/// object surrounded by prose (first `{` to last `}`).
pub fn parse_json_output(text: &str) -> Result<Value, LlmError> {
    debug!(text_len = text.len(), "parse_json_output: called");
    let trimmed = strip_code_fence(text.trim());

    if let Ok(value) = serde_json::from_str::<Value>(trimmed)
        && value.is_object()
    {
        return Ok(value);
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => {
            debug!(start, end, "parse_json_output: falling back to brace slice");
            let value: Value = serde_json::from_str(&trimmed[start..=end])?;
            if value.is_object() {
                Ok(value)
            } else {
                Err(LlmError::InvalidResponse("Expected a JSON object".to_string()))
            }
        }
        _ => {
            debug!("parse_json_output: no object found");
            Err(LlmError::InvalidResponse("No JSON object in model output".to_string()))
        }
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (e.g. `json`) up to the first newline
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
