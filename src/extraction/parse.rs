use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::error::OracleError;

fn strip(input: &str, pattern: &str, replacement: &str) -> String {
    match Regex::new(pattern) {
        Ok(re) => re.replace_all(input, replacement).into_owned(),
        Err(_) => input.to_string(),
    }
}

/// Reduce cleaned page markup to what the oracle is sent: no scripts, styles
/// or comments, whitespace collapsed, at most `max_chars` characters followed
/// by `...` when cut.
pub fn prepare_oracle_input(html: &str, max_chars: usize) -> String {
    let text = strip(html, r"(?is)<script[^>]*>.*?</script>", "");
    let text = strip(&text, r"(?is)<style[^>]*>.*?</style>", "");
    let text = strip(&text, r"(?s)<!--.*?-->", "");
    let text = strip(&text, r"\s+", " ");
    let text = text.trim();

    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => {
            warn!("Oracle input truncated to {} characters", max_chars);
            format!("{}...", &text[..cut])
        }
        None => text.to_string(),
    }
}

/// Pull the record list out of a free-form oracle answer.
///
/// Accepts a bare JSON array, an array wrapped in markdown code fences or
/// prose, or a single object (returned as a one-element list). Blank answers
/// yield an empty list.
pub fn parse_oracle_response(response: &str) -> Result<Vec<Value>, OracleError> {
    let cleaned = strip_code_fence(response.trim());
    if cleaned.is_empty() {
        return Ok(Vec::new());
    }

    match serde_json::from_str::<Value>(cleaned) {
        Ok(Value::Array(items)) => return Ok(items),
        Ok(object @ Value::Object(_)) => return Ok(vec![object]),
        Ok(other) => {
            return Err(OracleError::InvalidResponse {
                message: format!("expected a JSON array or object, got {}", other),
            })
        }
        Err(_) => {}
    }

    // Prose around the payload: take the span from the first opening bracket
    // to the last matching closing one
    let sliced = cleaned
        .find(|c: char| c == '[' || c == '{')
        .and_then(|start| {
            let close = if cleaned[start..].starts_with('[') { ']' } else { '}' };
            let end = cleaned.rfind(close)?;
            (start < end).then(|| &cleaned[start..=end])
        })
        .unwrap_or(cleaned);

    match serde_json::from_str::<Value>(sliced) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(object @ Value::Object(_)) => Ok(vec![object]),
        Ok(other) => Err(OracleError::InvalidResponse {
            message: format!("expected a JSON array or object, got {}", other),
        }),
        Err(e) => Err(OracleError::InvalidResponse {
            message: e.to_string(),
        }),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}
