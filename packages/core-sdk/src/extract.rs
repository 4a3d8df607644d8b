use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::GenerateError;

static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json\r?\n(.*?)\r?\n```").expect("json fence pattern"));

/**
 * \brief Recovers a JSON value from raw model text.
 *
 * Tries the whole text, then a ```json fenced block, then the span from the first `{`
 * to the last `}`.
 */
pub fn extract_json(text: &str) -> Result<Value, GenerateError> {
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return Ok(v);
    }

    if let Some(inner) = JSON_FENCE.captures(text).and_then(|c| c.get(1)) {
        if let Ok(v) = serde_json::from_str::<Value>(inner.as_str()) {
            debug!("recovered JSON from fenced block");
            return Ok(v);
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(v) = serde_json::from_str::<Value>(&text[start..=end]) {
                debug!("recovered JSON from brace span");
                return Ok(v);
            }
        }
    }

    Err(GenerateError::Parse(
        "Failed to parse JSON response".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_json() {
        assert_eq!(extract_json(r#"{"a":1}"#).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_fenced_json() {
        assert_eq!(
            extract_json("```json\n{\"a\":1}\n```").unwrap(),
            json!({"a": 1})
        );
    }

    #[test]
    fn test_json_in_prose() {
        assert_eq!(
            extract_json(r#"Here you go: {"a":1} thanks"#).unwrap(),
            json!({"a": 1})
        );
    }

    #[test]
    fn test_not_json() {
        let err = extract_json("not json at all").unwrap_err();
        assert!(matches!(err, GenerateError::Parse(_)));
    }

    #[test]
    fn test_fence_with_prose_around() {
        let text = "Sure!\n```json\n{\"title\": \"x\", \"n\": [1, 2]}\n```\nLet me know.";
        assert_eq!(
            extract_json(text).unwrap(),
            json!({"title": "x", "n": [1, 2]})
        );
    }

    #[test]
    fn test_no_trailing_comma_repair() {
        assert!(extract_json(r#"{"a": 1,}"#).is_err());
    }

    #[test]
    fn test_unbalanced_braces_are_not_repaired() {
        assert!(extract_json(r#"result: {"a": {"b": 1}"#).is_err());
    }

    #[test]
    fn test_close_before_open() {
        assert!(extract_json("} nothing {").is_err());
    }
}
