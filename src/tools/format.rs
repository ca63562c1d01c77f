//! Tool result rendering.
//!
//! Every tool answers with a single MCP text content block holding the
//! pretty-printed JSON of its output.

use crate::error::{AdsError, AdsResult};
use serde::Serialize;
use serde_json::{Value, json};

/// Wrap `output` as `{"content":[{"type":"text","text":<pretty json>}]}`.
pub fn text_content<T: Serialize>(output: &T) -> AdsResult<Value> {
    let text = serde_json::to_string_pretty(output)
        .map_err(|e| AdsError::internal(format!("Failed to serialize tool output: {}", e)))?;
    Ok(json!({
        "content": [{ "type": "text", "text": text }]
    }))
}

/// The text of the first content block, if any.
pub fn content_text(result: &Value) -> Option<&str> {
    result["content"][0]["text"].as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_content_is_pretty_json() {
        let value = text_content(&json!({"a": [1, 2]})).unwrap();
        assert_eq!(value["content"][0]["type"], "text");
        let text = content_text(&value).unwrap();
        assert!(text.contains('\n'));
        assert_eq!(serde_json::from_str::<Value>(text).unwrap(), json!({"a": [1, 2]}));
    }

    #[test]
    fn test_content_text_missing() {
        assert_eq!(content_text(&json!({})), None);
    }
}
