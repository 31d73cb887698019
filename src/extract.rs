//! Best-effort recovery of structured payloads from free-form model output.
//!
//! Model output may wrap the payload in prose or a fenced block. Recovery rules:
//!
//! 1. If the text has a ```` ``` ```` fence, keep only the first fenced block and
//!    drop its language tag.
//! 2. Slice from the first `{` to the last `}` when both exist in that order.
//! 3. Parse what is left as a JSON object.
//!
//! Step 2 takes the widest span, so text with stray braces outside the
//! intended object (e.g. an inline example) over-captures and fails to parse.

use serde_json::{Map, Value};
use thiserror::Error;

const FENCE: &str = "```";

/// Separator used when folding a multi-line riddle into one CSV cell.
pub const LINE_SEPARATOR: &str = " | ";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid JSON in model output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("model output is JSON but not an object")]
    NotAnObject,
}

/// Step 1: the body of the first fenced block, or `text` untouched when unfenced.
pub fn strip_code_fence(text: &str) -> &str {
    let Some(open) = text.find(FENCE) else {
        return text;
    };
    let rest = &text[open + FENCE.len()..];
    let block = match rest.find(FENCE) {
        Some(close) => &rest[..close],
        None => rest,
    };
    strip_language_tag(block).trim()
}

fn strip_language_tag(block: &str) -> &str {
    let trimmed = block.trim_start();
    let tag_len = trimmed
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+')))
        .unwrap_or(trimmed.len());
    if tag_len == 0 {
        return trimmed;
    }

    let after = &trimmed[tag_len..];
    if after.is_empty()
        || after.starts_with(char::is_whitespace)
        || after.starts_with(['{', '['])
    {
        after
    } else {
        trimmed
    }
}

/// Steps 1 and 2: the slice of `text` most likely to be the JSON object.
pub fn json_candidate(text: &str) -> &str {
    let text = strip_code_fence(text);
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

/// Step 3 alone: parse `candidate` as a JSON object.
pub fn parse_object(candidate: &str) -> Result<Map<String, Value>, ExtractError> {
    match serde_json::from_str::<Value>(candidate)? {
        Value::Object(map) => Ok(map),
        _ => Err(ExtractError::NotAnObject),
    }
}

/// Full pipeline: recover a JSON object from raw model output.
pub fn extract_json_object(text: &str) -> Result<Map<String, Value>, ExtractError> {
    parse_object(json_candidate(text))
}

/// Trim a riddle and fold its lines onto one line.
pub fn flatten_riddle(text: &str) -> String {
    text.trim().lines().collect::<Vec<_>>().join(LINE_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fenced_json_block() {
        let raw = "```json\n{\"price\": 29.99, \"link\": \"https://x\", \"product_name\": \"Widget\"}\n```";
        let map = extract_json_object(raw).unwrap();

        assert_eq!(map["price"], json!(29.99));
        assert_eq!(map["link"], json!("https://x"));
        assert_eq!(map["product_name"], json!("Widget"));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_fence_matches_unfenced() {
        let object = r#"{"price": 12, "link": "https://shop.example/item", "product_name": "Mug"}"#;
        for fenced in [
            format!("```json\n{}\n```", object),
            format!("```JSON\n{}\n```", object),
            format!("Here you go:\n```\n{}\n```\nEnjoy!", object),
            format!("```json {}```", object),
        ] {
            assert_eq!(
                extract_json_object(&fenced).unwrap(),
                extract_json_object(object).unwrap(),
                "{}",
                fenced
            );
        }
    }

    #[test]
    fn test_prose_around_object() {
        let raw = "Sure! The best deal I found is {\"price\": \"$45\", \"link\": \"\", \"product_name\": \"Scarf\"} hope that helps.";
        let map = extract_json_object(raw).unwrap();
        assert_eq!(map["price"], json!("$45"));
        assert_eq!(map["product_name"], json!("Scarf"));
    }

    #[test]
    fn test_unfenced_plain_object_is_idempotent() {
        let raw = r#"{"price": 29.99, "nested": {"a": [1, 2]}, "product_name": "Widget"}"#;
        assert_eq!(json_candidate(raw), raw);
        assert_eq!(
            parse_object(raw).unwrap(),
            extract_json_object(raw).unwrap()
        );
    }

    #[test]
    fn test_unclosed_fence_takes_rest() {
        let raw = "```json\n{\"price\": 5}";
        assert_eq!(strip_code_fence(raw), "{\"price\": 5}");
        assert_eq!(extract_json_object(raw).unwrap()["price"], json!(5));
    }

    #[test]
    fn test_failures() {
        assert!(matches!(
            extract_json_object(""),
            Err(ExtractError::Json(_))
        ));
        assert!(matches!(
            extract_json_object("I could not find anything, sorry."),
            Err(ExtractError::Json(_))
        ));
        assert!(matches!(
            extract_json_object("} backwards {"),
            Err(ExtractError::Json(_))
        ));
        assert!(matches!(
            extract_json_object("```\n[1, 2]\n```"),
            Err(ExtractError::NotAnObject)
        ));
    }

    #[test]
    fn test_stray_braces_over_capture() {
        let raw = r#"Format is {price} like so: {"price": 3}"#;
        assert_eq!(json_candidate(raw), r#"{price} like so: {"price": 3}"#);
        assert!(extract_json_object(raw).is_err());
    }

    #[test]
    fn test_flatten_riddle() {
        assert_eq!(
            flatten_riddle("\n  Soft and warm,\nWrapped round your neck,\r\nRed and green\n"),
            "Soft and warm, | Wrapped round your neck, | Red and green"
        );
        assert_eq!(flatten_riddle("one line"), "one line");
        assert_eq!(flatten_riddle("   \n "), "");
    }
}
