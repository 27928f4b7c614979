//! JSON extraction and repair for raw LLM output.
//!
//! LLM responses are expected to contain a JSON object but routinely arrive
//! wrapped in prose, code fences, or with small syntax defects.  The ladder
//! here tries, in order: direct parse, balanced-block extraction from the
//! first opening bracket, single-quote replacement, and trailing-comma
//! removal.  The first variant that parses wins.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Extract the first JSON value from raw LLM text.
///
/// Returns `None` when no repair produces parseable JSON.
pub fn extract_json(text: &str) -> Option<Value> {
    let stripped = strip_markers(text);

    // Fast path: the whole (stripped) text is already valid JSON.
    if let Ok(value) = serde_json::from_str::<Value>(stripped.trim()) {
        return Some(value);
    }

    // Extract the first balanced `{...}` or `[...]` block.
    let block = extract_balanced(&stripped)?;
    if let Ok(value) = serde_json::from_str::<Value>(&block) {
        return Some(value);
    }

    // Repair pass 1: single-quoted keys/values to double quotes.
    let requoted = requote(&block);
    if let Ok(value) = serde_json::from_str::<Value>(&requoted) {
        return Some(value);
    }

    // Repair pass 2: strip trailing commas (on top of requoting).
    let decommaed = strip_trailing_commas(&requoted);
    serde_json::from_str::<Value>(&decommaed).ok()
}

/// Remove common pre/suffix markers: code fences and a leading `json` tag.
fn strip_markers(text: &str) -> String {
    let mut s = text.trim();

    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }

    let s = s.trim();
    s.strip_prefix("json").map(str::trim).unwrap_or(s).to_owned()
}

/// Find the first balanced `{...}` or `[...]` block, honoring string
/// literals and escapes.
fn extract_balanced(text: &str) -> Option<String> {
    let start = text.find(['{', '['])?;
    let bytes = text.as_bytes();
    let open = bytes[start] as char;
    let close = if open == '{' { '}' } else { ']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..=start + offset].to_owned());
                }
            }
            _ => {}
        }
    }

    None
}

/// Replace single-quoted strings with double-quoted ones.
///
/// Conservative: only rewrites quote pairs that do not contain a double
/// quote, so legitimate apostrophes inside double-quoted strings survive.
fn requote(text: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"'([^'\x22]*)'").expect("static regex"));
    re.replace_all(text, "\"$1\"").into_owned()
}

/// Remove commas that directly precede a closing bracket.
fn strip_trailing_commas(text: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r",\s*([}\]])").expect("static regex"));
    re.replace_all(text, "$1").into_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn direct_parse() {
        let value = extract_json(r#"{"action": "research", "tool_id": "mcp-deepsearch"}"#);
        assert_eq!(value, Some(json!({"action": "research", "tool_id": "mcp-deepsearch"})));
    }

    #[test]
    fn extracts_from_surrounding_prose() {
        let text = r#"Sure, here is the call:
{"tool_id": "microsandbox", "action": "microsandbox_execute", "parameters": {"code": "print(1)"}}
Let me know if that works."#;

        let value = extract_json(text).unwrap();
        assert_eq!(value["tool_id"], "microsandbox");
    }

    #[test]
    fn strips_code_fences() {
        let text = "```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json(text), Some(json!({"a": 1})));
    }

    #[test]
    fn repairs_single_quotes() {
        let text = "{'tool_id': 'browser_use', 'action': 'browser_navigate'}";
        let value = extract_json(text).unwrap();
        assert_eq!(value["tool_id"], "browser_use");
    }

    #[test]
    fn repairs_trailing_commas() {
        let text = r#"{"a": 1, "b": [1, 2, 3,],}"#;
        let value = extract_json(text).unwrap();
        assert_eq!(value["b"], json!([1, 2, 3]));
    }

    #[test]
    fn balanced_extraction_honors_nested_braces_in_strings() {
        let text = r#"{"code": "d = {}; print(d)"} trailing"#;
        let value = extract_json(text).unwrap();
        assert_eq!(value["code"], "d = {}; print(d)");
    }

    #[test]
    fn garbage_yields_none() {
        assert!(extract_json("no json here at all").is_none());
        assert!(extract_json("{unclosed").is_none());
    }

    #[test]
    fn array_blocks_are_extracted() {
        let value = extract_json("results: [1, 2, 3]").unwrap();
        assert_eq!(value, json!([1, 2, 3]));
    }
}
