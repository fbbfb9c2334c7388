// Tool Call Extraction
//
// Recovers a `{"type":"tool_call","tool":"ns.method","args":{...}}` request
// from free-form engine output. The engine may prefix the JSON with prose or
// wrap it in a code fence, so this is a best-effort scan, not a grammar.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

use crate::models::tool_call::{ToolCall, ToolCallCandidate};

/// Literal prefix of the tool-call wire format
const TOOL_CALL_MARKER: &str = r#"{"type":"tool_call""#;

/// Tool names must be `namespace.method`, lowercase
static TOOL_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9_]*\.[a-z][a-z0-9_]*$").expect("Invalid tool name regex")
});

/// Check a tool name against the `namespace.method` pattern
pub fn is_valid_tool_name(name: &str) -> bool {
    TOOL_NAME_PATTERN.is_match(name)
}

/// Extract a tool call from engine output
///
/// Tries the whole text as JSON first, then the last occurrence of the
/// tool-call marker. The last one wins because a model may quote the format
/// in prose before emitting the real call.
pub fn extract_tool_call(text: &str) -> ToolCallCandidate {
    let trimmed = text.trim();

    // The whole text must be one JSON value here; anything after it falls
    // through to the marker scan
    if trimmed.starts_with('{') {
        if let Some(call) = serde_json::from_str::<Value>(trimmed).ok().and_then(validate_tool_call) {
            return ToolCallCandidate::Matched(call);
        }
    }

    if let Some(start) = trimmed.rfind(TOOL_CALL_MARKER) {
        let tail = strip_trailing_fence(&trimmed[start..]);
        if let Some(call) = parse_leading_value(tail).and_then(validate_tool_call) {
            return ToolCallCandidate::Matched(call);
        }
    }

    ToolCallCandidate::NoMatch
}

/// Drop a closing markdown fence (and surrounding whitespace) from the end
fn strip_trailing_fence(text: &str) -> &str {
    let text = text.trim_end();
    text.strip_suffix("```").unwrap_or(text).trim_end()
}

/// First JSON value in `text`; trailing content after it is tolerated
fn parse_leading_value(text: &str) -> Option<Value> {
    serde_json::Deserializer::from_str(text)
        .into_iter::<Value>()
        .next()?
        .ok()
}

/// Check the tool-call shape and name
fn validate_tool_call(value: Value) -> Option<ToolCall> {
    let obj = value.as_object()?;
    if obj.get("type").and_then(Value::as_str) != Some("tool_call") {
        return None;
    }

    let tool = obj.get("tool").and_then(Value::as_str)?;
    if !is_valid_tool_name(tool) {
        log::warn!("[ToolCall] Rejected tool call with invalid name: {:?}", tool);
        return None;
    }

    let args = match obj.get("args") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return None,
    };

    Some(ToolCall {
        tool: tool.to_string(),
        args,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn matched(text: &str) -> ToolCall {
        match extract_tool_call(text) {
            ToolCallCandidate::Matched(call) => call,
            ToolCallCandidate::NoMatch => panic!("expected a tool call in {:?}", text),
        }
    }

    #[test]
    fn test_fast_path_direct_json() {
        let call = matched(r#"  {"type":"tool_call","tool":"crm.search","args":{"q":"acme"}}  "#);
        assert_eq!(call.tool, "crm.search");
        assert_eq!(call.args.get("q"), Some(&json!("acme")));
        assert_eq!(call.namespace(), "crm");
        assert_eq!(call.method(), "search");
    }

    #[test]
    fn test_fast_path_with_spaced_json() {
        // Not the literal marker, only reachable through the fast path
        let call = matched(r#"{ "type": "tool_call", "tool": "notes.list" }"#);
        assert_eq!(call.tool, "notes.list");
        assert!(call.args.is_empty());
    }

    #[test]
    fn test_scan_path_after_prose_and_fence() {
        let text = "I will call it.\n{\"type\":\"tool_call\",\"tool\":\"notes.add\",\"args\":{}}\n```";
        let call = matched(text);
        assert_eq!(call.tool, "notes.add");
        assert!(call.args.is_empty());
    }

    #[test]
    fn test_scan_path_prefers_last_marker() {
        let text = concat!(
            "The format looks like {\"type\":\"tool_call\",\"tool\":\"example.demo\"} in general.\n",
            "```json\n",
            "{\"type\":\"tool_call\",\"tool\":\"calendar.create\",\"args\":{\"title\":\"sync\"}}\n",
            "```"
        );
        let call = matched(text);
        assert_eq!(call.tool, "calendar.create");
        assert_eq!(call.args.get("title"), Some(&json!("sync")));
    }

    #[test]
    fn test_invalid_tool_name_rejected() {
        let text = r#"{"type":"tool_call","tool":"Notes.Add","args":{}}"#;
        assert_eq!(extract_tool_call(text), ToolCallCandidate::NoMatch);

        let text = r#"{"type":"tool_call","tool":"notes","args":{}}"#;
        assert_eq!(extract_tool_call(text), ToolCallCandidate::NoMatch);

        let text = r#"{"type":"tool_call","tool":"../etc.passwd","args":{}}"#;
        assert_eq!(extract_tool_call(text), ToolCallCandidate::NoMatch);
    }

    #[test]
    fn test_wrong_shape_rejected() {
        assert_eq!(
            extract_tool_call(r#"{"type":"message","tool":"notes.add"}"#),
            ToolCallCandidate::NoMatch
        );
        assert_eq!(
            extract_tool_call(r#"{"type":"tool_call","tool":42}"#),
            ToolCallCandidate::NoMatch
        );
        assert_eq!(
            extract_tool_call(r#"{"type":"tool_call","tool":"notes.add","args":[1,2]}"#),
            ToolCallCandidate::NoMatch
        );
    }

    #[test]
    fn test_plain_text_and_truncated_json() {
        assert_eq!(extract_tool_call("Sure, done!"), ToolCallCandidate::NoMatch);
        assert_eq!(extract_tool_call(""), ToolCallCandidate::NoMatch);
        assert_eq!(
            extract_tool_call("ok {\"type\":\"tool_call\",\"tool\":\"notes.add\",\"args\":{"),
            ToolCallCandidate::NoMatch
        );
    }

    #[test]
    fn test_trailing_text_goes_through_marker_scan() {
        let call = matched("{\"type\":\"tool_call\",\"tool\":\"trade.quote\",\"args\":{\"s\":\"X\"}} thanks");
        assert_eq!(call.tool, "trade.quote");
    }

    #[test]
    fn test_leading_example_call_loses_to_last_marker() {
        let text = concat!(
            "{\"type\":\"tool_call\",\"tool\":\"example.demo\"} is the format. Now:\n",
            "{\"type\":\"tool_call\",\"tool\":\"calendar.create\",\"args\":{}}"
        );
        let call = matched(text);
        assert_eq!(call.tool, "calendar.create");
    }
}
