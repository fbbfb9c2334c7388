// Engine Stream Parser
//
// Frames the engine's stdout into lines and turns each JSON line into a
// ProtocolEvent. Chunks may split anywhere, including inside a UTF-8
// sequence; the incomplete tail is carried until the next chunk or `finish`.

use serde_json::Value;

use crate::models::engine::{MetaInfo, ProtocolEvent};

#[derive(Debug, Default)]
pub struct EventLineParser {
    carry: Vec<u8>,
}

impl EventLineParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event completed by it
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ProtocolEvent> {
        self.carry.extend_from_slice(chunk);

        let Some(last_newline) = self.carry.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let rest = self.carry.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.carry, rest);

        complete
            .split(|b| *b == b'\n')
            .filter_map(parse_line)
            .collect()
    }

    /// Flush the carried tail when the stream closes
    pub fn finish(&mut self) -> Vec<ProtocolEvent> {
        let tail = std::mem::take(&mut self.carry);
        parse_line(&tail).into_iter().collect()
    }

    pub fn has_pending(&self) -> bool {
        self.carry.iter().any(|b| !b.is_ascii_whitespace())
    }
}

/// Parse one complete line; `None` for blank, non-JSON, or unrecognized lines
pub fn parse_line(line: &[u8]) -> Option<ProtocolEvent> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            log::debug!("[EventParser] Ignoring non-JSON line ({}): {}", e, truncate(text, 120));
            return None;
        }
    };

    classify_event(&value)
}

fn classify_event(value: &Value) -> Option<ProtocolEvent> {
    match value.get("type").and_then(Value::as_str)? {
        "content_block_delta" => delta_text(value).map(|text| ProtocolEvent::Delta { text }),
        // Partial-message mode wraps the API event
        "stream_event" => value.get("event").and_then(classify_event),
        "result" => Some(ProtocolEvent::Terminal {
            resume_token: string_field(value, "session_id"),
            raw_result: value.get("result").and_then(Value::as_str).map(str::to_string),
            is_error: value.get("is_error").and_then(Value::as_bool).unwrap_or(false),
        }),
        "system" => Some(ProtocolEvent::Meta {
            info: MetaInfo {
                subtype: string_field(value, "subtype"),
                session_id: string_field(value, "session_id"),
            },
        }),
        other => {
            log::trace!("[EventParser] Dropping event type {}", other);
            None
        }
    }
}

fn delta_text(value: &Value) -> Option<String> {
    value
        .get("delta")
        .and_then(|d| d.get("text"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = concat!(
        "{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"s-1\"}\n",
        "{\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n",
        "not json at all\n",
        "{\"type\":\"stream_event\",\"event\":{\"type\":\"content_block_delta\",\"delta\":{\"text\":\"lö\"}}}\n",
        "{\"type\":\"assistant\",\"message\":{}}\n",
        "{\"type\":\"result\",\"result\":\"Hellö\",\"session_id\":\"s-1\",\"is_error\":false}\n",
    );

    fn delta(text: &str) -> ProtocolEvent {
        ProtocolEvent::Delta { text: text.to_string() }
    }

    #[test]
    fn test_whole_stream() {
        let mut parser = EventLineParser::new();
        let events = parser.feed(STREAM.as_bytes());

        assert_eq!(events.len(), 4);
        assert!(matches!(&events[0], ProtocolEvent::Meta { info } if info.subtype.as_deref() == Some("init")));
        assert_eq!(events[1], delta("Hel"));
        assert_eq!(events[2], delta("lö"));
        assert_eq!(
            events[3],
            ProtocolEvent::Terminal {
                resume_token: Some("s-1".to_string()),
                raw_result: Some("Hellö".to_string()),
                is_error: false,
            }
        );
        assert!(parser.finish().is_empty());
    }

    #[test]
    fn test_arbitrary_chunking_matches_whole_stream() {
        let whole = EventLineParser::new().feed(STREAM.as_bytes());
        let bytes = STREAM.as_bytes();

        for size in [1, 2, 3, 7, 16, 64] {
            let mut parser = EventLineParser::new();
            let mut events = Vec::new();
            for chunk in bytes.chunks(size) {
                events.extend(parser.feed(chunk));
            }
            events.extend(parser.finish());
            assert_eq!(events, whole, "chunk size {}", size);
        }
    }

    #[test]
    fn test_tail_flushed_on_finish() {
        let mut parser = EventLineParser::new();
        let events = parser.feed(br#"{"type":"result","result":"done"}"#);
        assert!(events.is_empty());
        assert!(parser.has_pending());

        let events = parser.finish();
        assert_eq!(
            events,
            vec![ProtocolEvent::Terminal {
                resume_token: None,
                raw_result: Some("done".to_string()),
                is_error: false,
            }]
        );
        assert!(!parser.has_pending());
    }

    #[test]
    fn test_malformed_and_unknown_lines_are_dropped() {
        let mut parser = EventLineParser::new();
        let events = parser.feed(b"{\"type\":\"content_block_delta\"}\n{broken\n\n{\"no_type\":1}\n[1,2]\n");
        assert!(events.is_empty());
    }

    #[test]
    fn test_result_error_flag_and_missing_text() {
        let event = parse_line(br#"{"type":"result","is_error":true,"session_id":""}"#).unwrap();
        assert_eq!(
            event,
            ProtocolEvent::Terminal {
                resume_token: None,
                raw_result: None,
                is_error: true,
            }
        );
    }

    #[test]
    fn test_crlf_lines() {
        let mut parser = EventLineParser::new();
        let events = parser.feed(b"{\"type\":\"content_block_delta\",\"delta\":{\"text\":\"a\"}}\r\n");
        assert_eq!(events, vec![delta("a")]);
    }
}
