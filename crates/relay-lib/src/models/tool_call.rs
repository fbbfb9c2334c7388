// Tool call data models

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A structured action request recovered from engine output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// `namespace.method`
    pub tool: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ToolCall {
    pub fn namespace(&self) -> &str {
        self.tool.split_once('.').map(|(ns, _)| ns).unwrap_or(&self.tool)
    }

    pub fn method(&self) -> &str {
        self.tool.split_once('.').map(|(_, m)| m).unwrap_or("")
    }
}

/// Outcome of tool call extraction
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallCandidate {
    /// The text is plain conversational output
    NoMatch,
    Matched(ToolCall),
}

impl ToolCallCandidate {
    pub fn is_match(&self) -> bool {
        matches!(self, ToolCallCandidate::Matched(_))
    }

    pub fn into_tool_call(self) -> Option<ToolCall> {
        match self {
            ToolCallCandidate::Matched(call) => Some(call),
            ToolCallCandidate::NoMatch => None,
        }
    }
}
