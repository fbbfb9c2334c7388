// Reasoning engine data models
//
// Types exchanged between the engine driver and its callers: the request,
// the parsed protocol events, the per-invocation state and the completion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::tool_call::ToolCall;

/// Opaque key identifying a conversation thread
pub type ConversationId = i64;

/// Lifecycle state of a single engine invocation
///
/// `Running` is the only non-terminal state. `Stalled` and `TimedOut` are
/// error outcomes kept distinct for diagnostics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    Running,
    Completed,
    Errored,
    Cancelled,
    Stalled,
    TimedOut,
}

impl InvocationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvocationState::Running)
    }

    /// Whether the invocation ended in an error outcome
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            InvocationState::Errored | InvocationState::Stalled | InvocationState::TimedOut
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationState::Running => "running",
            InvocationState::Completed => "completed",
            InvocationState::Errored => "errored",
            InvocationState::Cancelled => "cancelled",
            InvocationState::Stalled => "stalled",
            InvocationState::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for InvocationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Informational event emitted by the engine (session init, etc.)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaInfo {
    pub subtype: Option<String>,
    pub session_id: Option<String>,
}

/// One parsed line of engine output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// Incremental text
    Delta { text: String },
    /// Final result of the invocation
    Terminal {
        resume_token: Option<String>,
        raw_result: Option<String>,
        is_error: bool,
    },
    Meta { info: MetaInfo },
}

/// Request to run one prompt through the engine
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub conversation_id: ConversationId,
    /// Fully assembled prompt, written to the engine's stdin
    pub prompt: String,
    /// Session token from a prior invocation of this conversation
    pub resume_token: Option<String>,
    /// Hard deadline override; the configured default applies when `None`
    pub timeout: Option<Duration>,
}

impl EngineRequest {
    pub fn new(conversation_id: ConversationId, prompt: impl Into<String>) -> Self {
        Self {
            conversation_id,
            prompt: prompt.into(),
            resume_token: None,
            timeout: None,
        }
    }

    pub fn with_resume_token(mut self, token: Option<String>) -> Self {
        self.resume_token = token.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result handed to `on_complete`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineCompletion {
    pub text: String,
    pub resume_token: Option<String>,
    pub tool_call: Option<ToolCall>,
    /// True when the text was rebuilt from streamed deltas instead of a result event
    pub reconstructed: bool,
}

/// Mutable state of one in-flight invocation, owned by the driver task
#[derive(Debug)]
pub struct Invocation {
    pub id: String,
    pub conversation_id: ConversationId,
    pub resume_token: Option<String>,
    pub started_at: DateTime<Utc>,
    accumulated_text: String,
    max_output_bytes: usize,
    truncated: bool,
    state: InvocationState,
}

impl Invocation {
    pub fn new(
        id: String,
        conversation_id: ConversationId,
        resume_token: Option<String>,
        max_output_bytes: usize,
    ) -> Self {
        Self {
            id,
            conversation_id,
            resume_token,
            started_at: Utc::now(),
            accumulated_text: String::new(),
            max_output_bytes,
            truncated: false,
            state: InvocationState::Running,
        }
    }

    pub fn state(&self) -> InvocationState {
        self.state
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Append a text delta, respecting the output cap.
    ///
    /// Returns `true` if any text was appended. Once the cap is reached the
    /// remainder is dropped on a char boundary and later deltas are ignored.
    pub fn append_delta(&mut self, text: &str) -> bool {
        if self.truncated || text.is_empty() {
            return false;
        }

        let room = self.max_output_bytes.saturating_sub(self.accumulated_text.len());
        if text.len() <= room {
            self.accumulated_text.push_str(text);
            return true;
        }

        let mut cut = room;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        self.accumulated_text.push_str(&text[..cut]);
        self.truncated = true;
        cut > 0
    }

    /// Move to a terminal state. Transitions are one-way; returns `false`
    /// if the invocation had already left `Running`.
    pub fn finish(&mut self, state: InvocationState) -> bool {
        if self.state.is_terminal() || !state.is_terminal() {
            return false;
        }
        self.state = state;
        true
    }
}
