// Engine Error Types

use thiserror::Error;

/// Errors reported through `EngineObserver::on_error`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Failed to start engine: {0}")]
    SpawnFailed(String),

    #[error("Failed to write prompt to engine: {0}")]
    StdinWrite(String),

    #[error("Engine timed out after {secs}s")]
    TimedOut { secs: u64 },

    #[error("Engine stalled: no output for {secs}s")]
    Stalled { secs: u64 },

    #[error("Engine exited with code {code:?}: {stderr}")]
    ExitedWithCode { code: Option<i32>, stderr: String },

    #[error("Engine produced no output")]
    EmptyOutput { stderr: String },

    /// Result event flagged `is_error`
    #[error("Engine reported an error: {0}")]
    EngineReported(String),

    #[error("Engine I/O error: {0}")]
    Io(String),

    #[error("Engine binary not found: {0}")]
    EngineNotFound(String),

    #[error("Security violation: {0}")]
    SecurityViolation(String),
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorCode {
    SpawnFailed,
    StdinWrite,
    TimedOut,
    Stalled,
    ExitedWithCode,
    EmptyOutput,
    EngineReported,
    Io,
    EngineNotFound,
    SecurityViolation,
}

impl EngineErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineErrorCode::SpawnFailed => "ENGINE_SPAWN_FAILED",
            EngineErrorCode::StdinWrite => "ENGINE_STDIN_WRITE",
            EngineErrorCode::TimedOut => "ENGINE_TIMED_OUT",
            EngineErrorCode::Stalled => "ENGINE_STALLED",
            EngineErrorCode::ExitedWithCode => "ENGINE_EXITED",
            EngineErrorCode::EmptyOutput => "ENGINE_EMPTY_OUTPUT",
            EngineErrorCode::EngineReported => "ENGINE_REPORTED_ERROR",
            EngineErrorCode::Io => "ENGINE_IO_ERROR",
            EngineErrorCode::EngineNotFound => "ENGINE_NOT_FOUND",
            EngineErrorCode::SecurityViolation => "ENGINE_SECURITY_VIOLATION",
        }
    }
}

impl EngineError {
    pub fn code(&self) -> EngineErrorCode {
        match self {
            EngineError::SpawnFailed(_) => EngineErrorCode::SpawnFailed,
            EngineError::StdinWrite(_) => EngineErrorCode::StdinWrite,
            EngineError::TimedOut { .. } => EngineErrorCode::TimedOut,
            EngineError::Stalled { .. } => EngineErrorCode::Stalled,
            EngineError::ExitedWithCode { .. } => EngineErrorCode::ExitedWithCode,
            EngineError::EmptyOutput { .. } => EngineErrorCode::EmptyOutput,
            EngineError::EngineReported(_) => EngineErrorCode::EngineReported,
            EngineError::Io(_) => EngineErrorCode::Io,
            EngineError::EngineNotFound(_) => EngineErrorCode::EngineNotFound,
            EngineError::SecurityViolation(_) => EngineErrorCode::SecurityViolation,
        }
    }
}
