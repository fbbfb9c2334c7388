// Reasoning Engine Module
//
// - parser: line framing and event classification of engine stdout
// - watchdog: inactivity tracking
// - driver: one supervised subprocess per invocation
// - registry: live invocations by conversation
// - detector: binary resolution and version probe
// - security: argument validation and output redaction

pub mod detector;
pub mod driver;
pub mod error;
pub mod parser;
pub mod registry;
pub mod security;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod test_support;

pub use detector::{detect_engine, resolve_binary, DetectedEngine};
pub use driver::{Canceller, EngineDriver, EngineObserver, InvocationHandle};
pub use error::{EngineError, EngineErrorCode, EngineResult};
pub use parser::EventLineParser;
pub use registry::InvocationRegistry;
pub use watchdog::StallWatchdog;
