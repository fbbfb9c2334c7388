// Relay services
//
// - engine: reasoning engine subprocess driver and its stream protocol
// - tool_call: structured action recovery from engine text
// - health: provider failure classification, cooldowns and routing
// - providers: HTTP clients for the remote LLM providers

pub mod engine;
pub mod health;
pub mod providers;
pub mod tool_call;

pub use engine::{
    EngineDriver, EngineError, EngineErrorCode, EngineObserver, EngineResult, InvocationHandle,
    InvocationRegistry,
};
pub use health::{ProviderHealthTracker, ProviderRouter};
pub use providers::{ChatProvider, ProviderError};
pub use tool_call::extract_tool_call;
