// Relay core library
//
// Drives the external reasoning engine subprocess, recovers tool calls from
// its output, and tracks the health of remote LLM providers.

pub mod config;
pub mod models;
pub mod services;
pub mod session_store;
pub mod utils;

pub use config::{ConfigError, EngineConfig, ProviderEndpoint, ProvidersConfig, RelayConfig};
pub use session_store::{MemorySessionStore, SessionStore};
