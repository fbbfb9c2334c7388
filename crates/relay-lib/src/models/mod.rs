// Data models shared by the relay services

pub mod engine;
pub mod provider;
pub mod tool_call;

pub use engine::*;
pub use provider::*;
pub use tool_call::*;
