// Shared utilities

pub mod path_resolver;
