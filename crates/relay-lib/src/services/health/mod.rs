// Provider Health Module
//
// Failure classification, per-provider cooldowns, and the router that uses
// both to pick a provider.

pub mod classifier;
pub mod router;
pub mod tracker;

pub use classifier::{classify, classify_error, infer_provider, should_penalize_caller};
pub use router::{AttemptOutcome, ProviderRouter, RouteAttempt, RoutedCompletion, RouterError};
pub use tracker::ProviderHealthTracker;
