// Provider Router
//
// Tries providers in preference order, skipping those in cooldown, and feeds
// every outcome back into the shared health tracker.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use super::classifier;
use super::tracker::ProviderHealthTracker;
use crate::models::provider::{ErrorClass, ProviderId};
use crate::services::providers::SharedChatProvider;

/// What happened to one provider during routing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Not called because it is cooling down
    Skipped,
    Failed {
        class: ErrorClass,
        message: String,
        /// The failure likely stems from the request rather than the provider
        penalize_caller: bool,
        cooldown_started: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteAttempt {
    pub provider: ProviderId,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutedCompletion {
    pub provider: ProviderId,
    pub text: String,
    /// Providers tried before the successful one
    pub attempts: Vec<RouteAttempt>,
}

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("No providers configured")]
    NoProviders,

    #[error("All providers failed: {}", summarize(.attempts))]
    Exhausted { attempts: Vec<RouteAttempt> },
}

fn summarize(attempts: &[RouteAttempt]) -> String {
    attempts
        .iter()
        .map(|a| match &a.outcome {
            AttemptOutcome::Skipped => format!("{} (cooling down)", a.provider),
            AttemptOutcome::Failed { class, .. } => format!("{} ({})", a.provider, class),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub struct ProviderRouter {
    providers: Vec<SharedChatProvider>,
    health: Arc<ProviderHealthTracker>,
}

impl ProviderRouter {
    pub fn new(providers: Vec<SharedChatProvider>, health: Arc<ProviderHealthTracker>) -> Self {
        Self { providers, health }
    }

    pub fn health(&self) -> &Arc<ProviderHealthTracker> {
        &self.health
    }

    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.providers.iter().map(|p| p.id()).collect()
    }

    /// Complete `prompt` with the first healthy provider that succeeds.
    ///
    /// Each provider is tried at most once per call.
    pub async fn complete(&self, prompt: &str) -> Result<RoutedCompletion, RouterError> {
        if self.providers.is_empty() {
            return Err(RouterError::NoProviders);
        }

        let mut attempts = Vec::new();

        for provider in &self.providers {
            let id = provider.id();

            if !self.health.is_healthy(id) {
                log::debug!("[Router] Skipping {} (cooling down)", id);
                attempts.push(RouteAttempt {
                    provider: id,
                    outcome: AttemptOutcome::Skipped,
                });
                continue;
            }

            match provider.complete(prompt).await {
                Ok(text) => {
                    self.health.clear_failures(id);
                    return Ok(RoutedCompletion {
                        provider: id,
                        text,
                        attempts,
                    });
                }
                Err(err) => {
                    let message = err.to_string();
                    let class = classifier::classify(&message);
                    let cooldown_started = self.health.record_failure(id, class);
                    log::warn!("[Router] {} failed ({}): {}", id.display_name(), class, message);

                    attempts.push(RouteAttempt {
                        provider: id,
                        outcome: AttemptOutcome::Failed {
                            class,
                            message,
                            penalize_caller: classifier::should_penalize_caller(class),
                            cooldown_started,
                        },
                    });
                }
            }
        }

        Err(RouterError::Exhausted { attempts })
    }
}
