// Provider Health Tracker
//
// Per-provider failure history and cooldown state. Purely advisory: callers
// consult `is_healthy` before routing and report outcomes afterwards. State
// is in-memory and resets on restart.
//
// Every operation has an `*_at(now)` variant so time can be driven explicitly.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::classifier;
use crate::models::provider::{ErrorClass, ProviderId, ProviderStatus};

/// Failures older than this are pruned regardless of class
const RETENTION_MINUTES: i64 = 60;

/// Number of failure classes reported in `ProviderStatus::recent_errors`
const RECENT_ERRORS_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    class: ErrorClass,
    at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ProviderHealth {
    failures: Vec<FailureRecord>,
    cooldown_until: Option<DateTime<Utc>>,
    cooldown_reason: Option<String>,
}

impl ProviderHealth {
    fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.map(|until| now < until).unwrap_or(false)
    }

    fn reset(&mut self) {
        self.failures.clear();
        self.cooldown_until = None;
        self.cooldown_reason = None;
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::minutes(RETENTION_MINUTES);
        self.failures.retain(|f| f.at > cutoff);
    }

    fn count_in_window(&self, class: ErrorClass, window: Option<Duration>, now: DateTime<Utc>) -> usize {
        self.failures
            .iter()
            .filter(|f| f.class == class)
            .filter(|f| window.map(|w| f.at > now - w).unwrap_or(true))
            .count()
    }
}

/// Shared health state for all remote providers
#[derive(Debug, Default)]
pub struct ProviderHealthTracker {
    entries: Mutex<HashMap<ProviderId, ProviderHealth>>,
}

impl ProviderHealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ProviderId, ProviderHealth>> {
        // A poisoned lock only means another caller panicked mid-update; the
        // map itself is still usable.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// See [`classifier::classify`]
    pub fn classify(error_text: &str) -> ErrorClass {
        classifier::classify(error_text)
    }

    /// See [`classifier::should_penalize_caller`]
    pub fn should_penalize_caller(class: ErrorClass) -> bool {
        classifier::should_penalize_caller(class)
    }

    /// See [`classifier::infer_provider`]
    pub fn infer_provider(error_text: &str) -> Option<ProviderId> {
        classifier::infer_provider(error_text)
    }

    /// Record a failure. Returns `true` if this call started a new cooldown.
    pub fn record_failure(&self, provider: ProviderId, class: ErrorClass) -> bool {
        self.record_failure_at(provider, class, Utc::now())
    }

    pub fn record_failure_at(&self, provider: ProviderId, class: ErrorClass, now: DateTime<Utc>) -> bool {
        let mut entries = self.lock();
        let health = entries.entry(provider).or_default();

        health.failures.push(FailureRecord { class, at: now });
        health.prune(now);

        let Some(policy) = class.policy() else {
            log::debug!(
                "[HealthTracker] {} failure on {} recorded without cooldown",
                class,
                provider
            );
            return false;
        };

        let count = health.count_in_window(class, policy.window, now);
        if count < policy.threshold {
            log::debug!(
                "[HealthTracker] {} failure on {} ({}/{})",
                class,
                provider,
                count,
                policy.threshold
            );
            return false;
        }

        let was_cooling = health.in_cooldown(now);
        let until = now + policy.cooldown;
        // Never shorten an active cooldown
        if health.cooldown_until.map(|current| until > current).unwrap_or(true) {
            health.cooldown_until = Some(until);
            health.cooldown_reason = Some(format!(
                "{} x{} (threshold {}), cooling down for {} min",
                class,
                count,
                policy.threshold,
                policy.cooldown.num_minutes()
            ));
        }

        if was_cooling {
            return false;
        }

        log::warn!(
            "[HealthTracker] {} entering cooldown until {}: {} failures of class {}",
            provider.display_name(),
            until.to_rfc3339(),
            count,
            class
        );
        true
    }

    /// Whether the provider is outside any cooldown.
    ///
    /// An expired cooldown is cleaned up here, together with the failure history.
    pub fn is_healthy(&self, provider: ProviderId) -> bool {
        self.is_healthy_at(provider, Utc::now())
    }

    pub fn is_healthy_at(&self, provider: ProviderId, now: DateTime<Utc>) -> bool {
        let mut entries = self.lock();
        let health = entries.entry(provider).or_default();

        match health.cooldown_until {
            Some(until) if now < until => false,
            Some(_) => {
                log::info!(
                    "[HealthTracker] {} cooldown expired, clearing failure history",
                    provider.display_name()
                );
                health.reset();
                true
            }
            None => true,
        }
    }

    /// Forget all failures and any cooldown, called on an observed success
    pub fn clear_failures(&self, provider: ProviderId) {
        let mut entries = self.lock();
        if let Some(health) = entries.get_mut(&provider) {
            if health.cooldown_until.is_some() {
                log::info!(
                    "[HealthTracker] {} succeeded, cooldown lifted",
                    provider.display_name()
                );
            }
            health.reset();
        }
    }

    /// Diagnostic snapshot for every known provider. Does not mutate state.
    pub fn status(&self) -> Vec<ProviderStatus> {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> Vec<ProviderStatus> {
        let entries = self.lock();
        let mut providers = ProviderId::all();
        for id in entries.keys() {
            if !providers.contains(id) {
                providers.push(*id);
            }
        }

        providers
            .into_iter()
            .map(|provider| match entries.get(&provider) {
                Some(health) => {
                    let skip = health.failures.len().saturating_sub(RECENT_ERRORS_LIMIT);
                    ProviderStatus {
                        provider,
                        healthy: !health.in_cooldown(now),
                        failure_count: health.failures.len(),
                        cooldown_until: health.cooldown_until,
                        cooldown_reason: health.cooldown_reason.clone(),
                        recent_errors: health.failures.iter().skip(skip).map(|f| f.class).collect(),
                    }
                }
                None => ProviderStatus {
                    provider,
                    healthy: true,
                    failure_count: 0,
                    cooldown_until: None,
                    cooldown_reason: None,
                    recent_errors: Vec::new(),
                },
            })
            .collect()
    }

    /// Snapshot of a single provider
    pub fn status_of(&self, provider: ProviderId, now: DateTime<Utc>) -> Option<ProviderStatus> {
        self.status_at(now).into_iter().find(|s| s.provider == provider)
    }
}
