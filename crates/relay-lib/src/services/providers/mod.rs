// Remote Provider Module
//
// HTTP clients for the remote LLM providers the router falls back across.

pub mod error;
pub mod openai_compatible;

use async_trait::async_trait;
use std::sync::Arc;

pub use error::{ProviderError, ProviderErrorCode, ProviderResult};
pub use openai_compatible::OpenAiCompatibleProvider;

use crate::config::ProvidersConfig;
use crate::models::provider::ProviderId;

/// Trait for remote chat providers
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Single-turn completion of an already assembled prompt
    async fn complete(&self, prompt: &str) -> ProviderResult<String>;
}

/// Shared provider handle
pub type SharedChatProvider = Arc<dyn ChatProvider>;

/// Build providers in routing order from configuration.
///
/// Providers whose API key variable is configured but unset are skipped with
/// a warning; local providers without a key are always built.
pub fn build_providers<F>(config: &ProvidersConfig, lookup_env: F) -> Vec<SharedChatProvider>
where
    F: Fn(&str) -> Option<String>,
{
    let mut providers: Vec<SharedChatProvider> = Vec::new();

    for id in &config.order {
        let endpoint = config.endpoint(*id).cloned().unwrap_or_default();
        let key_env = endpoint
            .api_key_env
            .clone()
            .or_else(|| id.default_api_key_env().map(str::to_string));

        let api_key = match key_env {
            Some(ref var) => match lookup_env(var).filter(|k| !k.trim().is_empty()) {
                Some(key) => Some(key),
                None => {
                    log::warn!(
                        "[Providers] Skipping {}: {} is not set",
                        id.display_name(),
                        var
                    );
                    continue;
                }
            },
            None => None,
        };

        providers.push(Arc::new(OpenAiCompatibleProvider::new(*id, &endpoint, api_key)));
    }

    providers
}
