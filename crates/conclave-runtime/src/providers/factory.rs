//! Provider construction and registry.
//!
//! Providers are a closed set, so construction is one exhaustive match over
//! [`ProviderId`]. The registry holds whatever was built, keyed by id.
//!
//! ## Usage
//!
//! ```ignore
//! let registry = ProviderRegistry::from_config(&config.providers);
//! let anthropic = registry.get(ProviderId::Anthropic);
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use conclave_core::ProviderId;
use tracing::{debug, warn};

use super::{LlmProvider, ProviderError};
use crate::config::{ProviderSettings, ProvidersConfig};

/// Build one provider from its settings.
pub fn build_provider(
    id: ProviderId,
    settings: &ProviderSettings,
) -> Result<Arc<dyn LlmProvider>, ProviderError> {
    match id {
        #[cfg(feature = "anthropic")]
        ProviderId::Anthropic => Ok(Arc::new(super::AnthropicProvider::from_settings(settings)?)),

        #[cfg(feature = "openai")]
        ProviderId::OpenAi | ProviderId::Local => {
            Ok(Arc::new(super::OpenAiProvider::from_settings(id, settings)?))
        }

        #[cfg(feature = "mock-endpoint")]
        ProviderId::Mock => Ok(Arc::new(super::MockEndpointProvider::from_settings(settings))),

        #[allow(unreachable_patterns)]
        _ => {
            let _ = settings;
            Err(ProviderError::NotConfigured(format!(
                "{id} provider requires the '{}' feature",
                feature_for(id)
            )))
        }
    }
}

fn feature_for(id: ProviderId) -> &'static str {
    match id {
        ProviderId::Anthropic => "anthropic",
        ProviderId::OpenAi => "openai",
        ProviderId::Local => "local",
        ProviderId::Mock => "mock-endpoint",
    }
}

/// Providers available to a session.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<ProviderId, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every configured provider.
    ///
    /// A provider that cannot be built (missing key, missing feature) is
    /// logged and left out; the session runs on the rest.
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let mut registry = Self::new();
        for id in config.configured() {
            let Some(settings) = config.settings(id) else {
                continue;
            };
            match build_provider(id, settings) {
                Ok(provider) => {
                    debug!(provider = %id, model = provider.model(), "provider registered");
                    registry.register(provider);
                }
                Err(e) => warn!(provider = %id, error = %e, "provider skipped"),
            }
        }
        registry
    }

    /// Register a provider, replacing any with the same id.
    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.id(), provider);
    }

    pub fn get(&self, id: ProviderId) -> Option<&Arc<dyn LlmProvider>> {
        self.providers.get(&id)
    }

    pub fn contains(&self, id: ProviderId) -> bool {
        self.providers.contains_key(&id)
    }

    /// Registered ids in enum order.
    pub fn ids(&self) -> Vec<ProviderId> {
        self.providers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.ids())
            .finish()
    }
}
