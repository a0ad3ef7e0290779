//! API keys for upstream providers.
//!
//! Keys are resolved from [`ProviderSettings`]: an inline `api_key` wins,
//! then the variable named by `api_key_env`, then the provider's default
//! variable. The value is held in a [`SecretString`] and only leaves it
//! through [`ApiCredential::expose`] when a request header is built.
//!
//! ```ignore
//! let key = ApiCredential::require(ProviderId::Anthropic, &settings)?;
//! request.header("x-api-key", key.expose());
//! ```

use conclave_core::ProviderId;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use super::ProviderError;
use crate::config::ProviderSettings;

/// Variable read when the settings name none.
pub fn default_env_var(provider: ProviderId) -> Option<&'static str> {
    match provider {
        ProviderId::Anthropic => Some("ANTHROPIC_API_KEY"),
        ProviderId::OpenAi => Some("OPENAI_API_KEY"),
        ProviderId::Local => Some("LOCAL_LLM_API_KEY"),
        ProviderId::Mock => None,
    }
}

/// Where a key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Inline `api_key` in the provider settings
    Settings,
    Environment,
    /// Passed straight to a provider constructor
    Direct,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CredentialSource::Settings => "settings",
            CredentialSource::Environment => "environment",
            CredentialSource::Direct => "direct",
        };
        f.write_str(s)
    }
}

/// API key for one provider. Never printed.
pub struct ApiCredential {
    provider: ProviderId,
    source: CredentialSource,
    value: SecretString,
}

impl ApiCredential {
    pub fn direct(provider: ProviderId, value: impl Into<String>) -> Self {
        Self {
            provider,
            source: CredentialSource::Direct,
            value: SecretString::from(value.into()),
        }
    }

    /// Resolve a key, or `None` when neither settings nor environment hold one.
    pub fn resolve(provider: ProviderId, settings: &ProviderSettings) -> Option<Self> {
        if let Some(inline) = settings.api_key.as_deref().filter(|v| !v.is_empty()) {
            return Some(Self {
                provider,
                source: CredentialSource::Settings,
                value: SecretString::from(inline.to_string()),
            });
        }

        let var = Self::env_var(provider, settings)?;
        let value = std::env::var(var).ok().filter(|v| !v.is_empty())?;
        Some(Self {
            provider,
            source: CredentialSource::Environment,
            value: SecretString::from(value),
        })
    }

    /// Resolve a key the provider cannot work without.
    pub fn require(provider: ProviderId, settings: &ProviderSettings) -> Result<Self, ProviderError> {
        Self::resolve(provider, settings).ok_or_else(|| {
            let hint = match Self::env_var(provider, settings) {
                Some(var) => format!("set api_key or {var}"),
                None => "set api_key".to_string(),
            };
            ProviderError::NotConfigured(format!("{provider} API key missing: {hint}"))
        })
    }

    /// Whether a key can be resolved, without keeping it.
    pub fn is_configured(provider: ProviderId, settings: &ProviderSettings) -> bool {
        Self::resolve(provider, settings).is_some()
    }

    fn env_var(provider: ProviderId, settings: &ProviderSettings) -> Option<&str> {
        settings
            .api_key_env
            .as_deref()
            .or_else(|| default_env_var(provider))
    }

    /// The raw key, for building a request header.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("provider", &self.provider)
            .field("source", &self.source)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} key from {} [REDACTED]", self.provider, self.source)
    }
}
