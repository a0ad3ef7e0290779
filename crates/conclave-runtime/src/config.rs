//! Runtime configuration.
//!
//! Loaded from YAML. Every section has defaults, so a file only needs the
//! values it changes. Durations are human strings (`30s`, `500ms`, `30m`).
//!
//! ```yaml
//! consensus:
//!   max_iterations: 6
//! circuit_breaker:
//!   failure_threshold: 3
//!   recovery_timeout: 30s
//! rate_limiter:
//!   requests_per_second: 2
//! providers:
//!   preference: [anthropic, openai]
//!   anthropic:
//!     model: claude-sonnet-4-5-20250514
//!   mock:
//!     base_url: http://localhost:8080
//! session_deadline: 10m
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use conclave_core::{ConsensusConfig, CoreError, ProviderId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::resilience::{CircuitBreakerConfig, FallbackConfig, RateLimiterConfig};

/// Errors loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Thresholds, iteration budget and roles
    pub consensus: ConsensusConfig,

    pub circuit_breaker: CircuitBreakerConfig,

    pub rate_limiter: RateLimiterConfig,

    pub cache: CacheConfig,

    /// Per-call request parameters
    pub request: RequestConfig,

    pub retry: RetryConfig,

    pub fallback: FallbackConfig,

    pub providers: ProvidersConfig,

    /// Wall-clock limit for a whole session
    #[serde(with = "option_duration_str", skip_serializing_if = "Option::is_none")]
    pub session_deadline: Option<Duration>,
}

impl RuntimeConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    /// Serialize back to YAML. API keys are never written.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Reject values the runtime cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.consensus.validate()?;

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.failure_threshold must be at least 1".into(),
            ));
        }
        if self.circuit_breaker.success_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.success_threshold must be at least 1".into(),
            ));
        }

        let rps = self.rate_limiter.requests_per_second;
        if !(rps > 0.0) || !rps.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "rate_limiter.requests_per_second must be positive, got {rps}"
            )));
        }

        if self.cache.max_size == 0 {
            return Err(ConfigError::Invalid("cache.max_size must be at least 1".into()));
        }

        if !(0.0..=2.0).contains(&self.request.temperature) {
            return Err(ConfigError::Invalid(format!(
                "request.temperature must be within [0, 2], got {}",
                self.request.temperature
            )));
        }

        self.fallback.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }
}

/// Parameters sent with every completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    pub temperature: f32,

    pub max_tokens: u32,

    /// Per-call timeout
    #[serde(with = "duration_str")]
    pub timeout: Duration,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Same-provider retries for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Extra attempts on the same provider
    pub max_retries: u32,

    /// Delay between same-provider retries, and the first inter-provider backoff
    #[serde(with = "duration_str")]
    pub retry_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Settings for one upstream provider.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Model override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Inline API key; prefer `api_key_env`
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Endpoint override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_key_env", &self.api_key_env)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Which providers are configured, and in what order to try them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Explicit order; unset means Anthropic, OpenAI, Local, Mock
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preference: Option<Vec<ProviderId>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub anthropic: Option<ProviderSettings>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai: Option<ProviderSettings>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub local: Option<ProviderSettings>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mock: Option<ProviderSettings>,
}

impl ProvidersConfig {
    pub fn settings(&self, id: ProviderId) -> Option<&ProviderSettings> {
        match id {
            ProviderId::Anthropic => self.anthropic.as_ref(),
            ProviderId::OpenAi => self.openai.as_ref(),
            ProviderId::Local => self.local.as_ref(),
            ProviderId::Mock => self.mock.as_ref(),
        }
    }

    /// Providers with a settings section, in default order.
    pub fn configured(&self) -> Vec<ProviderId> {
        ProviderId::DEFAULT_ORDER
            .into_iter()
            .filter(|id| self.settings(*id).is_some())
            .collect()
    }
}

/// `Duration` as a human string.
pub(crate) mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

/// `Option<Duration>` as a human string.
pub(crate) mod option_duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|text| humantime::parse_duration(&text).map_err(serde::de::Error::custom))
            .transpose()
    }
}
