//! LLM provider abstractions for conclave-runtime.
//!
//! This module defines the trait every upstream provider implements, the
//! normalized request/response shapes, and the error taxonomy the fallback
//! chain acts on. Implementations exist for Anthropic, OpenAI (which also
//! serves local OpenAI-compatible servers) and the mock endpoint.
//!
//! ## Security
//!
//! All providers use the [`secrets`] module for credential handling.
//! See [`ApiCredential`] for the recommended patterns.

use async_trait::async_trait;
use conclave_core::{ProviderId, RoleId, TokenUsage};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

mod factory;
pub mod secrets;

#[cfg(feature = "anthropic")]
mod anthropic;

#[cfg(feature = "openai")]
mod openai;

#[cfg(feature = "mock-endpoint")]
mod mock;

pub use factory::{build_provider, ProviderRegistry};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "anthropic")]
pub use anthropic::AnthropicProvider;

#[cfg(feature = "openai")]
pub use openai::OpenAiProvider;

#[cfg(feature = "mock-endpoint")]
pub use mock::MockEndpointProvider;

/// Errors from LLM providers.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Authentication failed")]
    AuthError,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Provider returned an empty response")]
    EmptyResponse,

    #[error("Circuit open for provider {0}")]
    CircuitOpen(ProviderId),
}

/// How the fallback chain should react to a provider error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Will not succeed this session: exclude the provider
    Permanent,

    /// May succeed later: retry or move on
    Transient,

    /// Malformed request or response: move on
    Unknown,
}

impl ProviderError {
    /// Classify the error for the fallback chain.
    ///
    /// - permanent: 401, 402, missing configuration
    /// - transient: 429, 5xx, network, timeout, open circuit
    /// - unknown: validation failures and other 4xx
    pub fn classify(&self) -> ErrorClass {
        match self {
            ProviderError::AuthError | ProviderError::NotConfigured(_) => ErrorClass::Permanent,
            ProviderError::ApiError { status, .. } => match status {
                401 | 402 => ErrorClass::Permanent,
                429 | 500..=599 => ErrorClass::Transient,
                _ => ErrorClass::Unknown,
            },
            ProviderError::HttpError(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::Timeout(_)
            | ProviderError::CircuitOpen(_) => ErrorClass::Transient,
            ProviderError::ParseError(_) | ProviderError::EmptyResponse => ErrorClass::Unknown,
        }
    }

    /// Transient errors worth repeating against the same provider.
    ///
    /// Rate limits and open circuits are transient but a second call would
    /// hit the same wall, so the chain moves on instead.
    pub fn is_retryable(&self) -> bool {
        self.classify() == ErrorClass::Transient
            && !matches!(
                self,
                ProviderError::RateLimited { .. }
                    | ProviderError::CircuitOpen(_)
                    | ProviderError::ApiError { status: 429, .. }
            )
    }

    /// Map an HTTP status to the matching error.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            401 => ProviderError::AuthError,
            429 => ProviderError::RateLimited { retry_after: None },
            _ => ProviderError::ApiError {
                status,
                message: message.into(),
            },
        }
    }
}

/// One normalized completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Role asking
    pub role: RoleId,

    /// Problem statement the role is working on
    pub topic: String,

    /// Role instructions
    pub system_prompt: String,

    /// Full user prompt including prior contributions
    pub prompt: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Per-call timeout
    pub timeout: Duration,
}

/// Normalized response from a provider.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated content
    pub content: String,

    /// Token usage
    pub usage: TokenUsage,

    /// Model that answered
    pub model: String,

    /// Stop reason
    pub finish_reason: Option<String>,

    /// Quality reported by the upstream, if it scores its own output
    pub quality: Option<f64>,

    /// Confidence reported by the upstream, if it scores its own output
    pub confidence: Option<f64>,
}

impl CompletionResponse {
    /// Plain text response with no self-reported scores.
    pub fn text(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: TokenUsage::default(),
            model: model.into(),
            finish_reason: None,
            quality: None,
            confidence: None,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_finish_reason(mut self, reason: Option<String>) -> Self {
        self.finish_reason = reason;
        self
    }

    pub fn with_scores(mut self, quality: f64, confidence: f64) -> Self {
        self.quality = Some(quality);
        self.confidence = Some(confidence);
        self
    }
}

/// Provider abstraction allows swapping LLM backends.
///
/// Implementations only translate and transport. Retries, circuit
/// breaking, rate limiting and caching live in the gateway.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Which upstream this is.
    fn id(&self) -> ProviderId;

    /// Model requests are sent to.
    fn model(&self) -> &str;

    /// Execute a completion.
    async fn complete(&self, request: &CompletionRequest)
        -> Result<CompletionResponse, ProviderError>;

    /// Check if provider is usable.
    async fn health_check(&self) -> bool;

    /// Estimate tokens for a prompt.
    fn estimate_tokens(&self, text: &str) -> u32 {
        // ~4 chars per token
        (text.len() / 4) as u32
    }
}

/// Extract `Retry-After` seconds from a response.
#[cfg(any(feature = "anthropic", feature = "openai", feature = "mock-endpoint"))]
pub(crate) fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Map a reqwest transport error.
#[cfg(any(feature = "anthropic", feature = "openai", feature = "mock-endpoint"))]
pub(crate) fn transport_error(error: reqwest::Error, timeout: Duration) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        ProviderError::HttpError(error.to_string())
    }
}
