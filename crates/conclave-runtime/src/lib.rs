//! # conclave-runtime
//!
//! Resilient session runtime for Conclave.
//!
//! This crate drives multi-role consensus sessions against real LLM
//! providers and keeps them alive when providers misbehave.
//!
//! ## Important
//!
//! All scoring, metrics and convergence logic lives in `conclave-core` and
//! is deterministic. This crate adds the parts that talk to the outside
//! world:
//! - Provider clients (Anthropic, OpenAI, local OpenAI-compatible, mock endpoint)
//! - Circuit breaker, rate limiter and response cache shared across sessions
//! - The provider fallback chain and fallback ladder
//! - The session loop, cancellation and deadlines
//!
//! A role always gets a contribution: when every provider fails, the
//! ladder ends in a rule-based answer.
//!
//! ## Example
//!
//! ```rust,ignore
//! use conclave_runtime::{Orchestrator, RuntimeConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = RuntimeConfig::from_yaml_file("conclave.yaml")?;
//! let orchestrator = Orchestrator::builder().config(config).build()?;
//!
//! let session = orchestrator
//!     .solve_problem("Design a rate limiter for a multi-tenant API", &CancellationToken::new())
//!     .await?;
//! println!("{:?}: {}", session.status, session.solution.map(|s| s.content).unwrap_or_default());
//! ```

pub mod cache;
pub mod config;
pub mod gateway;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod resilience;
pub mod telemetry;

pub use cache::{CacheConfig, CacheStats, ResponseCache};
pub use config::{ConfigError, ProviderSettings, ProvidersConfig, RuntimeConfig};
pub use gateway::{FallbackOrchestrator, ProviderGateway, SessionContext};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use prompts::RoleTurn;
pub use providers::{
    CompletionRequest, CompletionResponse, ErrorClass, LlmProvider, ProviderError,
    ProviderRegistry,
};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState, FallbackConfig,
    FallbackLadder, RateLimiter, RateLimiterConfig,
};
pub use telemetry::{CallRecord, LlmUsage, MemorySink, TelemetrySink, TracingSink};

use conclave_core::RoleId;
use thiserror::Error;

/// Errors from the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("No provider could be configured")]
    NoProviders,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("All providers and fallbacks exhausted for role {role}")]
    AllProvidersExhausted { role: RoleId },

    #[error("Session cancelled")]
    Cancelled,
}
