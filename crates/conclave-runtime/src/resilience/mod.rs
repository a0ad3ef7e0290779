//! Resilience patterns for conclave-runtime.
//!
//! This module provides:
//! - Circuit breaker per provider
//! - Process-wide rate limiting
//! - The fallback ladder used after every provider failed

mod circuit_breaker;
mod fallback;
mod rate_limiter;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState, Transition,
};
pub use fallback::{FallbackConfig, FallbackLadder};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
