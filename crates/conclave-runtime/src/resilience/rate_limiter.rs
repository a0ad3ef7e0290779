//! Process-wide request spacing.
//!
//! One limiter is shared by every session. Callers queue on an async mutex,
//! so outbound calls leave at most once per `1 / requests_per_second`.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Outbound calls per second across all sessions
    pub requests_per_second: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 1.0,
        }
    }
}

impl RateLimiterConfig {
    /// Minimum gap between two calls.
    pub fn min_interval(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.requests_per_second)
            .unwrap_or(Duration::from_secs(1))
    }
}

/// Spaces outbound calls.
#[derive(Debug)]
pub struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: config.min_interval(),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for the next slot and claim it.
    ///
    /// The lock is held across the sleep, which is what serializes callers.
    pub async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            let ready = at + self.min_interval;
            if ready > Instant::now() {
                tracing::trace!(wait_ms = (ready - Instant::now()).as_millis() as u64, "rate limited");
                tokio::time::sleep_until(ready).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Wait for a slot, then run the call.
    pub async fn execute<F, T>(&self, call: F) -> T
    where
        F: Future<Output = T>,
    {
        self.acquire().await;
        call.await
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}
