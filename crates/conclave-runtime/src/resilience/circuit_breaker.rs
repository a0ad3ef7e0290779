//! Circuit breaker to prevent cascade failures.
//!
//! When a provider fails repeatedly its circuit opens and further calls
//! fail fast with [`ProviderError::CircuitOpen`], so the fallback chain
//! moves on without paying the provider's timeout. One circuit exists per
//! provider, shared by every role, iteration and session in the process.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use conclave_core::ProviderId;

use crate::config::duration_str;
use crate::providers::ProviderError;

/// Transitions kept per circuit.
const TRANSITION_LOG_LIMIT: usize = 50;

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening circuit
    pub failure_threshold: u32,

    /// Time before a trial call is allowed
    #[serde(with = "duration_str")]
    pub recovery_timeout: Duration,

    /// Successes in half-open needed to close circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 1,
        }
    }
}

/// State of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation
    Closed,

    /// Failing fast
    Open,

    /// Testing if circuit can close
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of one circuit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub provider: ProviderId,
    pub state: CircuitState,
    pub failure_count: u32,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub health_score: f64,
    pub transitions: Vec<Transition>,
}

#[derive(Debug, Clone)]
struct Circuit {
    state: CircuitState,
    failure_count: u32,
    half_open_successes: u32,
    last_failure: Option<Instant>,
    /// When the current half-open trial was handed out
    trial_started: Option<Instant>,
    total_requests: u64,
    total_successes: u64,
    total_failures: u64,
    transitions: VecDeque<Transition>,
}

impl Default for Circuit {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            half_open_successes: 0,
            last_failure: None,
            trial_started: None,
            total_requests: 0,
            total_successes: 0,
            total_failures: 0,
            transitions: VecDeque::new(),
        }
    }
}

impl Circuit {
    fn transition(&mut self, provider: ProviderId, to: CircuitState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        if self.transitions.len() == TRANSITION_LOG_LIMIT {
            self.transitions.pop_front();
        }
        self.transitions.push_back(Transition {
            from,
            to,
            at: Utc::now(),
        });

        match to {
            CircuitState::Open => {
                tracing::warn!(provider = %provider, %from, failures = self.failure_count, "Circuit opened")
            }
            CircuitState::HalfOpen => {
                tracing::info!(provider = %provider, "Circuit half-open, allowing trial call")
            }
            CircuitState::Closed => {
                tracing::info!(provider = %provider, "Circuit closed after successful recovery")
            }
        }
    }

    fn health_score(&self) -> f64 {
        let success_rate = if self.total_requests == 0 {
            1.0
        } else {
            self.total_successes as f64 / self.total_requests as f64
        };
        let penalty = match self.state {
            CircuitState::Closed => 1.0,
            CircuitState::Open => 0.25,
            CircuitState::HalfOpen => 0.6,
        };
        (success_rate * 100.0 * penalty).clamp(0.0, 100.0)
    }
}

/// Circuit breaker prevents cascade failures.
///
/// Each provider has its own circuit to allow independent recovery.
pub struct CircuitBreaker {
    states: RwLock<HashMap<ProviderId, Circuit>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Check if circuit is open for a provider.
    ///
    /// Once `recovery_timeout` has passed since the last failure, the next
    /// check moves the circuit to half-open and returns `false`: that caller
    /// owns the single trial call. Other callers keep seeing `true` until the
    /// trial resolves, or until it has been outstanding for another
    /// `recovery_timeout`.
    pub fn is_open(&self, provider: ProviderId) -> bool {
        let state = self.states.read().get(&provider).map(|c| c.state);

        match state {
            None | Some(CircuitState::Closed) => false,
            Some(CircuitState::Open | CircuitState::HalfOpen) => !self.try_begin_trial(provider),
        }
    }

    /// Hand out the half-open trial if it is due. Returns true if granted.
    fn try_begin_trial(&self, provider: ProviderId) -> bool {
        let mut states = self.states.write();
        let Some(circuit) = states.get_mut(&provider) else {
            return true;
        };
        let timeout = self.config.recovery_timeout;

        match circuit.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let due = circuit
                    .last_failure
                    .map_or(true, |at| at.elapsed() >= timeout);
                if due {
                    circuit.half_open_successes = 0;
                    circuit.trial_started = Some(Instant::now());
                    circuit.transition(provider, CircuitState::HalfOpen);
                }
                due
            }
            CircuitState::HalfOpen => {
                let stale = circuit
                    .trial_started
                    .map_or(true, |at| at.elapsed() >= timeout);
                if stale {
                    circuit.trial_started = Some(Instant::now());
                }
                stale
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self, provider: ProviderId) {
        let mut states = self.states.write();
        let circuit = states.entry(provider).or_default();
        circuit.total_requests += 1;
        circuit.total_successes += 1;

        match circuit.state {
            CircuitState::HalfOpen => {
                circuit.half_open_successes += 1;
                circuit.trial_started = None;
                if circuit.half_open_successes >= self.config.success_threshold {
                    circuit.failure_count = 0;
                    circuit.half_open_successes = 0;
                    circuit.transition(provider, CircuitState::Closed);
                }
            }
            CircuitState::Closed => {
                // Reset failures on success
                circuit.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self, provider: ProviderId) {
        let mut states = self.states.write();
        let circuit = states.entry(provider).or_default();
        circuit.total_requests += 1;
        circuit.total_failures += 1;
        circuit.failure_count += 1;
        circuit.last_failure = Some(Instant::now());

        match circuit.state {
            CircuitState::Closed => {
                if circuit.failure_count >= self.config.failure_threshold {
                    circuit.transition(provider, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                // Failed during recovery, reopen
                circuit.trial_started = None;
                circuit.half_open_successes = 0;
                circuit.transition(provider, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Run a call through the circuit.
    ///
    /// Fails immediately with [`ProviderError::CircuitOpen`] when open;
    /// otherwise records the outcome and passes the call's result through.
    pub async fn execute<F, T>(&self, provider: ProviderId, call: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        if self.is_open(provider) {
            return Err(ProviderError::CircuitOpen(provider));
        }

        match call.await {
            Ok(value) => {
                self.record_success(provider);
                Ok(value)
            }
            Err(e) => {
                self.record_failure(provider);
                Err(e)
            }
        }
    }

    /// Get current state of a circuit.
    pub fn state(&self, provider: ProviderId) -> CircuitState {
        self.states
            .read()
            .get(&provider)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Consecutive failures recorded for a provider.
    pub fn failure_count(&self, provider: ProviderId) -> u32 {
        self.states
            .read()
            .get(&provider)
            .map(|c| c.failure_count)
            .unwrap_or(0)
    }

    /// Health in `[0, 100]`: success rate, penalised while not closed.
    pub fn health_score(&self, provider: ProviderId) -> f64 {
        self.states
            .read()
            .get(&provider)
            .map(Circuit::health_score)
            .unwrap_or(100.0)
    }

    pub fn snapshot(&self, provider: ProviderId) -> CircuitSnapshot {
        let states = self.states.read();
        let default = Circuit::default();
        let circuit = states.get(&provider).unwrap_or(&default);
        CircuitSnapshot {
            provider,
            state: circuit.state,
            failure_count: circuit.failure_count,
            total_requests: circuit.total_requests,
            total_successes: circuit.total_successes,
            total_failures: circuit.total_failures,
            health_score: circuit.health_score(),
            transitions: circuit.transitions.iter().cloned().collect(),
        }
    }

    /// Snapshots of every circuit that has seen traffic.
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut ids: Vec<ProviderId> = self.states.read().keys().copied().collect();
        ids.sort();
        ids.into_iter().map(|id| self.snapshot(id)).collect()
    }

    /// Reset all circuits to closed.
    pub fn reset(&self) {
        self.states.write().clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: ProviderId = ProviderId::Anthropic;

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::default();
        assert!(!cb.is_open(P));
        assert_eq!(cb.state(P), CircuitState::Closed);
        assert_eq!(cb.health_score(P), 100.0);
    }

    #[test]
    fn test_circuit_opens_after_failures() {
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        };
        let cb = CircuitBreaker::new(config);

        cb.record_failure(P);
        assert!(!cb.is_open(P));

        cb.record_failure(P);
        assert!(cb.is_open(P));
        assert_eq!(cb.state(P), CircuitState::Open);
    }

    #[test]
    fn test_success_resets_failures() {
        let cb = CircuitBreaker::default();

        cb.record_failure(P);
        cb.record_failure(P);
        cb.record_success(P);
        assert_eq!(cb.failure_count(P), 0);

        // Need 3 more failures to open
        cb.record_failure(P);
        cb.record_failure(P);
        assert!(!cb.is_open(P));
    }

    #[test]
    fn test_providers_are_independent() {
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        };
        let cb = CircuitBreaker::new(config);

        cb.record_failure(ProviderId::Anthropic);
        cb.record_failure(ProviderId::Anthropic);

        assert!(cb.is_open(ProviderId::Anthropic));
        assert!(!cb.is_open(ProviderId::OpenAi));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_half_open_closed_sequence() {
        let cb = CircuitBreaker::default();
        for _ in 0..3 {
            cb.record_failure(P);
        }
        assert!(cb.is_open(P));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cb.is_open(P));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!cb.is_open(P), "first check after timeout grants the trial");
        assert_eq!(cb.state(P), CircuitState::HalfOpen);

        cb.record_success(P);
        assert_eq!(cb.state(P), CircuitState::Closed);
        assert_eq!(cb.failure_count(P), 0);

        let snapshot = cb.snapshot(P);
        let states: Vec<CircuitState> = snapshot.transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            states,
            vec![CircuitState::Open, CircuitState::HalfOpen, CircuitState::Closed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::default();
        for _ in 0..3 {
            cb.record_failure(P);
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!cb.is_open(P));

        cb.record_failure(P);
        assert_eq!(cb.state(P), CircuitState::Open);
        assert!(cb.is_open(P));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_grants_single_trial() {
        let cb = CircuitBreaker::default();
        for _ in 0..3 {
            cb.record_failure(P);
        }
        tokio::time::advance(Duration::from_secs(30)).await;

        assert!(!cb.is_open(P));
        assert!(cb.is_open(P), "second caller must wait for the trial");

        // A trial that never reports back is replaced after another timeout
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!cb.is_open(P));
    }

    #[tokio::test]
    async fn test_execute_fails_fast_when_open() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        };
        let cb = CircuitBreaker::new(config);

        let first: Result<(), _> = cb
            .execute(P, async { Err(ProviderError::HttpError("reset".into())) })
            .await;
        assert!(matches!(first, Err(ProviderError::HttpError(_))));

        let mut called = false;
        let second: Result<(), _> = cb
            .execute(P, async {
                called = true;
                Ok(())
            })
            .await;
        assert!(matches!(second, Err(ProviderError::CircuitOpen(ProviderId::Anthropic))));
        assert!(!called);
    }

    #[test]
    fn test_health_score_penalises_open_circuit() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        };
        let cb = CircuitBreaker::new(config);
        cb.record_success(P);
        cb.record_failure(P);

        // 50% success rate, OPEN penalty 0.25
        assert!((cb.health_score(P) - 12.5).abs() < 1e-9);
    }

    #[test]
    fn test_reset_clears_state() {
        let cb = CircuitBreaker::default();
        for _ in 0..3 {
            cb.record_failure(P);
        }
        cb.reset();
        assert_eq!(cb.state(P), CircuitState::Closed);
        assert!(cb.snapshots().is_empty());
    }
}
