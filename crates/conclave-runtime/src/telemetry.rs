//! Usage accounting and telemetry sinks.
//!
//! Every provider call produces a [`CallRecord`]; every finished session
//! produces its [`SessionMetrics`]. Both go to a [`TelemetrySink`]. The
//! default sink writes structured `tracing` events; [`MemorySink`] keeps
//! them for tests and embedding.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use conclave_core::{ProviderId, RoleId, SessionMetrics, TokenUsage};

use crate::providers::ErrorClass;

/// Accumulated LLM usage for a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    /// Prompt/input tokens
    pub prompt_tokens: u64,

    /// Completion/output tokens
    pub completion_tokens: u64,

    /// Number of successful provider calls
    pub llm_calls: u32,

    /// Estimated cost in USD
    pub estimated_cost: f64,

    /// Contributions served from the response cache
    pub cache_hits: u32,

    /// Contributions produced by any fallback path
    pub fallbacks: u32,
}

impl LlmUsage {
    /// Add token usage from a provider response.
    pub fn add(&mut self, usage: &TokenUsage, model: &str) {
        self.prompt_tokens += u64::from(usage.prompt_tokens);
        self.completion_tokens += u64::from(usage.completion_tokens);
        self.llm_calls += 1;
        self.estimated_cost += Self::estimate_cost(usage, model);
    }

    pub fn record_cached(&mut self) {
        self.cache_hits += 1;
    }

    pub fn record_fallback(&mut self) {
        self.fallbacks += 1;
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Estimate cost for a usage entry.
    pub fn estimate_cost(usage: &TokenUsage, model: &str) -> f64 {
        // USD per million tokens (input, output)
        let (input_rate, output_rate) = match model {
            m if m.contains("opus") => (5.0, 25.0),
            m if m.contains("sonnet") => (3.0, 15.0),
            m if m.contains("haiku") => (1.0, 5.0),
            m if m.contains("gpt-4o-mini") => (0.15, 0.6),
            m if m.starts_with("gpt-") => (2.5, 10.0),
            // Local and mock models are free
            _ => (0.0, 0.0),
        };

        let input_cost = (usage.prompt_tokens as f64 / 1_000_000.0) * input_rate;
        let output_cost = (usage.completion_tokens as f64 / 1_000_000.0) * output_rate;
        input_cost + output_cost
    }
}

/// One provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub provider: ProviderId,
    pub model: String,
    pub role: RoleId,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cost: f64,
    pub latency_ms: u64,
    pub success: bool,
    /// Set on failure
    pub error_class: Option<ErrorClass>,
}

/// Destination for telemetry events.
pub trait TelemetrySink: Send + Sync {
    fn record_call(&self, record: &CallRecord);

    fn record_session(&self, problem: &str, metrics: &SessionMetrics);
}

/// Writes telemetry as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record_call(&self, record: &CallRecord) {
        if record.success {
            tracing::debug!(
                provider = %record.provider,
                model = %record.model,
                role = ?record.role,
                prompt_tokens = record.prompt_tokens,
                completion_tokens = record.completion_tokens,
                cost = record.cost,
                latency_ms = record.latency_ms,
                "provider call"
            );
        } else {
            tracing::debug!(
                provider = %record.provider,
                role = ?record.role,
                latency_ms = record.latency_ms,
                error_class = ?record.error_class,
                "provider call failed"
            );
        }
    }

    fn record_session(&self, problem: &str, metrics: &SessionMetrics) {
        tracing::info!(
            problem_chars = problem.chars().count(),
            iterations = metrics.iterations,
            average_quality = metrics.average_quality,
            final_consensus = metrics.final_consensus,
            breakthroughs = metrics.breakthroughs,
            fallbacks = metrics.fallback_contributions,
            cached = metrics.cached_contributions,
            cost = metrics.estimated_cost,
            total_ms = metrics.total_time_ms,
            "session finished"
        );
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    calls: Mutex<Vec<CallRecord>>,
    sessions: Mutex<Vec<SessionMetrics>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().clone()
    }

    pub fn sessions(&self) -> Vec<SessionMetrics> {
        self.sessions.lock().clone()
    }

    /// Calls made to one provider.
    pub fn calls_to(&self, provider: ProviderId) -> Vec<CallRecord> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.provider == provider)
            .cloned()
            .collect()
    }
}

impl TelemetrySink for MemorySink {
    fn record_call(&self, record: &CallRecord) {
        self.calls.lock().push(record.clone());
    }

    fn record_session(&self, _problem: &str, metrics: &SessionMetrics) {
        self.sessions.lock().push(metrics.clone());
    }
}
