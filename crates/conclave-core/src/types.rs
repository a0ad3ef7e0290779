//! Core data types shared by the engine and the runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::scoring::{clamp_confidence, clamp_quality};

/// The four fixed personas that contribute to every iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleId {
    Architect,
    Catalyst,
    Synthesizer,
    Evaluator,
}

impl RoleId {
    /// All roles in their default evaluation order.
    pub const ALL: [RoleId; 4] = [
        RoleId::Architect,
        RoleId::Catalyst,
        RoleId::Synthesizer,
        RoleId::Evaluator,
    ];

    /// Stable lowercase identifier, used in cache keys and wire payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleId::Architect => "architect",
            RoleId::Catalyst => "catalyst",
            RoleId::Synthesizer => "synthesizer",
            RoleId::Evaluator => "evaluator",
        }
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream AI providers the runtime knows how to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    /// Anthropic messages API
    Anthropic,
    /// OpenAI chat completions API
    #[serde(rename = "openai")]
    OpenAi,
    /// Local OpenAI-compatible server (Ollama, vLLM, llama.cpp)
    Local,
    /// Mock/lower-cost endpoint speaking the `{builder, topic, prompt}` contract
    Mock,
}

impl ProviderId {
    /// Smart default preference: Anthropic, then OpenAI, then the rest.
    pub const DEFAULT_ORDER: [ProviderId; 4] = [
        ProviderId::Anthropic,
        ProviderId::OpenAi,
        ProviderId::Local,
        ProviderId::Mock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Anthropic => "anthropic",
            ProviderId::OpenAi => "openai",
            ProviderId::Local => "local",
            ProviderId::Mock => "mock",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy that produced a degraded contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    /// A later provider in the preference list answered
    ProviderFallback,

    /// Shortened prompt against the mock/lower-cost endpoint
    SimplifiedPrompt,

    /// Freshest cached response for the same role and topic
    SimilarCache,

    /// Templated per-role response, always succeeds
    RuleBased,

    /// The role step itself failed and was replaced by the orchestrator
    RoleRecovery,
}

impl FallbackStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackStrategy::ProviderFallback => "provider_fallback",
            FallbackStrategy::SimplifiedPrompt => "simplified_prompt",
            FallbackStrategy::SimilarCache => "similar_cache",
            FallbackStrategy::RuleBased => "rule_based",
            FallbackStrategy::RoleRecovery => "role_recovery",
        }
    }
}

impl fmt::Display for FallbackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt
    pub prompt_tokens: u32,

    /// Tokens in the completion
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    /// Total tokens used.
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// One role's answer within one iteration.
///
/// Quality and confidence are clamped on construction, so every
/// `Contribution` in the system satisfies `1 <= quality <= 10` and
/// `0.1 <= confidence <= 1.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    /// Role that produced this contribution
    pub role: RoleId,

    /// Generated text
    pub content: String,

    /// Heuristic quality in [1, 10]
    pub quality: f64,

    /// Heuristic confidence in [0.1, 1.0]
    pub confidence: f64,

    /// Provider that answered (None for synthetic contributions)
    pub provider: Option<ProviderId>,

    /// Model identifier reported by the provider
    pub model: String,

    /// Wall-clock latency of the successful call in milliseconds
    pub latency_ms: u64,

    /// Token usage of the successful call
    pub usage: TokenUsage,

    /// Whether this contribution is degraded in any way
    pub fallback: bool,

    /// Which fallback produced it
    pub fallback_strategy: Option<FallbackStrategy>,

    /// Served from the response cache
    pub cached: bool,

    /// 1-based position in the provider chain of the provider that answered
    pub attempt_number: u32,

    /// Provider that answered after earlier providers failed
    pub fallback_provider: Option<ProviderId>,
}

impl Contribution {
    /// Create a first-attempt contribution from a provider response.
    pub fn new(
        role: RoleId,
        content: impl Into<String>,
        quality: f64,
        confidence: f64,
        provider: Option<ProviderId>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            role,
            content: content.into(),
            quality: clamp_quality(quality),
            confidence: clamp_confidence(confidence),
            provider,
            model: model.into(),
            latency_ms: 0,
            usage: TokenUsage::default(),
            fallback: false,
            fallback_strategy: None,
            cached: false,
            attempt_number: 1,
            fallback_provider: None,
        }
    }

    /// Create a synthetic contribution produced by a fallback strategy.
    pub fn synthetic(
        role: RoleId,
        content: impl Into<String>,
        quality: f64,
        confidence: f64,
        strategy: FallbackStrategy,
    ) -> Self {
        let mut contribution = Self::new(role, content, quality, confidence, None, "template");
        contribution.fallback = true;
        contribution.fallback_strategy = Some(strategy);
        contribution
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Mark this contribution as a response served from the cache.
    pub fn as_cached(mut self) -> Self {
        self.cached = true;
        self
    }

    /// Record that `provider` answered at `attempt_number` after earlier providers failed.
    pub fn with_attempt(mut self, attempt_number: u32) -> Self {
        self.attempt_number = attempt_number;
        if attempt_number > 1 {
            self.fallback = true;
            self.fallback_provider = self.provider;
            if self.fallback_strategy.is_none() {
                self.fallback_strategy = Some(FallbackStrategy::ProviderFallback);
            }
        }
        self
    }

    /// Tag the contribution with a fallback strategy.
    pub fn with_strategy(mut self, strategy: FallbackStrategy) -> Self {
        self.fallback = true;
        self.fallback_strategy = Some(strategy);
        self
    }

    /// True when a later provider answered in place of the preferred one.
    pub fn fallback_used(&self) -> bool {
        self.fallback_provider.is_some()
    }
}

/// Metrics computed once an iteration is sealed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationMetrics {
    /// Weighted mean quality in [0, 10]
    pub quality: f64,

    /// Mean pairwise similarity in [0, 1]
    pub consensus: f64,

    /// `1 - consensus`
    pub diversity: f64,

    /// Unique-token ratio in [0, 1]
    pub novelty: f64,
}

/// One full pass through all roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iteration {
    /// 1-based sequence number
    pub number: u32,

    /// When the iteration was opened
    pub started_at: DateTime<Utc>,

    /// One contribution per role, in evaluation order
    pub contributions: Vec<Contribution>,

    /// Metrics over `contributions`
    pub metrics: IterationMetrics,

    /// Role weights in effect for this iteration
    pub weights: Vec<(RoleId, f64)>,

    /// Whether a breakthrough perturbation was active
    pub breakthrough: bool,
}

impl Iteration {
    /// Contribution for a role, if present.
    pub fn contribution(&self, role: RoleId) -> Option<&Contribution> {
        self.contributions.iter().find(|c| c.role == role)
    }

    /// Number of degraded contributions in this iteration.
    pub fn fallback_count(&self) -> usize {
        self.contributions.iter().filter(|c| c.fallback).count()
    }
}

/// Why a session stopped iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Quality and consensus crossed the convergence bar
    Converged,

    /// The iteration budget ran out
    MaxIterations,

    /// Cancelled or deadline reached after at least one sealed iteration
    Cancelled,
}

/// Final answer synthesized from the best iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    /// Iteration the solution was drawn from
    pub iteration: u32,

    /// Consolidated text
    pub content: String,

    /// Metrics of the source iteration
    pub quality: f64,
    pub consensus: f64,

    /// Weighted mean confidence of the source contributions
    pub confidence: f64,

    /// Roles whose contributions made it into the solution
    pub contributors: Vec<RoleId>,
}

/// Aggregate metrics over a whole session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetrics {
    /// Wall-clock duration in milliseconds
    pub total_time_ms: u64,

    /// Mean of per-iteration quality
    pub average_quality: f64,

    /// Consensus of the last iteration
    pub final_consensus: f64,

    /// Number of breakthrough perturbations applied
    pub breakthroughs: u32,

    /// Iterations used divided by the iteration budget
    pub efficiency: f64,

    /// Iterations sealed
    pub iterations: u32,

    /// Degraded contributions across the session
    pub fallback_contributions: u32,

    /// Contributions served from cache
    pub cached_contributions: u32,

    /// Token usage across all provider calls that produced contributions
    pub prompt_tokens: u64,
    pub completion_tokens: u64,

    /// Estimated spend in USD
    pub estimated_cost: f64,
}

/// A complete consensus session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Problem statement as given by the caller
    pub problem: String,

    pub started_at: DateTime<Utc>,

    /// Sealed iterations in order
    pub iterations: Vec<Iteration>,

    /// Final solution, present once the session completed
    pub solution: Option<Solution>,

    pub metrics: SessionMetrics,

    pub status: SessionStatus,
}

impl Session {
    /// The last sealed iteration.
    pub fn last_iteration(&self) -> Option<&Iteration> {
        self.iterations.last()
    }
}
