//! Session loop for multi-role consensus.
//!
//! The orchestrator runs iterations until the roles converge or the
//! iteration budget runs out. It implements:
//! - Sequential role steps, each seeing the earlier roles of its iteration
//! - Metrics, convergence and stagnation checks after every iteration
//! - A one-iteration breakthrough plan after stagnation
//! - Cancellation and an optional session deadline
//!
//! Shared resources (circuit breaker, rate limiter, cache) are injected
//! through [`OrchestratorBuilder`] so several orchestrators, or several
//! concurrent sessions on one orchestrator, can share them.

use chrono::Utc;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use conclave_core::{
    BreakthroughPlan, ContentScorer, Contribution, ConvergenceDetector, FallbackStrategy,
    HeuristicScorer, Iteration, MetricsEngine, Session, SessionMetrics, SessionStatus,
    StagnationDetector, Synthesizer,
};

use crate::cache::ResponseCache;
use crate::config::RuntimeConfig;
use crate::gateway::{FallbackOrchestrator, ProviderGateway, SessionContext};
use crate::prompts::{self, RoleTurn};
use crate::providers::{LlmProvider, ProviderRegistry};
use crate::resilience::{CircuitBreaker, RateLimiter};
use crate::telemetry::{TelemetrySink, TracingSink};
use crate::RuntimeError;

/// Scores of the contribution used when a role step fails outright.
pub const ROLE_RECOVERY_QUALITY: f64 = 4.5;
pub const ROLE_RECOVERY_CONFIDENCE: f64 = 0.4;

/// Runs consensus sessions.
pub struct Orchestrator {
    config: RuntimeConfig,
    fallback: FallbackOrchestrator,
    circuit_breaker: Arc<CircuitBreaker>,
    rate_limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    telemetry: Arc<dyn TelemetrySink>,
    metrics: MetricsEngine,
    convergence: ConvergenceDetector,
    stagnation: StagnationDetector,
    synthesizer: Synthesizer,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn providers(&self) -> &ProviderRegistry {
        self.fallback.registry()
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Run one session.
    ///
    /// # Execution Flow
    /// 1. Open an iteration, applying a pending breakthrough plan
    /// 2. Run every role in order through the fallback chain
    /// 3. Seal the iteration and compute its metrics
    /// 4. Stop on convergence, otherwise check for stagnation
    /// 5. Synthesize the solution from the best iteration
    ///
    /// Fails only with [`RuntimeError::Cancelled`] when cancelled before the
    /// first iteration was sealed. Later cancellation returns the session
    /// with [`SessionStatus::Cancelled`].
    pub async fn solve_problem(
        &self,
        problem: &str,
        cancel: &CancellationToken,
    ) -> Result<Session, RuntimeError> {
        let started = Instant::now();
        let started_at = Utc::now();
        let consensus = &self.config.consensus;

        let mut ctx = SessionContext::new(cancel.child_token());
        if let Some(deadline) = self.config.session_deadline {
            ctx = ctx.with_deadline(started + deadline);
        }

        let base_weights = consensus.roles.weights();
        let mut iterations: Vec<Iteration> = Vec::new();
        let mut consensus_history: Vec<f64> = Vec::new();
        let mut pending: Option<BreakthroughPlan> = None;
        let mut status = SessionStatus::MaxIterations;

        info!(
            roles = consensus.roles.len(),
            max_iterations = consensus.max_iterations,
            providers = ?self.providers().ids(),
            "session started"
        );

        for number in 1..=consensus.max_iterations {
            let plan = pending.take();
            let weights = match &plan {
                Some(plan) => plan.apply(base_weights.clone()),
                None => base_weights.clone(),
            };
            let iteration_started = Utc::now();
            let previous = iterations
                .last()
                .map(|last| last.contributions.as_slice())
                .unwrap_or(&[]);

            let contributions = tokio::select! {
                biased;
                _ = ctx.cancelled() => None,
                contributions = self.run_iteration(problem, number, previous, plan.as_ref(), &ctx) => contributions,
            };
            let Some(contributions) = contributions else {
                info!(iteration = number, "session cancelled, discarding open iteration");
                status = SessionStatus::Cancelled;
                break;
            };

            let metrics = self.metrics.compute_iteration_metrics(&contributions, &weights);
            consensus_history.push(metrics.consensus);

            let iteration = Iteration {
                number,
                started_at: iteration_started,
                contributions,
                metrics,
                weights: weights.into_entries(),
                breakthrough: plan.is_some(),
            };
            info!(
                iteration = number,
                quality = metrics.quality,
                consensus = metrics.consensus,
                novelty = metrics.novelty,
                fallbacks = iteration.fallback_count(),
                breakthrough = iteration.breakthrough,
                "iteration sealed"
            );
            iterations.push(iteration);

            if self
                .convergence
                .evaluate(metrics.quality, metrics.consensus)
                .converged
            {
                info!(iteration = number, "converged");
                status = SessionStatus::Converged;
                break;
            }

            if self.stagnation.is_stagnant(&consensus_history) {
                info!(iteration = number, "consensus stagnant, scheduling breakthrough");
                pending = Some(BreakthroughPlan::new(consensus.breakthrough_boost));
            }
        }

        if iterations.is_empty() {
            return Err(RuntimeError::Cancelled);
        }

        let solution = self.synthesizer.synthesize(&iterations);
        let metrics = self.session_metrics(&iterations, &ctx, started);
        self.telemetry.record_session(problem, &metrics);

        Ok(Session {
            problem: problem.to_string(),
            started_at,
            iterations,
            solution,
            metrics,
            status,
        })
    }

    /// Every role in order. `None` if the session was cancelled mid-way.
    ///
    /// Each role sees the previous iteration's contributions and those
    /// already made in this one.
    async fn run_iteration(
        &self,
        problem: &str,
        round: u32,
        previous: &[Contribution],
        plan: Option<&BreakthroughPlan>,
        ctx: &SessionContext,
    ) -> Option<Vec<Contribution>> {
        let roles = &self.config.consensus.roles;
        let mut contributions: Vec<Contribution> = Vec::with_capacity(roles.len());

        for role in roles.iter() {
            let role_problem = match plan {
                Some(plan) => plan.problem_for(role.id, problem),
                None => problem.to_string(),
            };

            let turn = RoleTurn {
                problem: &role_problem,
                round,
                previous,
                prior: &contributions,
            };
            match self.fallback.get_contribution(role, &turn, ctx).await
            {
                Ok(contribution) => contributions.push(contribution),
                Err(RuntimeError::Cancelled) => return None,
                Err(e) => {
                    warn!(role = ?role.id, error = %e, "role step failed, using recovery contribution");
                    contributions.push(Contribution::synthetic(
                        role.id,
                        prompts::role_recovery_response(role.id, problem),
                        ROLE_RECOVERY_QUALITY,
                        ROLE_RECOVERY_CONFIDENCE,
                        FallbackStrategy::RoleRecovery,
                    ));
                }
            }
        }

        Some(contributions)
    }

    fn session_metrics(
        &self,
        iterations: &[Iteration],
        ctx: &SessionContext,
        started: Instant,
    ) -> SessionMetrics {
        let count = iterations.len();
        let usage = ctx.usage();
        let contributions = || iterations.iter().flat_map(|i| i.contributions.iter());

        SessionMetrics {
            total_time_ms: started.elapsed().as_millis() as u64,
            average_quality: iterations.iter().map(|i| i.metrics.quality).sum::<f64>()
                / count as f64,
            final_consensus: iterations
                .last()
                .map(|i| i.metrics.consensus)
                .unwrap_or_default(),
            breakthroughs: iterations.iter().filter(|i| i.breakthrough).count() as u32,
            efficiency: count as f64 / f64::from(self.config.consensus.max_iterations),
            iterations: count as u32,
            fallback_contributions: contributions().filter(|c| c.fallback).count() as u32,
            cached_contributions: contributions().filter(|c| c.cached).count() as u32,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            estimated_cost: usage.estimated_cost,
        }
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    config: RuntimeConfig,
    registry: Option<ProviderRegistry>,
    providers: Vec<Arc<dyn LlmProvider>>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    rate_limiter: Option<Arc<RateLimiter>>,
    cache: Option<Arc<ResponseCache>>,
    scorer: Option<Arc<dyn ContentScorer>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            registry: None,
            providers: Vec::new(),
            circuit_breaker: None,
            rate_limiter: None,
            cache: None,
            scorer: None,
            telemetry: None,
        }
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this registry instead of building one from the config.
    pub fn providers(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Register one more provider.
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Share a circuit breaker with other orchestrators.
    pub fn circuit_breaker(mut self, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(circuit_breaker);
        self
    }

    pub fn rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    pub fn cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn scorer(mut self, scorer: Arc<dyn ContentScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Build the orchestrator.
    ///
    /// Validates the configuration and fails with
    /// [`RuntimeError::NoProviders`] when no provider could be registered.
    pub fn build(self) -> Result<Orchestrator, RuntimeError> {
        let config = self.config;
        config.validate()?;

        let mut registry = match self.registry {
            Some(registry) => registry,
            None => ProviderRegistry::from_config(&config.providers),
        };
        for provider in self.providers {
            registry.register(provider);
        }
        if registry.is_empty() {
            return Err(RuntimeError::NoProviders);
        }

        let circuit_breaker = self
            .circuit_breaker
            .unwrap_or_else(|| Arc::new(CircuitBreaker::new(config.circuit_breaker.clone())));
        let rate_limiter = self
            .rate_limiter
            .unwrap_or_else(|| Arc::new(RateLimiter::new(config.rate_limiter.clone())));
        let cache = self
            .cache
            .unwrap_or_else(|| ResponseCache::shared(config.cache.clone()));
        let scorer = self
            .scorer
            .unwrap_or_else(|| Arc::new(HeuristicScorer::new()));
        let telemetry = self.telemetry.unwrap_or_else(|| Arc::new(TracingSink));

        let gateway = ProviderGateway::new(
            Arc::clone(&circuit_breaker),
            Arc::clone(&rate_limiter),
            Arc::clone(&telemetry),
        );
        let fallback = FallbackOrchestrator::new(registry, gateway, Arc::clone(&cache), scorer)
            .with_request(config.request.clone())
            .with_retry(config.retry.clone())
            .with_ladder(config.fallback.ladder())
            .with_preference(config.providers.preference.clone());

        Ok(Orchestrator {
            metrics: MetricsEngine::new(),
            convergence: ConvergenceDetector::from_config(&config.consensus),
            stagnation: StagnationDetector::from_config(&config.consensus),
            synthesizer: Synthesizer::new(),
            config,
            fallback,
            circuit_breaker,
            rate_limiter,
            cache,
            telemetry,
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
