//! Provider gateway and fallback chain.
//!
//! [`ProviderGateway`] makes one guarded call: circuit breaker around the
//! rate limiter around the provider, under the request timeout.
//! [`FallbackOrchestrator`] turns a role step into a [`Contribution`] by
//! walking providers in preference order, then the fallback ladder.
//!
//! ## Flow for one role
//!
//! ```text
//! for provider in order (minus session exclusions):
//!     cache hit?                      -> return cached
//!     gateway.call (with retries)     -> score, cache, return
//!     permanent error                 -> exclude for the session
//!     transient / unknown             -> next provider after backoff
//! for rung in ladder:
//!     simplified_prompt | similar_cache | rule_based
//! AllProvidersExhausted
//! ```

use backon::{BackoffBuilder, ExponentialBuilder};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use conclave_core::{
    ContentScorer, Contribution, FallbackStrategy, ProviderId, RoleAdjustment, RoleDefinition,
    RoleId, Score, TokenUsage,
};

use crate::cache::{CacheOptions, ResponseCache};
use crate::config::{RequestConfig, RetryConfig};
use crate::prompts::{self, RoleTurn};
use crate::providers::{
    CompletionRequest, CompletionResponse, ErrorClass, LlmProvider, ProviderError,
    ProviderRegistry,
};
use crate::resilience::{CircuitBreaker, FallbackLadder, RateLimiter};
use crate::telemetry::{CallRecord, LlmUsage, TelemetrySink};
use crate::RuntimeError;

/// Upper bound on the wait between two providers.
pub const MAX_PROVIDER_BACKOFF: Duration = Duration::from_secs(3);

/// Scores of the rule-based rung.
pub const RULE_BASED_QUALITY: f64 = 4.0;
pub const RULE_BASED_CONFIDENCE: f64 = 0.3;

/// Confidence assumed when an upstream reports quality but not confidence.
const DEFAULT_REPORTED_CONFIDENCE: f64 = 0.7;

/// Per-session state shared by every role step of one session.
#[derive(Debug)]
pub struct SessionContext {
    excluded: Mutex<HashSet<ProviderId>>,
    usage: Mutex<LlmUsage>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl SessionContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            excluded: Mutex::new(HashSet::new()),
            usage: Mutex::new(LlmUsage::default()),
            cancel,
            deadline: None,
        }
    }

    /// Stop the session at `deadline` as if cancelled.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Skip a provider for the rest of the session.
    pub fn exclude(&self, provider: ProviderId) {
        if self.excluded.lock().insert(provider) {
            info!(provider = %provider, "provider excluded for this session");
        }
    }

    pub fn is_excluded(&self, provider: ProviderId) -> bool {
        self.excluded.lock().contains(&provider)
    }

    pub fn excluded(&self) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> = self.excluded.lock().iter().copied().collect();
        ids.sort();
        ids
    }

    pub fn usage(&self) -> LlmUsage {
        self.usage.lock().clone()
    }

    fn record_usage(&self, usage: &TokenUsage, model: &str) {
        self.usage.lock().add(usage, model);
    }

    fn record_cached(&self) {
        self.usage.lock().record_cached();
    }

    fn record_fallback(&self) {
        self.usage.lock().record_fallback();
    }

    /// True once the token fired or the deadline passed.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves when the session is cancelled or its deadline passes.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }
}

/// Successful guarded call.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub response: CompletionResponse,
    pub latency: Duration,
}

/// One guarded provider call.
pub struct ProviderGateway {
    circuit_breaker: Arc<CircuitBreaker>,
    rate_limiter: Arc<RateLimiter>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl ProviderGateway {
    pub fn new(
        circuit_breaker: Arc<CircuitBreaker>,
        rate_limiter: Arc<RateLimiter>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            circuit_breaker,
            rate_limiter,
            telemetry,
        }
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    /// `breaker(limiter(timeout(complete)))`. Empty content counts as a
    /// provider failure.
    pub async fn call(
        &self,
        provider: &dyn LlmProvider,
        request: &CompletionRequest,
    ) -> Result<CallOutcome, ProviderError> {
        let id = provider.id();
        let result = self
            .circuit_breaker
            .execute(
                id,
                self.rate_limiter.execute(timed_complete(provider, request)),
            )
            .await;

        let record = match &result {
            Ok(outcome) => CallRecord {
                provider: id,
                model: outcome.response.model.clone(),
                role: request.role,
                prompt_tokens: outcome.response.usage.prompt_tokens,
                completion_tokens: outcome.response.usage.completion_tokens,
                cost: LlmUsage::estimate_cost(&outcome.response.usage, &outcome.response.model),
                latency_ms: outcome.latency.as_millis() as u64,
                success: true,
                error_class: None,
            },
            Err(e) => CallRecord {
                provider: id,
                model: provider.model().to_string(),
                role: request.role,
                prompt_tokens: 0,
                completion_tokens: 0,
                cost: 0.0,
                latency_ms: 0,
                success: false,
                error_class: Some(e.classify()),
            },
        };
        self.telemetry.record_call(&record);

        result
    }
}

async fn timed_complete(
    provider: &dyn LlmProvider,
    request: &CompletionRequest,
) -> Result<CallOutcome, ProviderError> {
    let started = Instant::now();
    let response = tokio::time::timeout(request.timeout, provider.complete(request))
        .await
        .map_err(|_| ProviderError::Timeout(request.timeout))??;
    if response.content.trim().is_empty() {
        return Err(ProviderError::EmptyResponse);
    }
    Ok(CallOutcome {
        response,
        latency: started.elapsed(),
    })
}

/// Produces a contribution for a role no matter which providers fail.
pub struct FallbackOrchestrator {
    registry: ProviderRegistry,
    gateway: ProviderGateway,
    cache: Arc<ResponseCache>,
    scorer: Arc<dyn ContentScorer>,
    request: RequestConfig,
    retry: RetryConfig,
    ladder: FallbackLadder,
    preference: Option<Vec<ProviderId>>,
}

impl FallbackOrchestrator {
    pub fn new(
        registry: ProviderRegistry,
        gateway: ProviderGateway,
        cache: Arc<ResponseCache>,
        scorer: Arc<dyn ContentScorer>,
    ) -> Self {
        Self {
            registry,
            gateway,
            cache,
            scorer,
            request: RequestConfig::default(),
            retry: RetryConfig::default(),
            ladder: FallbackLadder::default(),
            preference: None,
        }
    }

    pub fn with_request(mut self, request: RequestConfig) -> Self {
        self.request = request;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_ladder(mut self, ladder: FallbackLadder) -> Self {
        self.ladder = ladder;
        self
    }

    /// Explicit provider order; without one the default order applies.
    pub fn with_preference(mut self, preference: Option<Vec<ProviderId>>) -> Self {
        self.preference = preference;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn gateway(&self) -> &ProviderGateway {
        &self.gateway
    }

    /// Providers to try for the next role step.
    pub fn provider_order(&self, ctx: &SessionContext) -> Vec<ProviderId> {
        let preferred = match &self.preference {
            Some(ids) => ids.clone(),
            None => ProviderId::DEFAULT_ORDER.to_vec(),
        };

        let mut order = Vec::with_capacity(preferred.len());
        for id in preferred {
            if self.registry.contains(id) && !ctx.is_excluded(id) && !order.contains(&id) {
                order.push(id);
            }
        }
        order
    }

    /// Get a contribution for `role`.
    ///
    /// Errors only with [`RuntimeError::Cancelled`], or with
    /// [`RuntimeError::AllProvidersExhausted`] when the configured ladder
    /// has no rule-based rung.
    pub async fn get_contribution(
        &self,
        role: &RoleDefinition,
        turn: &RoleTurn<'_>,
        ctx: &SessionContext,
    ) -> Result<Contribution, RuntimeError> {
        let problem = turn.problem;
        let request = CompletionRequest {
            role: role.id,
            topic: problem.to_string(),
            system_prompt: prompts::system_prompt(role),
            prompt: prompts::build_role_prompt(turn),
            temperature: self.request.temperature,
            max_tokens: self.request.max_tokens,
            timeout: self.request.timeout,
        };

        let order = self.provider_order(ctx);
        let mut backoff = ExponentialBuilder::default()
            .with_min_delay(self.retry.retry_delay)
            .with_max_delay(MAX_PROVIDER_BACKOFF)
            .with_factor(2.0)
            .with_max_times(order.len())
            .build();

        let mut attempt: u32 = 0;
        for id in order.iter().copied() {
            if ctx.is_cancelled() {
                return Err(RuntimeError::Cancelled);
            }
            // Excluded by a concurrent role step of the same session
            if ctx.is_excluded(id) {
                continue;
            }
            let Some(provider) = self.registry.get(id) else {
                continue;
            };
            if attempt > 0 {
                let delay = backoff.next().unwrap_or(MAX_PROVIDER_BACKOFF);
                debug!(provider = %id, delay_ms = delay.as_millis() as u64, "backing off before next provider");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.cancelled() => return Err(RuntimeError::Cancelled),
                }
            }
            attempt += 1;

            let options = CacheOptions {
                model: provider.model(),
                temperature: request.temperature,
            };
            if let Some(hit) = self.cache.get(role.id, problem, &request.prompt, options).await {
                ctx.record_cached();
                if attempt > 1 {
                    ctx.record_fallback();
                }
                return Ok(hit.with_attempt(attempt));
            }

            match self.try_provider(provider.as_ref(), &request).await {
                Ok(outcome) => {
                    ctx.record_usage(&outcome.response.usage, &outcome.response.model);
                    let contribution = self.to_contribution(id, role.id, outcome);
                    self.cache
                        .set(role.id, problem, &request.prompt, &contribution, options)
                        .await;
                    if attempt > 1 {
                        ctx.record_fallback();
                        info!(role = ?role.id, provider = %id, attempt, "fallback provider answered");
                    }
                    return Ok(contribution.with_attempt(attempt));
                }
                Err(e) => match e.classify() {
                    ErrorClass::Permanent => {
                        warn!(role = ?role.id, provider = %id, error = %e, "permanent provider failure");
                        ctx.exclude(id);
                    }
                    ErrorClass::Transient => {
                        warn!(role = ?role.id, provider = %id, error = %e, "transient provider failure");
                    }
                    ErrorClass::Unknown => {
                        warn!(role = ?role.id, provider = %id, error = %e, "provider failed, trying next");
                    }
                },
            }
        }

        self.run_ladder(role.id, problem, ctx).await
    }

    /// Call one provider, repeating retryable failures.
    async fn try_provider(
        &self,
        provider: &dyn LlmProvider,
        request: &CompletionRequest,
    ) -> Result<CallOutcome, ProviderError> {
        let mut retries = 0;
        loop {
            match self.gateway.call(provider, request).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() && retries < self.retry.max_retries => {
                    retries += 1;
                    debug!(provider = %provider.id(), retry = retries, error = %e, "retrying provider");
                    tokio::time::sleep(self.retry.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn to_contribution(&self, id: ProviderId, role: RoleId, outcome: CallOutcome) -> Contribution {
        let CallOutcome { response, latency } = outcome;

        let raw = match response.quality {
            Some(quality) => Score::new(
                quality,
                response.confidence.unwrap_or(DEFAULT_REPORTED_CONFIDENCE),
            ),
            None => self.scorer.score(role, &response.content),
        };
        let score = RoleAdjustment::for_role(role).apply(raw);

        Contribution::new(
            role,
            response.content,
            score.quality,
            score.confidence,
            Some(id),
            response.model,
        )
        .with_latency(latency.as_millis() as u64)
        .with_usage(response.usage)
    }

    async fn run_ladder(
        &self,
        role: RoleId,
        problem: &str,
        ctx: &SessionContext,
    ) -> Result<Contribution, RuntimeError> {
        for strategy in self.ladder.rungs().iter().copied() {
            if ctx.is_cancelled() {
                return Err(RuntimeError::Cancelled);
            }
            warn!(role = ?role, strategy = %strategy, "all providers failed, trying fallback rung");

            let contribution = match strategy {
                FallbackStrategy::SimplifiedPrompt => self.simplified(role, problem, ctx).await,
                FallbackStrategy::SimilarCache => {
                    let hit = self.cache.get_similar(role, problem).await;
                    if hit.is_some() {
                        ctx.record_cached();
                    }
                    hit
                }
                FallbackStrategy::RuleBased => Some(Contribution::synthetic(
                    role,
                    prompts::rule_based_response(role, problem),
                    RULE_BASED_QUALITY,
                    RULE_BASED_CONFIDENCE,
                    FallbackStrategy::RuleBased,
                )),
                FallbackStrategy::ProviderFallback | FallbackStrategy::RoleRecovery => None,
            };

            if let Some(contribution) = contribution {
                ctx.record_fallback();
                return Ok(contribution.with_strategy(strategy));
            }
        }

        Err(RuntimeError::AllProvidersExhausted { role })
    }

    /// Shortened prompt against the mock endpoint, if one is registered.
    async fn simplified(
        &self,
        role: RoleId,
        problem: &str,
        ctx: &SessionContext,
    ) -> Option<Contribution> {
        if ctx.is_excluded(ProviderId::Mock) {
            return None;
        }
        let provider = self.registry.get(ProviderId::Mock)?;
        let request = CompletionRequest {
            role,
            topic: problem.to_string(),
            system_prompt: String::new(),
            prompt: prompts::simplified_prompt(role, problem),
            temperature: self.request.temperature,
            max_tokens: self.request.max_tokens,
            timeout: self.request.timeout,
        };

        match self.gateway.call(provider.as_ref(), &request).await {
            Ok(outcome) => {
                ctx.record_usage(&outcome.response.usage, &outcome.response.model);
                Some(self.to_contribution(ProviderId::Mock, role, outcome))
            }
            Err(e) => {
                debug!(role = ?role, error = %e, "simplified prompt failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{CircuitBreakerConfig, RateLimiterConfig};
    use crate::telemetry::MemorySink;
    use async_trait::async_trait;
    use conclave_core::HeuristicScorer;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ANSWER: &str = "Shard the queue by tenant, keep a dead-letter topic and alert on consumer lag above one minute.";

    /// Replays scripted results, then repeats the last one.
    struct ScriptedProvider {
        id: ProviderId,
        script: Mutex<VecDeque<Result<CompletionResponse, ProviderError>>>,
        last: Result<CompletionResponse, ProviderError>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn always(id: ProviderId, result: Result<CompletionResponse, ProviderError>) -> Arc<Self> {
            Arc::new(Self {
                id,
                script: Mutex::new(VecDeque::new()),
                last: result,
                calls: AtomicUsize::new(0),
            })
        }

        fn ok(id: ProviderId) -> Arc<Self> {
            Self::always(id, Ok(CompletionResponse::text(ANSWER, "scripted")))
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn id(&self) -> ProviderId {
            self.id
        }

        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| self.last.clone())
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    fn orchestrator(providers: Vec<Arc<dyn LlmProvider>>) -> (FallbackOrchestrator, Arc<MemorySink>) {
        let mut registry = ProviderRegistry::new();
        for provider in providers {
            registry.register(provider);
        }
        let sink = Arc::new(MemorySink::new());
        let gateway = ProviderGateway::new(
            Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
            Arc::new(RateLimiter::new(RateLimiterConfig {
                requests_per_second: 10.0,
            })),
            sink.clone(),
        );
        let fallback = FallbackOrchestrator::new(
            registry,
            gateway,
            Arc::new(ResponseCache::default()),
            Arc::new(HeuristicScorer::new()),
        );
        (fallback, sink)
    }

    fn ctx() -> SessionContext {
        SessionContext::new(CancellationToken::new())
    }

    fn architect() -> RoleDefinition {
        RoleDefinition::default_for(RoleId::Architect)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_provider_answers() {
        let anthropic = ScriptedProvider::ok(ProviderId::Anthropic);
        let (fallback, sink) = orchestrator(vec![anthropic.clone()]);

        let contribution = fallback
            .get_contribution(&architect(), &RoleTurn::first("Design a queue"), &ctx())
            .await
            .unwrap();

        assert_eq!(contribution.provider, Some(ProviderId::Anthropic));
        assert_eq!(contribution.attempt_number, 1);
        assert!(!contribution.fallback);
        assert!(!contribution.fallback_used());
        assert!((1.0..=10.0).contains(&contribution.quality));
        assert_eq!(sink.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_falls_through_and_excludes() {
        let anthropic = ScriptedProvider::always(ProviderId::Anthropic, Err(ProviderError::AuthError));
        let openai = ScriptedProvider::ok(ProviderId::OpenAi);
        let (fallback, _) = orchestrator(vec![anthropic.clone(), openai.clone()]);
        let ctx = ctx();

        let contribution = fallback
            .get_contribution(&architect(), &RoleTurn::first("Design a queue"), &ctx)
            .await
            .unwrap();

        assert!(contribution.fallback_used());
        assert_eq!(contribution.fallback_provider, Some(ProviderId::OpenAi));
        assert_eq!(contribution.attempt_number, 2);
        assert_eq!(
            contribution.fallback_strategy,
            Some(FallbackStrategy::ProviderFallback)
        );
        // Auth errors are not retried
        assert_eq!(anthropic.calls(), 1);
        assert_eq!(ctx.excluded(), vec![ProviderId::Anthropic]);
        assert_eq!(fallback.provider_order(&ctx), vec![ProviderId::OpenAi]);
    }

    /// Fails and excludes another provider, as a parallel role step of the
    /// same session would.
    struct ExcludingProvider {
        ctx: Arc<SessionContext>,
        excludes: ProviderId,
    }

    #[async_trait]
    impl LlmProvider for ExcludingProvider {
        fn id(&self) -> ProviderId {
            ProviderId::Anthropic
        }

        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            self.ctx.exclude(self.excludes);
            Err(ProviderError::ParseError("truncated body".into()))
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_skipped_provider_is_not_an_attempt() {
        let ctx = Arc::new(ctx());
        let anthropic = Arc::new(ExcludingProvider {
            ctx: Arc::clone(&ctx),
            excludes: ProviderId::OpenAi,
        });
        let openai = ScriptedProvider::ok(ProviderId::OpenAi);
        let local = ScriptedProvider::ok(ProviderId::Local);
        let (fallback, _) = orchestrator(vec![anthropic, openai.clone(), local.clone()]);

        let contribution = fallback
            .get_contribution(&architect(), &RoleTurn::first("Design a queue"), &ctx)
            .await
            .unwrap();

        assert_eq!(openai.calls(), 0);
        assert_eq!(local.calls(), 1);
        assert_eq!(contribution.provider, Some(ProviderId::Local));
        assert_eq!(contribution.attempt_number, 2);
        assert_eq!(contribution.fallback_provider, Some(ProviderId::Local));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let anthropic = Arc::new(ScriptedProvider {
            id: ProviderId::Anthropic,
            script: Mutex::new(VecDeque::from([Err(ProviderError::ApiError {
                status: 503,
                message: "overloaded".into(),
            })])),
            last: Ok(CompletionResponse::text(ANSWER, "scripted")),
            calls: AtomicUsize::new(0),
        });
        let (fallback, _) = orchestrator(vec![anthropic.clone()]);

        let contribution = fallback
            .get_contribution(&architect(), &RoleTurn::first("Design a queue"), &ctx())
            .await
            .unwrap();

        assert_eq!(anthropic.calls(), 2);
        assert_eq!(contribution.attempt_number, 1);
        assert!(!contribution.fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_moves_on_without_retry() {
        let anthropic = ScriptedProvider::always(
            ProviderId::Anthropic,
            Err(ProviderError::RateLimited { retry_after: None }),
        );
        let openai = ScriptedProvider::ok(ProviderId::OpenAi);
        let (fallback, _) = orchestrator(vec![anthropic.clone(), openai]);
        let ctx = ctx();

        let contribution = fallback
            .get_contribution(&architect(), &RoleTurn::first("Design a queue"), &ctx)
            .await
            .unwrap();

        assert_eq!(anthropic.calls(), 1);
        assert_eq!(contribution.provider, Some(ProviderId::OpenAi));
        assert!(ctx.excluded().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_transient_failures_reach_rule_based() {
        let failing = |id| {
            ScriptedProvider::always(id, Err(ProviderError::HttpError("connection reset".into())))
        };
        let (fallback, _) = orchestrator(vec![
            failing(ProviderId::Anthropic),
            failing(ProviderId::OpenAi),
        ]);
        let ctx = ctx();

        let contribution = fallback
            .get_contribution(&architect(), &RoleTurn::first("Design a queue"), &ctx)
            .await
            .unwrap();

        assert!(contribution.fallback);
        assert_eq!(contribution.fallback_strategy, Some(FallbackStrategy::RuleBased));
        assert_eq!(contribution.quality, RULE_BASED_QUALITY);
        assert_eq!(contribution.confidence, RULE_BASED_CONFIDENCE);
        assert_eq!(contribution.provider, None);
        assert_eq!(ctx.usage().fallbacks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simplified_prompt_uses_mock_endpoint() {
        // Mock fails the full prompt, then answers the simplified one
        let mock = Arc::new(ScriptedProvider {
            id: ProviderId::Mock,
            script: Mutex::new(VecDeque::from([Err(ProviderError::ParseError("bad".into()))])),
            last: Ok(CompletionResponse::text(ANSWER, "mock-endpoint").with_scores(6.0, 0.6)),
            calls: AtomicUsize::new(0),
        });
        let (fallback, _) = orchestrator(vec![mock.clone()]);

        let contribution = fallback
            .get_contribution(&architect(), &RoleTurn::first("Design a queue"), &ctx())
            .await
            .unwrap();

        assert_eq!(
            contribution.fallback_strategy,
            Some(FallbackStrategy::SimplifiedPrompt)
        );
        assert_eq!(contribution.provider, Some(ProviderId::Mock));
        // Reported quality 6.0 with the Architect multiplier
        assert!((contribution.quality - 6.3).abs() < 1e-9);
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_similar_cache_rung() {
        let flaky = Arc::new(ScriptedProvider {
            id: ProviderId::Anthropic,
            script: Mutex::new(VecDeque::from([Ok(CompletionResponse::text(ANSWER, "scripted"))])),
            last: Err(ProviderError::AuthError),
            calls: AtomicUsize::new(0),
        });
        let (fallback, _) = orchestrator(vec![flaky]);

        let first = fallback
            .get_contribution(&architect(), &RoleTurn::first("Design a queue"), &ctx())
            .await
            .unwrap();
        assert!(!first.cached);

        // Different prior content changes the prompt, so only the similar lookup can hit
        let prior = vec![first.clone()];
        let second = fallback
            .get_contribution(
                &architect(),
                &RoleTurn {
                    prior: &prior,
                    ..RoleTurn::first("Design a queue")
                },
                &ctx(),
            )
            .await
            .unwrap();

        assert!(second.cached);
        assert_eq!(second.fallback_strategy, Some(FallbackStrategy::SimilarCache));
        assert_eq!(second.content, ANSWER);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_provider() {
        let anthropic = ScriptedProvider::ok(ProviderId::Anthropic);
        let (fallback, _) = orchestrator(vec![anthropic.clone()]);

        fallback
            .get_contribution(&architect(), &RoleTurn::first("Design a queue"), &ctx())
            .await
            .unwrap();
        let ctx = ctx();
        let again = fallback
            .get_contribution(&architect(), &RoleTurn::first("Design a queue"), &ctx)
            .await
            .unwrap();

        assert!(again.cached);
        assert_eq!(anthropic.calls(), 1);
        assert_eq!(ctx.usage().cache_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ladder_without_rule_based_can_exhaust() {
        let anthropic = ScriptedProvider::always(ProviderId::Anthropic, Err(ProviderError::AuthError));
        let (fallback, _) = orchestrator(vec![anthropic]);
        let fallback =
            fallback.with_ladder(FallbackLadder::new().then(FallbackStrategy::SimilarCache));

        let err = fallback
            .get_contribution(&architect(), &RoleTurn::first("Design a queue"), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::AllProvidersExhausted { role: RoleId::Architect }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_content_is_provider_failure() {
        let empty = ScriptedProvider::always(
            ProviderId::Anthropic,
            Ok(CompletionResponse::text("   ", "scripted")),
        );
        let openai = ScriptedProvider::ok(ProviderId::OpenAi);
        let (fallback, sink) = orchestrator(vec![empty, openai]);

        let contribution = fallback
            .get_contribution(&architect(), &RoleTurn::first("Design a queue"), &ctx())
            .await
            .unwrap();

        assert_eq!(contribution.provider, Some(ProviderId::OpenAi));
        let failed = sink.calls_to(ProviderId::Anthropic);
        assert_eq!(failed[0].error_class, Some(ErrorClass::Unknown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_preference_order() {
        let (fallback, _) = orchestrator(vec![
            ScriptedProvider::ok(ProviderId::Anthropic),
            ScriptedProvider::ok(ProviderId::Local),
        ]);
        let fallback =
            fallback.with_preference(Some(vec![ProviderId::Local, ProviderId::OpenAi, ProviderId::Anthropic]));

        assert_eq!(
            fallback.provider_order(&ctx()),
            vec![ProviderId::Local, ProviderId::Anthropic]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_context_stops() {
        let anthropic = ScriptedProvider::ok(ProviderId::Anthropic);
        let (fallback, _) = orchestrator(vec![anthropic.clone()]);
        let token = CancellationToken::new();
        token.cancel();

        let err = fallback
            .get_contribution(
                &architect(),
                &RoleTurn::first("Design a queue"),
                &SessionContext::new(token),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Cancelled));
        assert_eq!(anthropic.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_counts_as_cancelled() {
        let ctx = SessionContext::new(CancellationToken::new())
            .with_deadline(Instant::now() + Duration::from_secs(5));
        assert!(!ctx.is_cancelled());
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(ctx.is_cancelled());
    }
}
