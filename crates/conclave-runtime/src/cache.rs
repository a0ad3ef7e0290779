//! Response cache for conclave-runtime.
//!
//! Successful provider responses are cached per role, topic, prompt, model
//! and temperature so repeated sessions over the same problem skip the
//! network. The cache is shared by every session in the process.
//!
//! Expiry and overflow are handled here rather than by moka: entries carry
//! their own deadline, and an insert into a full cache drops the oldest 10%
//! by insertion time. Writers are serialized so concurrent sessions cannot
//! push the cache past `max_size`.

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use conclave_core::{Contribution, RoleId};

use crate::config::duration_str;

/// Responses shorter than this are never cached.
pub const MIN_CACHEABLE_CHARS: usize = 50;

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries held before the oldest 10% are evicted
    pub max_size: u64,

    /// Lifetime of an entry
    #[serde(with = "duration_str")]
    pub ttl: Duration,

    /// Period of the background expiry sweep
    #[serde(with = "duration_str")]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Request parameters that take part in the key.
#[derive(Debug, Clone, Copy)]
pub struct CacheOptions<'a> {
    pub model: &'a str,
    pub temperature: f32,
}

/// Stable key over normalized inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(u64);

impl CacheKey {
    pub fn new(role: RoleId, topic: &str, prompt: &str, options: CacheOptions<'_>) -> Self {
        let mut hasher = DefaultHasher::new();
        role.as_str().hash(&mut hasher);
        normalize(topic).hash(&mut hasher);
        normalize(prompt).hash(&mut hasher);
        options.model.hash(&mut hasher);
        options.temperature.to_bits().hash(&mut hasher);
        Self(hasher.finish())
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// A cached response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub contribution: Contribution,
    pub role: RoleId,
    /// Normalized topic, for similarity lookups
    pub topic: String,
    pub cached_at: Instant,
    pub expires_at: Instant,
    /// Content length in bytes
    pub size: usize,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Response cache using moka.
pub struct ResponseCache {
    entries: Cache<CacheKey, CacheEntry>,
    config: CacheConfig,
    /// Held across the size check, eviction and insert
    writes: tokio::sync::Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// Create a cache without a background sweep.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Cache::builder().build(),
            config,
            writes: tokio::sync::Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Create a shared cache and start its expiry sweep when a tokio
    /// runtime is available.
    pub fn shared(config: CacheConfig) -> Arc<Self> {
        let cache = Arc::new(Self::new(config));
        if tokio::runtime::Handle::try_current().is_ok() {
            Self::spawn_sweeper(Arc::downgrade(&cache));
        }
        cache
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a response. Hits come back with `cached = true`.
    pub async fn get(
        &self,
        role: RoleId,
        topic: &str,
        prompt: &str,
        options: CacheOptions<'_>,
    ) -> Option<Contribution> {
        let key = CacheKey::new(role, topic, prompt, options);
        match self.entries.get(&key).await {
            Some(entry) if !entry.is_expired(Instant::now()) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(role = ?role, "cache hit");
                Some(entry.contribution.as_cached())
            }
            Some(_) => {
                self.entries.invalidate(&key).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a provider response.
    ///
    /// Synthetic contributions and responses under
    /// [`MIN_CACHEABLE_CHARS`] are skipped. Returns whether it was stored.
    pub async fn set(
        &self,
        role: RoleId,
        topic: &str,
        prompt: &str,
        contribution: &Contribution,
        options: CacheOptions<'_>,
    ) -> bool {
        if contribution.provider.is_none()
            || contribution.content.trim().chars().count() < MIN_CACHEABLE_CHARS
        {
            return false;
        }

        let _writer = self.writes.lock().await;
        self.entries.run_pending_tasks().await;
        if self.entries.entry_count() >= self.config.max_size {
            self.evict_oldest().await;
        }

        // Stored as a plain first-attempt answer; the reader tags it
        let mut stored = contribution.clone();
        stored.fallback = false;
        stored.fallback_strategy = None;
        stored.fallback_provider = None;
        stored.attempt_number = 1;
        stored.cached = false;

        let now = Instant::now();
        let entry = CacheEntry {
            size: stored.content.len(),
            contribution: stored,
            role,
            topic: normalize(topic),
            cached_at: now,
            expires_at: now + self.config.ttl,
        };
        self.entries
            .insert(CacheKey::new(role, topic, prompt, options), entry)
            .await;
        self.entries.run_pending_tasks().await;
        true
    }

    /// Freshest unexpired response for the same role and topic.
    pub async fn get_similar(&self, role: RoleId, topic: &str) -> Option<Contribution> {
        let topic = normalize(topic);
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|(_, entry)| entry.role == role && entry.topic == topic)
            .filter(|(_, entry)| !entry.is_expired(now))
            .max_by_key(|(_, entry)| entry.cached_at)
            .map(|(_, entry)| entry.contribution.as_cached())
    }

    async fn evict_oldest(&self) {
        let mut by_age: Vec<(CacheKey, Instant)> = self
            .entries
            .iter()
            .map(|(key, entry)| (*key, entry.cached_at))
            .collect();
        by_age.sort_by_key(|(_, cached_at)| *cached_at);

        let count = (by_age.len() / 10).max(1);
        for (key, _) in by_age.into_iter().take(count) {
            self.entries.invalidate(&key).await;
        }
        self.entries.run_pending_tasks().await;
        tracing::debug!(evicted = count, "cache overflow, evicted oldest entries");
    }

    /// Drop expired entries. Returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| *key)
            .collect();

        for key in &expired {
            self.entries.invalidate(key).await;
        }
        self.entries.run_pending_tasks().await;
        if !expired.is_empty() {
            tracing::debug!(removed = expired.len(), "cache sweep");
        }
        expired.len()
    }

    /// Periodic sweep that stops once the cache is dropped.
    pub fn spawn_sweeper(cache: Weak<Self>) -> Option<JoinHandle<()>> {
        let interval = cache.upgrade()?.config.sweep_interval;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                cache.sweep_expired().await;
            }
        }))
    }

    pub async fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entry_count().await,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Clear the cache.
    pub async fn invalidate_all(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("config", &self.config)
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::ProviderId;

    const LONG: &str = "Partition the keyspace by tenant and use a token bucket per partition.";

    fn options() -> CacheOptions<'static> {
        CacheOptions {
            model: "test-model",
            temperature: 0.7,
        }
    }

    fn contribution(content: &str) -> Contribution {
        Contribution::new(
            RoleId::Architect,
            content,
            7.0,
            0.8,
            Some(ProviderId::Anthropic),
            "test-model",
        )
    }

    fn small_cache(max_size: u64) -> ResponseCache {
        ResponseCache::new(CacheConfig {
            max_size,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_hit_is_marked_cached() {
        let cache = ResponseCache::default();
        assert!(cache.get(RoleId::Architect, "topic", "prompt", options()).await.is_none());

        assert!(cache.set(RoleId::Architect, "topic", "prompt", &contribution(LONG), options()).await);

        let hit = cache
            .get(RoleId::Architect, "topic", "prompt", options())
            .await
            .unwrap();
        assert!(hit.cached);
        assert_eq!(hit.content, LONG);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_key_normalizes_case_and_whitespace() {
        let cache = ResponseCache::default();
        cache.set(RoleId::Architect, "Topic", "  Prompt ", &contribution(LONG), options()).await;

        assert!(cache.get(RoleId::Architect, "topic", "prompt", options()).await.is_some());
        assert!(cache.get(RoleId::Catalyst, "topic", "prompt", options()).await.is_none());

        let other_temp = CacheOptions {
            temperature: 0.2,
            ..options()
        };
        assert!(cache.get(RoleId::Architect, "topic", "prompt", other_temp).await.is_none());
    }

    #[tokio::test]
    async fn test_short_and_synthetic_responses_not_cached() {
        let cache = ResponseCache::default();
        assert!(!cache.set(RoleId::Architect, "t", "p", &contribution("too short"), options()).await);

        let synthetic = Contribution::synthetic(
            RoleId::Architect,
            LONG,
            4.0,
            0.3,
            conclave_core::FallbackStrategy::RuleBased,
        );
        assert!(!cache.set(RoleId::Architect, "t", "p", &synthetic, options()).await);
        assert_eq!(cache.entry_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_respect_max_size() {
        let cache = Arc::new(small_cache(10));
        let mut writers = Vec::new();
        for n in 0..64 {
            let cache = Arc::clone(&cache);
            writers.push(tokio::spawn(async move {
                let prompt = format!("prompt {n}");
                cache
                    .set(RoleId::Architect, "t", &prompt, &contribution(LONG), options())
                    .await
            }));
        }
        for writer in writers {
            assert!(writer.await.unwrap());
        }

        assert!(cache.entry_count().await <= 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_after_ttl() {
        let cache = ResponseCache::new(CacheConfig {
            ttl: Duration::from_secs(60),
            ..Default::default()
        });
        cache.set(RoleId::Architect, "t", "p", &contribution(LONG), options()).await;

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get(RoleId::Architect, "t", "p", options()).await.is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(RoleId::Architect, "t", "p", options()).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_expired() {
        let cache = ResponseCache::new(CacheConfig {
            ttl: Duration::from_secs(10),
            ..Default::default()
        });
        cache.set(RoleId::Architect, "t", "old", &contribution(LONG), options()).await;
        tokio::time::advance(Duration::from_secs(5)).await;
        cache.set(RoleId::Architect, "t", "new", &contribution(LONG), options()).await;
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(cache.sweep_expired().await, 1);
        assert_eq!(cache.entry_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_evicts_oldest() {
        let cache = small_cache(10);
        for i in 0..10 {
            cache
                .set(RoleId::Architect, "t", &format!("prompt {i}"), &contribution(LONG), options())
                .await;
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        assert_eq!(cache.entry_count().await, 10);

        cache.set(RoleId::Architect, "t", "prompt 10", &contribution(LONG), options()).await;
        assert_eq!(cache.entry_count().await, 10);
        assert!(cache.get(RoleId::Architect, "t", "prompt 0", options()).await.is_none());
        assert!(cache.get(RoleId::Architect, "t", "prompt 1", options()).await.is_some());
        assert!(cache.get(RoleId::Architect, "t", "prompt 10", options()).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_similar_returns_freshest() {
        let cache = ResponseCache::default();
        let older = format!("{LONG} (first)");
        let newer = format!("{LONG} (second)");
        cache.set(RoleId::Evaluator, "Queues", "a", &contribution(&older), options()).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.set(RoleId::Evaluator, "queues", "b", &contribution(&newer), options()).await;

        let similar = cache.get_similar(RoleId::Evaluator, "queues").await.unwrap();
        assert_eq!(similar.content, newer);
        assert!(similar.cached);
        assert!(cache.get_similar(RoleId::Architect, "queues").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_when_cache_dropped() {
        let cache = ResponseCache::shared(CacheConfig {
            ttl: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(2),
            ..Default::default()
        });
        cache.set(RoleId::Architect, "t", "p", &contribution(LONG), options()).await;

        let handle = ResponseCache::spawn_sweeper(Arc::downgrade(&cache)).unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(cache.entry_count().await, 0);

        drop(cache);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_invalidate_all() {
        let cache = ResponseCache::default();
        cache.set(RoleId::Architect, "t", "p", &contribution(LONG), options()).await;
        cache.invalidate_all().await;
        assert_eq!(cache.entry_count().await, 0);
    }
}
