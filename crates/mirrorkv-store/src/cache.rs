//! Read-through cache decorator using [`moka`].
//!
//! [`CachedBackend`] wraps any [`Backend`] and keeps recently read or
//! written values in a `moka::future::Cache`.  Writes go through to the
//! inner backend first and only then update the cache, so a failed write
//! never leaves a stale entry behind.  Missing keys are not cached.
//!
//! Every write bumps a generation counter.  A read-through load only keeps
//! its value if no write happened while it was loading, so a slow read
//! cannot cache a value that a concurrent write already replaced.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use serde_json::Value;
use tracing::debug;

use crate::backend::{Backend, BackendProvider};
use crate::error::StoreResult;

// ── cache stats ──────────────────────────────────────────────────────

/// Counters tracking cache effectiveness.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Total cache hits since creation.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Total cache misses since creation.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Hit rate between 0.0 and 1.0 (0.0 if there were no lookups).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            return 0.0;
        }
        self.hits() as f64 / total as f64
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} rate={:.2}%",
            self.hits(),
            self.misses(),
            self.hit_rate() * 100.0,
        )
    }
}

// ── settings ─────────────────────────────────────────────────────────

/// Capacity and TTL for a [`CachedBackend`].
#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    /// Maximum number of entries held per namespace.
    pub max_capacity: u64,
    /// Time-to-live for each entry.
    pub ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            ttl: Duration::from_secs(300),
        }
    }
}

// ── backend ──────────────────────────────────────────────────────────

/// A [`Backend`] decorator that caches values in memory.
pub struct CachedBackend {
    inner: Arc<dyn Backend>,
    cache: Cache<String, Value>,
    stats: Arc<CacheStats>,
    generation: AtomicU64,
}

impl CachedBackend {
    /// Wrap `inner` with a cache built from `settings`.
    pub fn new(inner: Arc<dyn Backend>, settings: CacheSettings) -> Self {
        let cache = Cache::builder()
            .max_capacity(settings.max_capacity)
            .time_to_live(settings.ttl)
            .build();

        debug!(
            namespace = inner.namespace(),
            max_capacity = settings.max_capacity,
            ttl_secs = settings.ttl.as_secs(),
            "cached backend created"
        );

        Self {
            inner,
            cache,
            stats: Arc::new(CacheStats::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// Cache statistics for this backend.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Mark every load started before this call as stale.
    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Backend for CachedBackend {
    fn namespace(&self) -> &str {
        self.inner.namespace()
    }

    async fn get_item(&self, key: &str) -> StoreResult<Option<Value>> {
        if let Some(value) = self.cache.get(key).await {
            self.stats.record_hit();
            debug!(namespace = self.namespace(), key, "cache hit");
            return Ok(Some(value));
        }

        self.stats.record_miss();
        let started = self.generation();
        let loaded = self.inner.get_item(key).await?;
        let Some(value) = &loaded else {
            return Ok(loaded);
        };
        if self.generation() != started {
            debug!(namespace = self.namespace(), key, "write during load, not caching");
            return Ok(loaded);
        }

        self.cache.insert(key.to_string(), value.clone()).await;
        // A write that bumped after the check above may have finished before
        // the insert; drop the entry rather than keep what it replaced.
        if self.generation() != started {
            self.cache.invalidate(key).await;
        }
        Ok(loaded)
    }

    async fn set_item(&self, key: &str, value: &Value) -> StoreResult<()> {
        self.inner.set_item(key, value).await?;
        self.bump();
        self.cache.insert(key.to_string(), value.clone()).await;
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> StoreResult<()> {
        // Invalidated after the row is gone; loads still in flight see the
        // bumped generation and do not repopulate.
        self.inner.remove_item(key).await?;
        self.bump();
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        self.inner.keys().await
    }

    async fn clear(&self) -> StoreResult<()> {
        self.inner.clear().await?;
        self.bump();
        self.cache.invalidate_all();
        Ok(())
    }

    async fn len(&self) -> StoreResult<usize> {
        self.inner.len().await
    }
}

// ── provider ─────────────────────────────────────────────────────────

/// Wraps every backend opened by `inner` in a [`CachedBackend`].
pub struct CachingProvider {
    inner: Arc<dyn BackendProvider>,
    settings: CacheSettings,
}

impl CachingProvider {
    /// Decorate `inner` with per-namespace caches.
    pub fn new(inner: Arc<dyn BackendProvider>, settings: CacheSettings) -> Self {
        Self { inner, settings }
    }
}

impl BackendProvider for CachingProvider {
    fn kind(&self) -> &'static str {
        self.inner.kind()
    }

    fn open(&self, namespace: &str) -> StoreResult<Arc<dyn Backend>> {
        let inner = self.inner.open(namespace)?;
        Ok(Arc::new(CachedBackend::new(inner, self.settings)))
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use serde_json::json;

    fn make_cached() -> (Arc<MemoryBackend>, CachedBackend) {
        let inner = Arc::new(MemoryBackend::new("cache-test"));
        let cached = CachedBackend::new(inner.clone(), CacheSettings::default());
        (inner, cached)
    }

    /// Reads the stored value, then pauses before handing it back.
    struct SlowReads {
        inner: MemoryBackend,
        pause: Duration,
    }

    #[async_trait]
    impl Backend for SlowReads {
        fn namespace(&self) -> &str {
            self.inner.namespace()
        }

        async fn get_item(&self, key: &str) -> StoreResult<Option<Value>> {
            let value = self.inner.get_item(key).await?;
            tokio::time::sleep(self.pause).await;
            Ok(value)
        }

        async fn set_item(&self, key: &str, value: &Value) -> StoreResult<()> {
            self.inner.set_item(key, value).await
        }

        async fn remove_item(&self, key: &str) -> StoreResult<()> {
            self.inner.remove_item(key).await
        }

        async fn keys(&self) -> StoreResult<Vec<String>> {
            self.inner.keys().await
        }

        async fn clear(&self) -> StoreResult<()> {
            self.inner.clear().await
        }
    }

    async fn slow_cached(key: &str, value: Value) -> Arc<CachedBackend> {
        let inner = SlowReads {
            inner: MemoryBackend::new("slow-reads"),
            pause: Duration::from_millis(50),
        };
        inner.set_item(key, &value).await.unwrap();
        Arc::new(CachedBackend::new(Arc::new(inner), CacheSettings::default()))
    }

    #[tokio::test]
    async fn second_read_is_a_hit() {
        let (inner, cached) = make_cached();
        inner.set_item("k", &json!(1)).await.unwrap();

        assert_eq!(cached.get_item("k").await.unwrap(), Some(json!(1)));
        assert_eq!(cached.get_item("k").await.unwrap(), Some(json!(1)));
        assert_eq!(cached.stats().misses(), 1);
        assert_eq!(cached.stats().hits(), 1);
    }

    #[tokio::test]
    async fn misses_are_not_cached() {
        let (inner, cached) = make_cached();
        assert!(cached.get_item("k").await.unwrap().is_none());

        inner.set_item("k", &json!("late")).await.unwrap();
        assert_eq!(cached.get_item("k").await.unwrap(), Some(json!("late")));
        assert_eq!(cached.stats().misses(), 2);
    }

    #[tokio::test]
    async fn writes_go_through() {
        let (inner, cached) = make_cached();
        cached.set_item("k", &json!({"a": 1})).await.unwrap();
        assert_eq!(inner.get_item("k").await.unwrap(), Some(json!({"a": 1})));
        assert_eq!(cached.get_item("k").await.unwrap(), Some(json!({"a": 1})));
        assert_eq!(cached.stats().hits(), 1);
    }

    #[tokio::test]
    async fn remove_invalidates() {
        let (inner, cached) = make_cached();
        cached.set_item("k", &json!(1)).await.unwrap();
        cached.remove_item("k").await.unwrap();

        assert!(cached.get_item("k").await.unwrap().is_none());
        assert!(inner.get_item("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_invalidates_everything() {
        let (_inner, cached) = make_cached();
        cached.set_item("a", &json!(1)).await.unwrap();
        cached.set_item("b", &json!(2)).await.unwrap();
        cached.clear().await.unwrap();

        assert!(cached.get_item("a").await.unwrap().is_none());
        assert!(cached.get_item("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_in_flight_does_not_cache_a_removed_value() {
        let cached = slow_cached("k", json!("old")).await;

        let reader = tokio::spawn({
            let cached = Arc::clone(&cached);
            async move { cached.get_item("k").await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        cached.remove_item("k").await.unwrap();

        assert_eq!(reader.await.unwrap().unwrap(), Some(json!("old")));
        assert!(cached.get_item("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_in_flight_does_not_shadow_a_newer_write() {
        let cached = slow_cached("k", json!("old")).await;

        let reader = tokio::spawn({
            let cached = Arc::clone(&cached);
            async move { cached.get_item("k").await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        cached.set_item("k", &json!("new")).await.unwrap();

        assert_eq!(reader.await.unwrap().unwrap(), Some(json!("old")));
        assert_eq!(cached.get_item("k").await.unwrap(), Some(json!("new")));
        assert_eq!(cached.stats().hits(), 1);
    }

    #[test]
    fn stats_display() {
        let stats = CacheStats::default();
        stats.hits.store(50, Ordering::Relaxed);
        stats.misses.store(50, Ordering::Relaxed);
        let display = format!("{stats}");
        assert!(display.contains("hits=50"));
        assert!(display.contains("50.00%"));
    }

    #[test]
    fn hit_rate_no_lookups() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
