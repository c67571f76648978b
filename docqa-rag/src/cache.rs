//! Query response cache.
//!
//! [`ResponseCache`] keys answers by a SHA-256 of the query and its
//! parameters and stores them through a [`CacheStore`]. The cache is an
//! optimization: every store failure is logged and treated as a miss.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::document::{DetailLevel, QueryResult, ResponseType};
use crate::error::{RagError, Result};

/// A key-value store for serialized responses with per-entry expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Return the value stored under `key` unless it has expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key` for `ttl_secs` seconds, replacing any previous entry.
    async fn put(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Remove every entry and return how many were removed.
    async fn invalidate_all(&self) -> Result<usize>;

    /// Remove expired entries and return how many were removed.
    async fn purge_expired(&self) -> Result<usize>;
}

/// One stored response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    /// Hash the entry is stored under.
    pub key_hash: String,
    /// Serialized response.
    pub response: String,
    /// When the entry was written.
    pub timestamp: DateTime<Utc>,
    /// When the entry stops being served.
    pub expiration: DateTime<Utc>,
}

impl CacheEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expiration >= now
    }
}

fn expiry(now: DateTime<Utc>, ttl_secs: u64) -> DateTime<Utc> {
    let ttl = Duration::try_seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX))
        .unwrap_or(Duration::MAX);
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A process-local [`CacheStore`].
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryCacheStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        let now = Utc::now();
        Ok(entries.get(key).filter(|e| e.is_live(now)).map(|e| e.response.clone()))
    }

    async fn put(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let now = Utc::now();
        let entry = CacheEntry {
            key_hash: key.to_string(),
            response: value.to_string(),
            timestamp: now,
            expiration: expiry(now, ttl_secs),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn invalidate_all(&self) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let now = Utc::now();
        entries.retain(|_, e| e.is_live(now));
        Ok(before - entries.len())
    }
}

/// Compute the cache key of a query.
///
/// The key is the lowercase hex SHA-256 of the query followed by the
/// key-sorted JSON of its parameters, which always include `detail_level`.
pub fn cache_key(query: &str, detail_level: DetailLevel, extra: &Map<String, Value>) -> String {
    let mut params: BTreeMap<&str, &Value> = extra.iter().map(|(k, v)| (k.as_str(), v)).collect();
    let level = Value::String(detail_level.as_str().to_string());
    params.insert("detail_level", &level);

    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    // A BTreeMap of JSON values always serializes.
    hasher.update(serde_json::to_string(&params).unwrap_or_default().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hit and miss counters of a [`ResponseCache`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that found nothing usable.
    pub misses: u64,
}

/// Serves and stores [`QueryResult`]s through a [`CacheStore`].
///
/// Every [`invalidate_all`](Self::invalidate_all) starts a new generation.
/// A write tagged with an older generation is discarded, so an answer
/// computed before a corpus change never lands after the invalidation.
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    enabled: bool,
    ttl_secs: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    generation: AtomicU64,
    // Writes hold it shared, invalidation exclusively.
    gate: RwLock<()>,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("enabled", &self.enabled)
            .field("ttl_secs", &self.ttl_secs)
            .field("generation", &self.generation())
            .field("stats", &self.stats())
            .finish()
    }
}

impl ResponseCache {
    /// Create an enabled cache with the given entry lifetime.
    pub fn new(store: Arc<dyn CacheStore>, ttl_secs: u64) -> Self {
        Self {
            store,
            enabled: true,
            ttl_secs,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            gate: RwLock::new(()),
        }
    }

    /// Create a cache that never serves or stores anything.
    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::new(Arc::new(InMemoryCacheStore::new()), 0) }
    }

    /// Turn the cache on or off.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Whether lookups and writes are performed.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The current generation. Capture it before computing an answer and
    /// pass it to [`put`](Self::put).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Look up a result, tagging a hit as [`ResponseType::Cache`].
    pub async fn get(&self, key: &str) -> Option<QueryResult> {
        if !self.enabled {
            return None;
        }

        let found = match self.store.get(key).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "cache lookup failed, treating as miss");
                None
            }
        };

        let decoded = found.and_then(|raw| match serde_json::from_str::<QueryResult>(&raw) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(error = %e, "cached response is unreadable, treating as miss");
                None
            }
        });

        match decoded {
            Some(mut result) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "cache hit");
                result.response_type = ResponseType::Cache;
                Some(result)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a result computed during `generation`. Stale writes are
    /// skipped; failures are logged and swallowed.
    pub async fn put(&self, key: &str, result: &QueryResult, generation: u64) {
        if !self.enabled {
            return;
        }
        let _gate = self.gate.read().await;
        if generation != self.generation() {
            debug!(key, generation, "cache invalidated since the answer was computed, skipping write");
            return;
        }
        let outcome = match serde_json::to_string(result) {
            Ok(raw) => self.store.put(key, &raw, self.ttl_secs).await,
            Err(e) => Err(RagError::CacheError(format!("failed to serialize response: {e}"))),
        };
        if let Err(e) = outcome {
            warn!(key, error = %e, "failed to cache response");
        }
    }

    /// Drop every entry. Returns the number removed, or 0 when the store fails.
    ///
    /// Waits for in-flight writes, then bumps the generation.
    pub async fn invalidate_all(&self) -> usize {
        let _gate = self.gate.write().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        match self.store.invalidate_all().await {
            Ok(removed) => {
                debug!(removed, "response cache invalidated");
                removed
            }
            Err(e) => {
                warn!(error = %e, "failed to invalidate response cache");
                0
            }
        }
    }

    /// Drop expired entries. Returns the number removed, or 0 when the store fails.
    pub async fn purge_expired(&self) -> usize {
        match self.store.purge_expired().await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "failed to purge expired cache entries");
                0
            }
        }
    }

    /// Current hit and miss counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample() -> QueryResult {
        QueryResult {
            query: "what is rust".into(),
            results: Vec::new(),
            used_llm: true,
            detail_level: DetailLevel::Short,
            response: "A language.".into(),
            response_type: ResponseType::Fallback,
            embedding_provider: Some("hashing".into()),
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(RagError::CacheError("down".into()))
        }
        async fn put(&self, _key: &str, _value: &str, _ttl: u64) -> Result<()> {
            Err(RagError::CacheError("down".into()))
        }
        async fn invalidate_all(&self) -> Result<usize> {
            Err(RagError::CacheError("down".into()))
        }
        async fn purge_expired(&self) -> Result<usize> {
            Err(RagError::CacheError("down".into()))
        }
    }

    #[test]
    fn key_depends_on_every_parameter() {
        let none = Map::new();
        let base = cache_key("q", DetailLevel::Medium, &none);
        assert_eq!(base.len(), 64);
        assert!(base.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(base, cache_key("q", DetailLevel::Medium, &none));
        assert_ne!(base, cache_key("q", DetailLevel::Short, &none));
        assert_ne!(base, cache_key("Q", DetailLevel::Medium, &none));

        let mut extra = Map::new();
        extra.insert("top_k".into(), json!(3));
        assert_ne!(base, cache_key("q", DetailLevel::Medium, &extra));
    }

    #[test]
    fn key_ignores_parameter_order() {
        let mut a = Map::new();
        a.insert("b".into(), json!(1));
        a.insert("a".into(), json!(2));
        let mut b = Map::new();
        b.insert("a".into(), json!(2));
        b.insert("b".into(), json!(1));
        assert_eq!(cache_key("q", DetailLevel::Short, &a), cache_key("q", DetailLevel::Short, &b));
    }

    #[tokio::test]
    async fn hit_is_tagged_and_counted() {
        let cache = ResponseCache::new(Arc::new(InMemoryCacheStore::new()), 60);
        assert!(cache.get("k").await.is_none());

        cache.put("k", &sample(), cache.generation()).await;
        let hit = cache.get("k").await.unwrap();
        assert_eq!(hit.response_type, ResponseType::Cache);
        assert_eq!(hit.response, "A language.");
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[tokio::test]
    async fn expired_entries_are_invisible_and_purged() {
        let store = Arc::new(InMemoryCacheStore::new());
        store.put("old", "x", 0).await.unwrap();
        store.put("new", "y", 3600).await.unwrap();
        // Zero ttl expires as soon as the clock moves.
        std::thread::sleep(std::time::Duration::from_millis(5));

        assert_eq!(store.get("old").await.unwrap(), None);
        assert_eq!(store.get("new").await.unwrap().as_deref(), Some("y"));
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.invalidate_all().await.unwrap(), 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn store_failures_are_swallowed() {
        let cache = ResponseCache::new(Arc::new(BrokenStore), 60);
        cache.put("k", &sample(), cache.generation()).await;
        assert!(cache.get("k").await.is_none());
        assert_eq!(cache.invalidate_all().await, 0);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn writes_from_before_an_invalidation_are_discarded() {
        let store = Arc::new(InMemoryCacheStore::new());
        let cache = ResponseCache::new(store.clone(), 60);
        let before = cache.generation();

        cache.invalidate_all().await;
        assert_eq!(cache.generation(), before + 1);

        cache.put("stale", &sample(), before).await;
        assert!(store.is_empty().await);

        cache.put("fresh", &sample(), cache.generation()).await;
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn disabled_cache_does_nothing() {
        let cache = ResponseCache::disabled();
        cache.put("k", &sample(), cache.generation()).await;
        assert!(cache.get("k").await.is_none());
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
