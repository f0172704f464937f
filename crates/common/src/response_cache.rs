//! HTTP response cache storage.
//!
//! Cached GET responses are kept in a [`ResponseCacheStore`]. Two backends
//! exist: [`RedisCacheStore`] for shared deployments and
//! [`InMemoryCacheStore`] for single-node development and tests.
//!
//! Keys are plain strings such as `api:GET:/api/tests:userId:01h...`.
//! Invalidation works on glob patterns (`*` and `?`), mirroring Redis `SCAN MATCH`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fred::clients::Client as RedisClient;
use fred::interfaces::KeysInterface;
use fred::types::{Expiration, Key};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::CacheBackend;

/// Number of keys requested per `SCAN` page.
const SCAN_PAGE_SIZE: u32 = 100;

/// Response cache errors.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A captured HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Headers worth replaying (content type and similar).
    pub headers: Vec<(String, String)>,
    /// Response body. Only JSON/text bodies are cached.
    pub body: String,
}

/// Storage backend for cached responses.
#[async_trait]
pub trait ResponseCacheStore: Send + Sync {
    /// Look up a cached response.
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>, CacheError>;

    /// Store a response for `ttl_secs` seconds.
    async fn set(&self, key: &str, entry: &CachedResponse, ttl_secs: u64)
    -> Result<(), CacheError>;

    /// Delete every key matching a glob pattern. Returns the number of keys removed.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> Result<(), CacheError>;

    /// Which kind of backend this is.
    fn backend(&self) -> CacheBackend;
}

// ==================== Redis ====================

/// Redis-backed response cache.
#[derive(Clone)]
pub struct RedisCacheStore {
    redis: Arc<RedisClient>,
    prefix: String,
}

impl RedisCacheStore {
    /// Create a store whose keys all live under `{prefix}:`.
    #[must_use]
    pub fn new(redis: Arc<RedisClient>, prefix: impl Into<String>) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }
}

#[async_trait]
impl ResponseCacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>, CacheError> {
        let result: Option<String> = self
            .redis
            .get(self.full_key(key))
            .await
            .map_err(|e| CacheError::Redis(e.to_string()))?;

        match result {
            Some(json_str) => serde_json::from_str(&json_str)
                .map(Some)
                .map_err(|e| CacheError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        entry: &CachedResponse,
        ttl_secs: u64,
    ) -> Result<(), CacheError> {
        let json_str =
            serde_json::to_string(entry).map_err(|e| CacheError::Serialization(e.to_string()))?;

        self.redis
            .set::<(), _, _>(
                self.full_key(key),
                json_str,
                Some(Expiration::EX(i64::try_from(ttl_secs).unwrap_or(i64::MAX))),
                None,
                false,
            )
            .await
            .map_err(|e| CacheError::Redis(e.to_string()))?;

        debug!(key = %key, ttl_secs, "Stored cached response");
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let keys: Vec<Key> = self
            .redis
            .scan_buffered(self.full_key(pattern), Some(SCAN_PAGE_SIZE), None)
            .try_collect()
            .await
            .map_err(|e| CacheError::Redis(e.to_string()))?;

        if keys.is_empty() {
            return Ok(0);
        }

        let deleted: u64 = self
            .redis
            .del(keys)
            .await
            .map_err(|e| CacheError::Redis(e.to_string()))?;

        info!(pattern = %pattern, deleted, "Invalidated cached responses");
        Ok(deleted)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let _: i64 = self
            .redis
            .exists(self.full_key("health"))
            .await
            .map_err(|e| CacheError::Redis(e.to_string()))?;
        Ok(())
    }

    fn backend(&self) -> CacheBackend {
        CacheBackend::Redis
    }
}

// ==================== In-memory ====================

#[derive(Debug, Clone)]
struct MemoryEntry {
    response: CachedResponse,
    expires_at: Instant,
}

/// Process-local response cache.
#[derive(Clone, Default)]
pub struct InMemoryCacheStore {
    entries: Arc<RwLock<HashMap<String, MemoryEntry>>>,
}

impl InMemoryCacheStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    /// Purge expired entries every `period` until the task is aborted.
    ///
    /// Keys that are never read again (one-off query strings, users who left)
    /// would otherwise stay in the map forever.
    pub fn spawn_purger(&self, period: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let removed = store.purge_expired().await;
                if removed > 0 {
                    debug!(removed, "Purged expired cache entries");
                }
            }
        })
    }
}

#[async_trait]
impl ResponseCacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>, CacheError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => return Ok(Some(entry.response.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Expired: drop it so the map does not grow without bound.
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        entry: &CachedResponse,
        ttl_secs: u64,
    ) -> Result<(), CacheError> {
        let expires_at = Instant::now() + Duration::from_secs(ttl_secs);
        self.entries.write().await.insert(
            key.to_string(),
            MemoryEntry {
                response: entry.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let matcher = glob_to_regex(pattern)?;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !matcher.is_match(key));
        Ok((before - entries.len()) as u64)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }

    fn backend(&self) -> CacheBackend {
        CacheBackend::Memory
    }
}

/// Translate a Redis-style glob into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<regex::Regex, CacheError> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    regex::Regex::new(&re).map_err(|e| CacheError::Serialization(e.to_string()))
}

// ==================== Facade ====================

/// Shared handle to the configured cache store.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn ResponseCacheStore>,
}

impl ResponseCache {
    #[must_use]
    pub fn new(store: Arc<dyn ResponseCacheStore>) -> Self {
        Self { store }
    }

    /// Cache backed by a fresh in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryCacheStore::new()))
    }

    #[must_use]
    pub fn backend(&self) -> CacheBackend {
        self.store.backend()
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ResponseCacheStore> {
        &self.store
    }

    pub async fn get(&self, key: &str) -> Result<Option<CachedResponse>, CacheError> {
        self.store.get(key).await
    }

    pub async fn set(
        &self,
        key: &str,
        entry: &CachedResponse,
        ttl_secs: u64,
    ) -> Result<(), CacheError> {
        self.store.set(key, entry, ttl_secs).await
    }

    /// Delete every key matching any of `patterns`.
    ///
    /// A failing pattern is logged and skipped; the returned count covers
    /// the patterns that succeeded.
    pub async fn invalidate(&self, patterns: &[&str]) -> u64 {
        let mut total = 0;
        for pattern in patterns {
            match self.store.delete_pattern(pattern).await {
                Ok(deleted) => total += deleted,
                Err(e) => error!(pattern = %pattern, error = %e, "Cache invalidation failed"),
            }
        }
        total
    }

    pub async fn ping(&self) -> Result<(), CacheError> {
        self.store.ping().await
    }
}
