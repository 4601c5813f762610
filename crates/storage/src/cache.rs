//! Render cache: a byte-blob store with TTL and glob invalidation.
//!
//! [`CacheStore`] is the fallible backend seam (Redis in production, an
//! in-memory LRU for tests and local runs). [`RenderCache`] wraps a store
//! with the contract the render pipeline relies on: cache failures are
//! logged and absorbed, never returned to the caller of a render.

use async_trait::async_trait;
use bytes::Bytes;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use chart_common::{ChartError, ChartResult};

/// Default time-to-live for cached renders.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Keys fetched per SCAN round when deleting by pattern.
const SCAN_BATCH: usize = 500;

/// Fallible key/value backend.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Establish (or re-establish) the backend connection.
    ///
    /// A replacement connection is opened before the old one is dropped, so
    /// concurrent operations never observe a missing connection.
    async fn connect(&self) -> ChartResult<()>;

    /// Drop the backend connection. Subsequent operations fail until
    /// [`CacheStore::connect`] succeeds again.
    async fn disconnect(&self);

    async fn ping(&self) -> ChartResult<()>;

    async fn get(&self, key: &str) -> ChartResult<Option<Bytes>>;

    async fn set(&self, key: &str, data: &[u8], ttl: Duration) -> ChartResult<()>;

    /// Delete one key, returning how many were removed.
    async fn delete(&self, key: &str) -> ChartResult<u64>;

    /// Delete every key matching a glob pattern (`*`, `?`, `[...]`).
    async fn delete_matching(&self, pattern: &str) -> ChartResult<u64>;
}

/// Whether the argument should be treated as a glob rather than a key.
pub fn is_pattern(key_or_pattern: &str) -> bool {
    key_or_pattern.contains(['*', '?', '['])
}

// ============================================================================
// Redis
// ============================================================================

/// Redis-backed store sharing one multiplexed connection.
pub struct RedisCacheStore {
    client: Client,
    conn: RwLock<Option<MultiplexedConnection>>,
    connect_timeout: Duration,
}

impl RedisCacheStore {
    /// Create a store and connect to Redis.
    pub async fn connect(redis_url: &str, connect_timeout: Duration) -> ChartResult<Self> {
        let store = Self::new(redis_url, connect_timeout)?;
        CacheStore::connect(&store).await?;
        Ok(store)
    }

    /// Create a store without connecting. Operations fail until
    /// [`CacheStore::connect`] succeeds.
    pub fn new(redis_url: &str, connect_timeout: Duration) -> ChartResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| ChartError::CacheError(format!("Invalid Redis URL: {}", e)))?;

        Ok(Self {
            client,
            conn: RwLock::new(None),
            connect_timeout,
        })
    }

    async fn connection(&self) -> ChartResult<MultiplexedConnection> {
        self.conn
            .read()
            .await
            .clone()
            .ok_or_else(|| ChartError::CacheError("Redis is not connected".to_string()))
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn connect(&self) -> ChartResult<()> {
        let conn = tokio::time::timeout(
            self.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| {
            ChartError::CacheError(format!(
                "Redis connection timed out after {:?}",
                self.connect_timeout
            ))
        })?
        .map_err(|e| ChartError::CacheError(format!("Redis connection failed: {}", e)))?;

        // Opened before the swap, so readers never see `None` here.
        *self.conn.write().await = Some(conn);
        Ok(())
    }

    async fn disconnect(&self) {
        self.conn.write().await.take();
    }

    async fn ping(&self) -> ChartResult<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| ChartError::CacheError(format!("PING failed: {}", e)))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> ChartResult<Option<Bytes>> {
        let mut conn = self.connection().await?;
        let result: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| ChartError::CacheError(format!("Cache get failed: {}", e)))?;

        Ok(result.map(Bytes::from))
    }

    async fn set(&self, key: &str, data: &[u8], ttl: Duration) -> ChartResult<()> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .set_ex(key, data, ttl.as_secs().max(1))
            .await
            .map_err(|e| ChartError::CacheError(format!("Cache set failed: {}", e)))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> ChartResult<u64> {
        let mut conn = self.connection().await?;
        let removed: u64 = conn
            .del(key)
            .await
            .map_err(|e| ChartError::CacheError(format!("Cache delete failed: {}", e)))?;

        Ok(removed)
    }

    async fn delete_matching(&self, pattern: &str) -> ChartResult<u64> {
        let mut conn = self.connection().await?;
        let mut cursor: u64 = 0;
        let mut removed = 0u64;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| ChartError::CacheError(format!("Pattern scan failed: {}", e)))?;

            if !keys.is_empty() {
                let count: u64 = conn
                    .del(&keys)
                    .await
                    .map_err(|e| ChartError::CacheError(format!("Delete failed: {}", e)))?;
                removed += count;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }
}

// ============================================================================
// Render cache facade
// ============================================================================

/// Result of asking the cache to reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconnect {
    /// This caller replaced the connection.
    Reconnected,
    /// Someone else reconnected after the caller's failure; their connection
    /// is reused.
    Joined,
    Failed,
}

impl Reconnect {
    pub fn is_usable(&self) -> bool {
        !matches!(self, Reconnect::Failed)
    }
}

/// Best-effort cache used by the render pipeline.
///
/// The plain operations never fail: errors are logged and reported as a miss
/// or a no-op. The `try_*` variants surface the error so a caller can run its
/// own recovery (one reconnect per request) before giving up.
///
/// Reconnects are serialized and numbered. A caller passes the
/// [`generation`](RenderCache::generation) it saw before its failing
/// operation; if a reconnect has completed since, the caller reuses that
/// connection instead of replacing it again.
#[derive(Clone)]
pub struct RenderCache {
    store: Arc<dyn CacheStore>,
    default_ttl: Duration,
    reconnect_lock: Arc<Mutex<()>>,
    generation: Arc<AtomicU64>,
}

impl RenderCache {
    pub fn new(store: Arc<dyn CacheStore>, default_ttl: Duration) -> Self {
        Self {
            store,
            default_ttl,
            reconnect_lock: Arc::new(Mutex::new(())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of successful reconnects so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Cheap liveness check.
    pub async fn probe(&self) -> bool {
        match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Cache probe failed");
                false
            }
        }
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        match self.try_get(key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache get failed, treating as miss");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, data: &[u8], ttl: Option<Duration>) {
        if let Err(e) = self.try_set(key, data, ttl).await {
            warn!(key = %key, size = data.len(), error = %e, "Cache set failed");
        }
    }

    /// Delete one key or every key matching a glob. Returns the number of
    /// entries removed (0 on failure).
    pub async fn invalidate(&self, key_or_pattern: &str) -> u64 {
        match self.try_invalidate(key_or_pattern).await {
            Ok(removed) => {
                info!(pattern = %key_or_pattern, removed, "Cache invalidated");
                removed
            }
            Err(e) => {
                warn!(pattern = %key_or_pattern, error = %e, "Cache invalidation failed");
                0
            }
        }
    }

    pub async fn try_get(&self, key: &str) -> ChartResult<Option<Bytes>> {
        self.store.get(key).await
    }

    pub async fn try_set(&self, key: &str, data: &[u8], ttl: Option<Duration>) -> ChartResult<()> {
        self.store
            .set(key, data, ttl.unwrap_or(self.default_ttl))
            .await
    }

    pub async fn try_invalidate(&self, key_or_pattern: &str) -> ChartResult<u64> {
        if is_pattern(key_or_pattern) {
            self.store.delete_matching(key_or_pattern).await
        } else {
            self.store.delete(key_or_pattern).await
        }
    }

    /// Replace the connection unconditionally.
    pub async fn reconnect(&self) -> Reconnect {
        self.reconnect_from(self.generation()).await
    }

    /// Replace the connection unless a reconnect completed after `seen`.
    pub async fn reconnect_from(&self, seen: u64) -> Reconnect {
        let _guard = self.reconnect_lock.lock().await;

        let current = self.generation();
        if current != seen {
            debug!(seen, current, "Cache already reconnected, reusing connection");
            return Reconnect::Joined;
        }

        match self.store.connect().await {
            Ok(()) => {
                let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                info!(generation, "Cache reconnected");
                Reconnect::Reconnected
            }
            Err(e) => {
                warn!(error = %e, "Cache reconnect failed");
                Reconnect::Failed
            }
        }
    }

    pub async fn disconnect(&self) {
        self.store.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_cache::MemoryCacheStore;

    fn cache() -> RenderCache {
        RenderCache::new(Arc::new(MemoryCacheStore::new(16, DEFAULT_TTL)), DEFAULT_TTL)
    }

    #[test]
    fn test_is_pattern() {
        assert!(is_pattern("chart:*"));
        assert!(is_pattern("chart:?ar"));
        assert!(!is_pattern("chart:bar:800x600:light:adhoc:abc"));
    }

    #[tokio::test]
    async fn test_facade_roundtrip_and_invalidate() {
        let cache = cache();
        assert!(cache.probe().await);
        assert!(cache.get("chart:a").await.is_none());

        cache.set("chart:a", b"png-a", None).await;
        cache.set("chart:b", b"png-b", None).await;
        assert_eq!(cache.get("chart:a").await.as_deref(), Some(&b"png-a"[..]));

        assert_eq!(cache.invalidate("chart:a").await, 1);
        assert!(cache.get("chart:a").await.is_none());
        assert_eq!(cache.invalidate("chart:*").await, 1);
        assert!(cache.get("chart:b").await.is_none());
    }

    #[tokio::test]
    async fn test_disconnected_store_is_absorbed() {
        let cache = cache();
        cache.disconnect().await;

        assert!(!cache.probe().await);
        assert!(cache.get("chart:a").await.is_none());
        cache.set("chart:a", b"png", None).await;
        assert_eq!(cache.invalidate("chart:*").await, 0);
        assert!(cache.try_get("chart:a").await.is_err());

        assert_eq!(cache.reconnect().await, Reconnect::Reconnected);
        assert!(cache.probe().await);
    }

    #[tokio::test]
    async fn test_stale_reconnect_joins_newer_connection() {
        let cache = cache();
        let seen = cache.generation();

        assert_eq!(cache.reconnect_from(seen).await, Reconnect::Reconnected);
        assert_eq!(cache.reconnect_from(seen).await, Reconnect::Joined);
        assert_eq!(cache.generation(), seen + 1);

        assert_eq!(
            cache.reconnect_from(cache.generation()).await,
            Reconnect::Reconnected
        );
        assert_eq!(cache.generation(), seen + 2);
    }

    #[tokio::test]
    async fn test_invalidate_honours_character_classes() {
        let cache = cache();
        cache.set("chart:bar:800x600:light:adhoc:aa", b"png", None).await;
        cache.set("chart:pie:800x600:light:adhoc:bb", b"png", None).await;

        assert!(is_pattern("chart:[bl]*"));
        assert_eq!(cache.invalidate("chart:[bl]*").await, 1);
        assert!(cache.get("chart:bar:800x600:light:adhoc:aa").await.is_none());
        assert!(cache.get("chart:pie:800x600:light:adhoc:bb").await.is_some());
    }

    #[tokio::test]
    async fn test_redis_store_without_connection_fails_cleanly() {
        let store = RedisCacheStore::new("redis://127.0.0.1:1", Duration::from_millis(50)).unwrap();
        assert!(store.ping().await.is_err());
        assert!(store.get("k").await.is_err());
    }

    #[test]
    fn test_invalid_redis_url() {
        assert!(RedisCacheStore::new("not a url", Duration::from_secs(1)).is_err());
    }
}
