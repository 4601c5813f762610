//! In-memory LRU store for rendered charts.
//!
//! Implements [`CacheStore`] without a network hop. Used by tests and as the
//! cache for local runs without Redis.
//!
//! ## Memory-Based Eviction
//!
//! The store uses memory-based eviction rather than entry count. When an
//! insert would exceed the configured memory limit, ~5% of the limit is
//! evicted in LRU order in a single batch.
//!
//! ## Expiry
//!
//! TTLs are enforced lazily: an expired entry is removed when it is read or
//! when a pattern delete walks over it.

use async_trait::async_trait;
use bytes::Bytes;
use glob::Pattern;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::info;

use chart_common::{ChartError, ChartResult};

use crate::cache::CacheStore;

/// In-memory LRU store for rendered charts.
pub struct MemoryCacheStore {
    cache: Arc<RwLock<LruCache<String, CachedRender>>>,
    max_bytes: u64,
    default_ttl: Duration,
    connected: AtomicBool,
    stats: Arc<MemoryCacheStats>,
}

struct CachedRender {
    data: Bytes,
    inserted_at: Instant,
    ttl: Duration,
}

impl CachedRender {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

/// Statistics for the memory store.
///
/// All fields are atomic for lock-free reads.
#[derive(Default)]
pub struct MemoryCacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub expired: AtomicU64,
    pub size_bytes: AtomicU64,
    pub entry_count: AtomicU64,
    pub eviction_runs: AtomicU64,
}

impl MemoryCacheStats {
    /// Cache hit rate as a percentage (0-100).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }
}

impl MemoryCacheStore {
    /// Create a store holding at most `max_size_mb` megabytes.
    pub fn new(max_size_mb: usize, default_ttl: Duration) -> Self {
        // Eviction is by bytes; the entry bound only has to be out of reach.
        const LRU_CAPACITY: usize = 1_000_000;
        let capacity = NonZeroUsize::new(LRU_CAPACITY).unwrap_or(NonZeroUsize::MIN);

        Self {
            cache: Arc::new(RwLock::new(LruCache::new(capacity))),
            max_bytes: (max_size_mb as u64) * 1024 * 1024,
            default_ttl,
            connected: AtomicBool::new(true),
            stats: Arc::new(MemoryCacheStats::default()),
        }
    }

    pub fn stats(&self) -> &MemoryCacheStats {
        &self.stats
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn len(&self) -> usize {
        self.stats.entry_count.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_bytes(&self) -> u64 {
        self.stats.size_bytes.load(Ordering::Relaxed)
    }

    /// Whether a live (unexpired) entry exists, without touching LRU order
    /// or hit statistics.
    pub async fn contains(&self, key: &str) -> bool {
        let cache = self.cache.read().await;
        cache.peek(key).map(|e| !e.is_expired()).unwrap_or(false)
    }

    /// All live keys, in no particular order.
    pub async fn keys(&self) -> Vec<String> {
        let cache = self.cache.read().await;
        cache
            .iter()
            .filter(|(_, e)| !e.is_expired())
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn ensure_connected(&self) -> ChartResult<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ChartError::CacheError("memory store is disconnected".to_string()))
        }
    }

    fn remove_locked(&self, cache: &mut LruCache<String, CachedRender>, key: &str) -> bool {
        match cache.pop(key) {
            Some(entry) => {
                self.stats
                    .size_bytes
                    .fetch_sub(entry.data.len() as u64, Ordering::Relaxed);
                self.stats.entry_count.fetch_sub(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Evict ~5% of capacity (by memory) in LRU order.
    fn evict_batch_locked(&self, cache: &mut LruCache<String, CachedRender>) -> (usize, u64) {
        let target_free = (self.max_bytes / 20).max(1);
        let mut bytes_freed = 0u64;
        let mut entries_evicted = 0usize;

        while bytes_freed < target_free {
            match cache.pop_lru() {
                Some((_, evicted)) => {
                    bytes_freed += evicted.data.len() as u64;
                    entries_evicted += 1;
                }
                None => break,
            }
        }

        self.stats
            .size_bytes
            .fetch_sub(bytes_freed, Ordering::Relaxed);
        self.stats
            .entry_count
            .fetch_sub(entries_evicted as u64, Ordering::Relaxed);
        self.stats
            .evictions
            .fetch_add(entries_evicted as u64, Ordering::Relaxed);
        self.stats.eviction_runs.fetch_add(1, Ordering::Relaxed);

        info!(
            entries_evicted = entries_evicted,
            bytes_freed = bytes_freed,
            max_bytes = self.max_bytes,
            "Memory cache batch eviction completed"
        );

        (entries_evicted, bytes_freed)
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn connect(&self) -> ChartResult<()> {
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }

    async fn ping(&self) -> ChartResult<()> {
        self.ensure_connected()
    }

    async fn get(&self, key: &str) -> ChartResult<Option<Bytes>> {
        self.ensure_connected()?;
        let mut cache = self.cache.write().await;

        let expired = match cache.get(key) {
            Some(entry) if !entry.is_expired() => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entry.data.clone()));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.remove_locked(&mut cache, key);
            self.stats.expired.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn set(&self, key: &str, data: &[u8], ttl: Duration) -> ChartResult<()> {
        self.ensure_connected()?;
        let size = data.len() as u64;
        let mut cache = self.cache.write().await;

        // Drop any previous value first so its bytes are not counted twice.
        self.remove_locked(&mut cache, key);

        if self.size_bytes() + size > self.max_bytes {
            self.evict_batch_locked(&mut cache);
        }

        cache.put(
            key.to_string(),
            CachedRender {
                data: Bytes::copy_from_slice(data),
                inserted_at: Instant::now(),
                ttl,
            },
        );
        self.stats.entry_count.fetch_add(1, Ordering::Relaxed);
        self.stats.size_bytes.fetch_add(size, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &str) -> ChartResult<u64> {
        self.ensure_connected()?;
        let mut cache = self.cache.write().await;
        Ok(u64::from(self.remove_locked(&mut cache, key)))
    }

    async fn delete_matching(&self, pattern: &str) -> ChartResult<u64> {
        self.ensure_connected()?;
        let pattern = key_pattern(pattern)?;
        let mut cache = self.cache.write().await;

        let doomed: Vec<String> = cache
            .iter()
            .filter(|(k, _)| pattern.matches(k))
            .map(|(k, _)| k.clone())
            .collect();

        let mut removed = 0u64;
        for key in doomed {
            if self.remove_locked(&mut cache, &key) {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Compile a key glob (`*`, `?`, `[...]` classes).
pub fn key_pattern(pattern: &str) -> ChartResult<Pattern> {
    Pattern::new(pattern)
        .map_err(|e| ChartError::CacheError(format!("Invalid key pattern '{}': {}", pattern, e)))
}
