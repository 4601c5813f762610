//! In-memory stand-ins for the cache backend and the chart catalog.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chart_common::{ChartError, ChartHash, ChartResult};
use storage::{CacheStore, ChartRecord, ChartSource, MemoryCacheStore, DEFAULT_TTL};

/// Cache store that fails every operation until told otherwise.
///
/// With `heal_on_connect` set, the first successful `connect` makes the
/// store behave like a normal in-memory cache. Like a networked store,
/// `disconnect` leaves it unusable until the next successful `connect`.
pub struct FlakyCacheStore {
    inner: MemoryCacheStore,
    failing: AtomicBool,
    connected: AtomicBool,
    heal_on_connect: bool,
    connect_delay: Option<Duration>,
    failing_gets: AtomicU32,
    pub connects: AtomicU32,
    pub disconnects: AtomicU32,
    pub gets: AtomicU32,
    pub sets: AtomicU32,
}

impl FlakyCacheStore {
    /// Fails forever, reconnects included.
    pub fn always_failing() -> Self {
        Self::build(false)
    }

    /// Fails until the first reconnect.
    pub fn healing() -> Self {
        Self::build(true)
    }

    /// Healthy store whose reconnects take `delay`.
    pub fn slow_reconnect(delay: Duration) -> Self {
        let store = Self {
            connect_delay: Some(delay),
            ..Self::build(true)
        };
        store.set_failing(false);
        store
    }

    fn build(heal_on_connect: bool) -> Self {
        Self {
            inner: MemoryCacheStore::new(16, DEFAULT_TTL),
            failing: AtomicBool::new(true),
            connected: AtomicBool::new(true),
            heal_on_connect,
            connect_delay: None,
            failing_gets: AtomicU32::new(0),
            connects: AtomicU32::new(0),
            disconnects: AtomicU32::new(0),
            gets: AtomicU32::new(0),
            sets: AtomicU32::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make the next `count` gets fail once each, without other effects.
    pub fn fail_next_gets(&self, count: u32) {
        self.failing_gets.store(count, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &MemoryCacheStore {
        &self.inner
    }

    fn check(&self) -> ChartResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            Err(ChartError::CacheError("not connected".to_string()))
        } else if self.failing.load(Ordering::SeqCst) {
            Err(ChartError::CacheError("connection refused".to_string()))
        } else {
            Ok(())
        }
    }

    fn take_injected_get_failure(&self) -> bool {
        self.failing_gets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl CacheStore for FlakyCacheStore {
    async fn connect(&self) -> ChartResult<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.heal_on_connect {
            self.set_failing(false);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChartError::CacheError("connection refused".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn ping(&self) -> ChartResult<()> {
        self.check()
    }

    async fn get(&self, key: &str) -> ChartResult<Option<Bytes>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        if self.take_injected_get_failure() {
            return Err(ChartError::CacheError("connection reset".to_string()));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, data: &[u8], ttl: Duration) -> ChartResult<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.set(key, data, ttl).await
    }

    async fn delete(&self, key: &str) -> ChartResult<u64> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn delete_matching(&self, pattern: &str) -> ChartResult<u64> {
        self.check()?;
        self.inner.delete_matching(pattern).await
    }
}

/// Chart source backed by a map.
#[derive(Default)]
pub struct StaticChartSource {
    charts: Mutex<HashMap<ChartHash, ChartRecord>>,
    pub lookups: AtomicU32,
}

impl StaticChartSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: ChartRecord) -> Self {
        let source = Self::new();
        source.insert(record);
        source
    }

    /// Insert or replace a record.
    pub fn insert(&self, record: ChartRecord) {
        self.charts
            .lock()
            .unwrap()
            .insert(record.hash.clone(), record);
    }
}

#[async_trait]
impl ChartSource for StaticChartSource {
    async fn get_chart_by_hash(&self, hash: &ChartHash) -> ChartResult<Option<ChartRecord>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.charts.lock().unwrap().get(hash).cloned())
    }
}
