//! Render and cache metrics.

use metrics::{counter, histogram};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use chart_common::RenderErrorKind;

/// Metrics collector for the render pipeline.
#[derive(Debug)]
pub struct MetricsCollector {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub cache_errors: AtomicU64,
    pub cache_reconnects: AtomicU64,
    pub invalidations: AtomicU64,

    pub renders_total: AtomicU64,
    pub render_errors: AtomicU64,
    /// Requests that joined an in-flight render instead of starting one.
    pub shared_renders: AtomicU64,

    render_times: RwLock<TimingStats>,
    start_time: Instant,
}

#[derive(Debug, Default)]
struct TimingStats {
    count: u64,
    total_us: u64,
    min_us: u64,
    max_us: u64,
    last_us: u64,
}

impl TimingStats {
    fn record(&mut self, duration_us: u64) {
        self.count += 1;
        self.total_us += duration_us;
        self.last_us = duration_us;
        if self.min_us == 0 || duration_us < self.min_us {
            self.min_us = duration_us;
        }
        if duration_us > self.max_us {
            self.max_us = duration_us;
        }
    }

    fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.total_us as f64 / self.count as f64) / 1000.0
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            cache_errors: AtomicU64::new(0),
            cache_reconnects: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            renders_total: AtomicU64::new(0),
            render_errors: AtomicU64::new(0),
            shared_renders: AtomicU64::new(0),
            render_times: RwLock::new(TimingStats::default()),
            start_time: Instant::now(),
        }
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        counter!("chart_cache_hits_total").increment(1);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        counter!("chart_cache_misses_total").increment(1);
    }

    pub fn record_cache_error(&self) {
        self.cache_errors.fetch_add(1, Ordering::Relaxed);
        counter!("chart_cache_errors_total").increment(1);
    }

    pub fn record_cache_reconnect(&self, success: bool) {
        self.cache_reconnects.fetch_add(1, Ordering::Relaxed);
        let outcome = if success { "ok" } else { "failed" };
        counter!("chart_cache_reconnects_total", "outcome" => outcome).increment(1);
    }

    pub fn record_invalidation(&self, removed: u64) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        counter!("chart_cache_invalidations_total").increment(1);
        counter!("chart_cache_invalidated_keys_total").increment(removed);
    }

    pub fn record_shared_render(&self) {
        self.shared_renders.fetch_add(1, Ordering::Relaxed);
        counter!("chart_renders_shared_total").increment(1);
    }

    /// Record a successful engine render.
    pub async fn record_render(&self, duration: Duration) {
        let duration_us = duration.as_micros() as u64;
        self.renders_total.fetch_add(1, Ordering::Relaxed);
        counter!("chart_renders_total").increment(1);
        histogram!("chart_render_duration_ms").record(duration_us as f64 / 1000.0);

        let mut times = self.render_times.write().await;
        times.record(duration_us);
    }

    pub fn record_render_error(&self, kind: RenderErrorKind) {
        self.render_errors.fetch_add(1, Ordering::Relaxed);
        counter!("chart_render_errors_total", "kind" => kind.as_str()).increment(1);
    }

    /// Get current metrics snapshot
    pub async fn snapshot(&self) -> MetricsSnapshot {
        let render_times = self.render_times.read().await;
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            cache_hits: hits,
            cache_misses: misses,
            cache_hit_rate: if lookups > 0 {
                (hits as f64 / lookups as f64) * 100.0
            } else {
                0.0
            },
            cache_errors: self.cache_errors.load(Ordering::Relaxed),
            cache_reconnects: self.cache_reconnects.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            renders_total: self.renders_total.load(Ordering::Relaxed),
            render_errors: self.render_errors.load(Ordering::Relaxed),
            shared_renders: self.shared_renders.load(Ordering::Relaxed),
            render_avg_ms: render_times.avg_ms(),
            render_min_ms: render_times.min_us as f64 / 1000.0,
            render_max_ms: render_times.max_us as f64 / 1000.0,
            render_last_ms: render_times.last_us as f64 / 1000.0,
        }
    }
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub cache_errors: u64,
    pub cache_reconnects: u64,
    pub invalidations: u64,
    pub renders_total: u64,
    pub render_errors: u64,
    pub shared_renders: u64,
    pub render_avg_ms: f64,
    pub render_min_ms: f64,
    pub render_max_ms: f64,
    pub render_last_ms: f64,
}
