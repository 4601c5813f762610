//! Render pipeline: fingerprint, cache lookup, render on miss, store.
//!
//! Cache trouble never fails a request. Each request may spend one
//! reconnect on the cache; after that, or if reconnecting fails, the cache is
//! skipped for the rest of the request. Failed cache operations are not
//! retried. Reconnects are shared: a request whose failure predates a
//! completed reconnect reuses that connection rather than replacing it.

use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use chart_common::{
    ChartData, ChartError, ChartHash, ChartSpec, ChartType, RenderError, RenderErrorKind,
    RenderOptions, Theme,
};
use renderer::ChartRasterizer;
use storage::{
    derive_key, derive_scoped_key, CacheKey, ChartSource, Reconnect, RenderCache, DEFAULT_TTL,
};

use crate::metrics::MetricsCollector;
use crate::single_flight::{FlightRole, SingleFlight};

/// A render request as callers send it: chart type, data and the render
/// options at the top level.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    pub chart_type: ChartType,
    pub data: ChartData,
    #[serde(flatten)]
    pub options: RenderOptions,
}

impl RenderRequest {
    pub fn from_json(json: &str) -> Result<Self, RenderError> {
        serde_json::from_str(json).map_err(|e| {
            RenderError::new(
                RenderErrorKind::InvalidRequest,
                format!("malformed chart request: {}", e),
            )
        })
    }

    pub fn into_parts(self) -> (ChartSpec, RenderOptions) {
        (
            ChartSpec {
                chart_type: self.chart_type,
                data: self.data,
            },
            self.options,
        )
    }
}

/// Per-request changes applied to a stored chart's options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderOverrides {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub theme: Option<Theme>,
    pub title: Option<String>,
}

impl RenderOverrides {
    pub fn apply(&self, mut options: RenderOptions) -> RenderOptions {
        if let Some(width) = self.width {
            options.width = width;
        }
        if let Some(height) = self.height {
            options.height = height;
        }
        if let Some(theme) = self.theme {
            if theme != options.theme {
                // A stored background belongs to the stored theme.
                options.background_color = None;
            }
            options.theme = theme;
        }
        if let Some(title) = &self.title {
            options.title = Some(title.clone());
        }
        options
    }
}

pub struct RenderPipeline {
    cache: RenderCache,
    rasterizer: Arc<dyn ChartRasterizer>,
    charts: Option<Arc<dyn ChartSource>>,
    metrics: Arc<MetricsCollector>,
    flights: Option<SingleFlight<Bytes, RenderError>>,
    cache_ttl: Duration,
}

impl RenderPipeline {
    pub fn new(cache: RenderCache, rasterizer: Arc<dyn ChartRasterizer>) -> Self {
        Self {
            cache,
            rasterizer,
            charts: None,
            metrics: Arc::new(MetricsCollector::new()),
            flights: None,
            cache_ttl: DEFAULT_TTL,
        }
    }

    pub fn with_chart_source(mut self, charts: Arc<dyn ChartSource>) -> Self {
        self.charts = Some(charts);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Collapse concurrent misses for the same key into one render.
    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.flights = enabled.then(SingleFlight::new);
        self
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn cache(&self) -> &RenderCache {
        &self.cache
    }

    /// Render a chart to PNG, serving from cache when possible.
    pub async fn render(
        &self,
        spec: &ChartSpec,
        options: &RenderOptions,
    ) -> Result<Bytes, RenderError> {
        self.validate(spec, options)?;
        let key = derive_key(spec.chart_type, &spec.data, options)?;
        self.render_keyed(key, spec, options).await
    }

    /// Render a stored chart, optionally resized or re-themed.
    pub async fn render_stored(
        &self,
        hash: &ChartHash,
        overrides: &RenderOverrides,
    ) -> Result<Bytes, RenderError> {
        let charts = self.charts.as_ref().ok_or_else(|| {
            RenderError::new(RenderErrorKind::Generation, "no chart catalog configured")
        })?;

        let record = charts
            .get_chart_by_hash(hash)
            .await
            .map_err(|e| {
                error!(hash = %hash, error = %e, "Chart lookup failed");
                RenderError::new(RenderErrorKind::Generation, "chart lookup failed")
            })?
            .ok_or_else(|| RenderError::from(ChartError::ChartNotFound(hash.to_string())))?;

        let spec = record.spec();
        let options = overrides.apply(record.options());
        self.validate(&spec, &options)?;

        let key = derive_scoped_key(Some(hash), spec.chart_type, &spec.data, &options)?;
        self.render_keyed(key, &spec, &options).await
    }

    /// Forget every cached variant of a stored chart.
    pub async fn invalidate_for_chart(&self, hash: &ChartHash) -> u64 {
        self.invalidate_pattern(&CacheKey::chart_pattern(hash)).await
    }

    /// Forget every cached render.
    pub async fn invalidate_all(&self) -> u64 {
        self.invalidate_pattern(&CacheKey::all_pattern()).await
    }

    pub async fn shutdown(&self) {
        self.cache.disconnect().await;
        info!("Render pipeline shut down");
    }

    fn validate(&self, spec: &ChartSpec, options: &RenderOptions) -> Result<(), RenderError> {
        spec.validate()
            .and_then(|_| options.validate())
            .map_err(|e| {
                debug!(error = %e, "Rejected chart request");
                self.metrics.record_render_error(RenderErrorKind::InvalidRequest);
                RenderError::from(e)
            })
    }

    async fn render_keyed(
        &self,
        key: CacheKey,
        spec: &ChartSpec,
        options: &RenderOptions,
    ) -> Result<Bytes, RenderError> {
        let mut access = CacheAccess::new(self.cache.clone(), Arc::clone(&self.metrics));

        if let Some(hit) = access.lookup(&key).await {
            debug!(key = %key, size = hit.len(), "Cache hit");
            self.metrics.record_cache_hit();
            return Ok(hit);
        }
        self.metrics.record_cache_miss();

        let job = RenderJob {
            rasterizer: Arc::clone(&self.rasterizer),
            metrics: Arc::clone(&self.metrics),
            access,
            key: key.clone(),
            spec: spec.clone(),
            options: options.clone(),
            ttl: self.cache_ttl,
        };

        match &self.flights {
            Some(flights) => {
                let (result, role) = flights.run(key.as_str(), job.run()).await;
                if role == FlightRole::Follower {
                    debug!(key = %key, "Joined in-flight render");
                    self.metrics.record_shared_render();
                }
                result
            }
            None => job.run().await,
        }
    }

    async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        let seen = self.cache.generation();
        let removed = match self.cache.try_invalidate(pattern).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Invalidation failed, reconnecting");
                self.metrics.record_cache_error();
                let outcome = self.cache.reconnect_from(seen).await;
                record_reconnect(&self.metrics, outcome);
                if outcome.is_usable() {
                    // A missed invalidation leaves stale renders behind.
                    self.cache.invalidate(pattern).await
                } else {
                    0
                }
            }
        };

        info!(pattern = %pattern, removed, "Cache invalidated");
        self.metrics.record_invalidation(removed);
        removed
    }
}

/// One request's view of the cache.
struct CacheAccess {
    cache: RenderCache,
    metrics: Arc<MetricsCollector>,
    available: bool,
    reconnect_spent: bool,
}

impl CacheAccess {
    fn new(cache: RenderCache, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            cache,
            metrics,
            available: false,
            reconnect_spent: false,
        }
    }

    async fn lookup(&mut self, key: &CacheKey) -> Option<Bytes> {
        let seen = self.cache.generation();
        self.available = self.cache.probe().await || self.recover(seen).await;
        if !self.available {
            return None;
        }

        let seen = self.cache.generation();
        match self.cache.try_get(key.as_str()).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache get failed, rendering directly");
                self.metrics.record_cache_error();
                self.available = self.recover(seen).await;
                None
            }
        }
    }

    async fn store(&mut self, key: &CacheKey, png: &[u8], ttl: Duration) {
        if !self.available {
            debug!(key = %key, "Cache unavailable, skipping store");
            return;
        }

        let seen = self.cache.generation();
        if let Err(e) = self.cache.try_set(key.as_str(), png, Some(ttl)).await {
            warn!(key = %key, size = png.len(), error = %e, "Cache set failed");
            self.metrics.record_cache_error();
            self.available = self.recover(seen).await;
        }
    }

    /// Reconnect at most once per request. `seen` is the connection
    /// generation observed before the failing operation.
    async fn recover(&mut self, seen: u64) -> bool {
        if self.reconnect_spent {
            return false;
        }
        self.reconnect_spent = true;
        let outcome = self.cache.reconnect_from(seen).await;
        record_reconnect(&self.metrics, outcome);
        outcome.is_usable()
    }
}

fn record_reconnect(metrics: &MetricsCollector, outcome: Reconnect) {
    match outcome {
        Reconnect::Reconnected => metrics.record_cache_reconnect(true),
        Reconnect::Failed => metrics.record_cache_reconnect(false),
        Reconnect::Joined => {}
    }
}

/// Everything a miss needs, owned so the work can be shared across waiters.
struct RenderJob {
    rasterizer: Arc<dyn ChartRasterizer>,
    metrics: Arc<MetricsCollector>,
    access: CacheAccess,
    key: CacheKey,
    spec: ChartSpec,
    options: RenderOptions,
    ttl: Duration,
}

impl RenderJob {
    async fn run(mut self) -> Result<Bytes, RenderError> {
        let image = match self.rasterizer.rasterize(&self.spec, &self.options).await {
            Ok(image) => image,
            Err(e) => {
                self.metrics.record_render_error(e.kind);
                return Err(e);
            }
        };
        self.metrics.record_render(image.elapsed).await;

        let png = Bytes::from(image.png);
        self.access.store(&self.key, &png, self.ttl).await;

        info!(
            key = %self.key,
            size = png.len(),
            elapsed_ms = image.elapsed.as_millis() as u64,
            "Render complete"
        );
        Ok(png)
    }
}
