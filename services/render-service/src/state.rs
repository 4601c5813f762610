//! Service root: builds and owns the shared resources.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use renderer::{ChromiumBackend, RenderEngine};
use storage::{
    CacheStore, ChartCatalog, ChartSource, MemoryCacheStore, RedisCacheStore, RenderCache,
};

use crate::config::ServiceConfig;
use crate::metrics::MetricsCollector;
use crate::pipeline::RenderPipeline;

/// Shared service state.
pub struct ServiceState {
    pub config: ServiceConfig,
    pub pipeline: RenderPipeline,
    pub metrics: Arc<MetricsCollector>,
    catalog: Option<Arc<ChartCatalog>>,
}

impl ServiceState {
    pub async fn new(config: ServiceConfig) -> Result<Self> {
        let cache = RenderCache::new(build_cache_store(&config).await?, config.cache_ttl());

        let catalog = match &config.catalog.database_url {
            Some(url) => {
                let catalog = ChartCatalog::connect(url, config.catalog.max_connections)
                    .await
                    .context("Failed to connect to chart catalog")?;
                info!("Connected to chart catalog");
                Some(Arc::new(catalog))
            }
            None => {
                info!("DATABASE_URL not set, stored-chart rendering disabled");
                None
            }
        };

        let backend = Arc::new(ChromiumBackend::new(config.chromium_config()));
        let engine = Arc::new(RenderEngine::new(backend, config.engine_config()));
        let metrics = Arc::new(MetricsCollector::new());

        let mut pipeline = RenderPipeline::new(cache, engine)
            .with_metrics(Arc::clone(&metrics))
            .with_cache_ttl(config.cache_ttl())
            .with_single_flight(config.engine.single_flight);
        if let Some(catalog) = &catalog {
            pipeline = pipeline.with_chart_source(Arc::clone(catalog) as Arc<dyn ChartSource>);
        }

        Ok(Self {
            config,
            pipeline,
            metrics,
            catalog,
        })
    }

    /// Release the cache connection and database pool.
    pub async fn shutdown(&self) {
        self.pipeline.shutdown().await;
        if let Some(catalog) = &self.catalog {
            catalog.close().await;
        }
    }
}

async fn build_cache_store(config: &ServiceConfig) -> Result<Arc<dyn CacheStore>> {
    let Some(url) = &config.cache.redis_url else {
        info!(
            max_mb = config.cache.memory_max_mb,
            "REDIS_URL not set, using in-process cache"
        );
        return Ok(Arc::new(MemoryCacheStore::new(
            config.cache.memory_max_mb,
            config.cache_ttl(),
        )));
    };

    let timeout = Duration::from_secs(config.cache.connect_timeout_secs);
    let store = RedisCacheStore::new(url, timeout).context("Invalid cache configuration")?;

    // An unreachable cache is not fatal: requests reconnect on demand.
    match CacheStore::connect(&store).await {
        Ok(()) => info!("Connected to Redis"),
        Err(e) => warn!(error = %e, "Redis unavailable at startup, rendering without cache"),
    }

    Ok(Arc::new(store))
}
