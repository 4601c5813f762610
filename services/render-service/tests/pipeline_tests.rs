//! Tests for the render pipeline: caching, cache failure handling,
//! invalidation scope and shared renders.
//!
//! The engine runs against the scripted browser backend, so the launch
//! counter tells whether a request reached the engine.

use bytes::Bytes;
use futures::future::join_all;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chart_common::{ChartHash, ChartType, RenderErrorKind, Theme};
use render_service::{RenderOverrides, RenderPipeline, RenderRequest};
use renderer::{png, BackendError, EngineConfig, RenderEngine};
use storage::{derive_key, derive_scoped_key, CacheStore, MemoryCacheStore, RenderCache, DEFAULT_TTL};
use test_utils::{
    sales_bar_chart, stored_sales_chart, two_series_line_chart, FakeBehavior, FakeBrowserBackend,
    FlakyCacheStore, StaticChartSource, SALES_BAR_JSON,
};

fn memory_store() -> Arc<MemoryCacheStore> {
    Arc::new(MemoryCacheStore::new(16, DEFAULT_TTL))
}

fn pipeline(store: Arc<dyn CacheStore>, backend: &FakeBrowserBackend) -> RenderPipeline {
    let engine = RenderEngine::new(Arc::new(backend.clone()), EngineConfig::default());
    RenderPipeline::new(RenderCache::new(store, DEFAULT_TTL), Arc::new(engine))
}

fn hash(value: &str) -> ChartHash {
    ChartHash::parse(value).unwrap()
}

// ============================================================================
// Cache hits and misses
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_end_to_end_bar_chart() {
    let store = memory_store();
    let backend = FakeBrowserBackend::new();
    let stats = backend.stats();
    let pipeline = pipeline(store.clone(), &backend);

    let (spec, options) = RenderRequest::from_json(SALES_BAR_JSON).unwrap().into_parts();
    let key = derive_key(spec.chart_type, &spec.data, &options).unwrap();

    let first = pipeline.render(&spec, &options).await.unwrap();
    assert!(!first.is_empty());
    assert!(png::is_png(&first));
    assert_eq!(stats.launches(), 1);
    assert_eq!(store.get(key.as_str()).await.unwrap(), Some(first.clone()));

    let second = pipeline.render(&spec, &options).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(stats.launches(), 1);

    let snap = pipeline.metrics().snapshot().await;
    assert_eq!(snap.cache_hits, 1);
    assert_eq!(snap.cache_misses, 1);
    assert_eq!(snap.renders_total, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cached_entry_skips_engine() {
    let store = memory_store();
    let backend = FakeBrowserBackend::new();
    let stats = backend.stats();
    let pipeline = pipeline(store.clone(), &backend);

    let (spec, options) = sales_bar_chart();
    let key = derive_key(spec.chart_type, &spec.data, &options).unwrap();
    store
        .set(key.as_str(), b"cached-bytes", DEFAULT_TTL)
        .await
        .unwrap();

    let png = pipeline.render(&spec, &options).await.unwrap();
    assert_eq!(png, Bytes::from_static(b"cached-bytes"));
    assert_eq!(stats.launches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_different_options_render_separately() {
    let store = memory_store();
    let backend = FakeBrowserBackend::new();
    let stats = backend.stats();
    let pipeline = pipeline(store, &backend);

    let (spec, options) = sales_bar_chart();
    let titled = options.clone().with_title("Sales");

    pipeline.render(&spec, &options).await.unwrap();
    pipeline.render(&spec, &titled).await.unwrap();
    assert_eq!(stats.launches(), 2);
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_invalid_request_touches_nothing() {
    let store = Arc::new(FlakyCacheStore::healing());
    let backend = FakeBrowserBackend::new();
    let stats = backend.stats();
    let pipeline = pipeline(store.clone(), &backend);

    let (mut spec, options) = sales_bar_chart();
    spec.data.datasets.clear();

    let err = pipeline.render(&spec, &options).await.unwrap_err();
    assert_eq!(err.kind, RenderErrorKind::InvalidRequest);
    assert_eq!(stats.launches(), 0);
    assert_eq!(store.connects.load(Ordering::SeqCst), 0);
    assert_eq!(store.gets.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_zero_width_is_invalid() {
    let backend = FakeBrowserBackend::new();
    let pipeline = pipeline(memory_store(), &backend);

    let (spec, mut options) = sales_bar_chart();
    options.width = 0;

    let err = pipeline.render(&spec, &options).await.unwrap_err();
    assert_eq!(err.kind, RenderErrorKind::InvalidRequest);
    assert_eq!(backend.stats().launches(), 0);
}

// ============================================================================
// Cache failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_unreachable_cache_is_transparent() {
    let store = Arc::new(FlakyCacheStore::always_failing());
    let backend = FakeBrowserBackend::new();
    let stats = backend.stats();
    let pipeline = pipeline(store.clone(), &backend);
    let (spec, options) = sales_bar_chart();

    let png = pipeline.render(&spec, &options).await.unwrap();
    assert!(png::is_png(&png));
    assert_eq!(stats.launches(), 1);
    // One reconnect per request, and no write after it failed.
    assert_eq!(store.connects.load(Ordering::SeqCst), 1);
    assert_eq!(store.sets.load(Ordering::SeqCst), 0);

    pipeline.render(&spec, &options).await.unwrap();
    assert_eq!(stats.launches(), 2);
    assert_eq!(store.connects.load(Ordering::SeqCst), 2);

    let snap = pipeline.metrics().snapshot().await;
    assert_eq!(snap.cache_reconnects, 2);
    assert_eq!(snap.render_errors, 0);
}

#[tokio::test(start_paused = true)]
async fn test_reconnected_cache_is_used() {
    let store = Arc::new(FlakyCacheStore::healing());
    let backend = FakeBrowserBackend::new();
    let stats = backend.stats();
    let pipeline = pipeline(store.clone(), &backend);
    let (spec, options) = sales_bar_chart();

    let first = pipeline.render(&spec, &options).await.unwrap();
    assert_eq!(store.connects.load(Ordering::SeqCst), 1);
    assert_eq!(store.sets.load(Ordering::SeqCst), 1);

    let second = pipeline.render(&spec, &options).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(stats.launches(), 1);
    assert_eq!(store.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cache_failing_mid_request_does_not_fail_render() {
    let store = Arc::new(FlakyCacheStore::healing());
    store.set_failing(false);
    let backend = FakeBrowserBackend::with_behavior(FakeBehavior {
        load_delay: Some(Duration::from_millis(100)),
        ..FakeBehavior::default()
    });
    let pipeline = Arc::new(pipeline(store.clone(), &backend));
    let (spec, options) = sales_bar_chart();

    let task = {
        let pipeline = Arc::clone(&pipeline);
        let (spec, options) = (spec.clone(), options.clone());
        tokio::spawn(async move { pipeline.render(&spec, &options).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    store.set_failing(true);

    let png = task.await.unwrap().unwrap();
    assert!(png::is_png(&png));
    // The failed write spent the request's reconnect.
    assert_eq!(store.sets.load(Ordering::SeqCst), 1);
    assert_eq!(store.connects.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.metrics().snapshot().await.cache_errors, 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_does_not_disturb_other_requests() {
    let store = Arc::new(FlakyCacheStore::slow_reconnect(Duration::from_millis(200)));
    let backend = FakeBrowserBackend::new();
    let stats = backend.stats();
    let pipeline = pipeline(store.clone(), &backend);
    let (spec, options) = sales_bar_chart();
    pipeline.render(&spec, &options).await.unwrap();

    store.fail_next_gets(1);
    let results = join_all((0..10).map(|_| pipeline.render(&spec, &options))).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(store.connects.load(Ordering::SeqCst), 1);
    assert_eq!(store.disconnects.load(Ordering::SeqCst), 0);
    // Only the request that saw the failure rendered again.
    assert_eq!(stats.launches(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_failures_share_one_reconnect() {
    let store = Arc::new(FlakyCacheStore::slow_reconnect(Duration::from_millis(200)));
    let backend = FakeBrowserBackend::new();
    let stats = backend.stats();
    let pipeline = pipeline(store.clone(), &backend);
    let (spec, options) = sales_bar_chart();
    pipeline.render(&spec, &options).await.unwrap();

    store.fail_next_gets(3);
    let results = join_all((0..10).map(|_| pipeline.render(&spec, &options))).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(store.connects.load(Ordering::SeqCst), 1);
    assert_eq!(stats.launches(), 4);

    let snap = pipeline.metrics().snapshot().await;
    assert_eq!(snap.cache_errors, 3);
    assert_eq!(snap.cache_reconnects, 1);
}

// ============================================================================
// Engine failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_engine_failure_propagates_kind() {
    let store = memory_store();
    let backend = FakeBrowserBackend::with_behavior(FakeBehavior {
        launch_error: Some(BackendError::Launch("no chrome binary".into())),
        ..FakeBehavior::default()
    });
    let pipeline = pipeline(store.clone(), &backend);
    let (spec, options) = sales_bar_chart();

    let err = pipeline.render(&spec, &options).await.unwrap_err();
    assert_eq!(err.kind, RenderErrorKind::LaunchFailure);
    assert!(!err.reason.contains("chrome binary"));
    assert!(store.is_empty());
    assert_eq!(pipeline.metrics().snapshot().await.render_errors, 1);
}

#[tokio::test(start_paused = true)]
async fn test_render_timeout_is_not_cached() {
    let store = memory_store();
    let backend = FakeBrowserBackend::with_behavior(FakeBehavior::never_renders());
    let pipeline = pipeline(store.clone(), &backend);
    let (spec, options) = sales_bar_chart();

    let err = pipeline.render(&spec, &options).await.unwrap_err();
    assert_eq!(err.kind, RenderErrorKind::RenderTimeout);
    assert!(store.is_empty());
}

// ============================================================================
// Stored charts
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_render_stored_chart_with_overrides() {
    let store = memory_store();
    let backend = FakeBrowserBackend::new();
    let stats = backend.stats();
    let charts = Arc::new(StaticChartSource::with_record(stored_sales_chart("abc123")));
    let pipeline = pipeline(store.clone(), &backend).with_chart_source(charts.clone());

    let overrides = RenderOverrides {
        width: Some(400),
        height: Some(300),
        theme: Some(Theme::Dark),
        ..RenderOverrides::default()
    };
    let png_bytes = pipeline
        .render_stored(&hash("abc123"), &overrides)
        .await
        .unwrap();

    let info = png::inspect(&png_bytes).unwrap();
    assert_eq!((info.width, info.height), (400, 300));
    assert!(stats.last_document().unwrap().contains("#1a1a1a"));

    let (spec, _) = sales_bar_chart();
    let options = overrides.apply(stored_sales_chart("abc123").options());
    let key =
        derive_scoped_key(Some(&hash("abc123")), spec.chart_type, &spec.data, &options).unwrap();
    assert!(key.as_str().contains(":h.abc123:"));
    assert!(store.get(key.as_str()).await.unwrap().is_some());
    assert_eq!(charts.lookups.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_stored_chart() {
    let backend = FakeBrowserBackend::new();
    let pipeline = pipeline(memory_store(), &backend)
        .with_chart_source(Arc::new(StaticChartSource::new()));

    let err = pipeline
        .render_stored(&hash("nope"), &RenderOverrides::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, RenderErrorKind::ChartNotFound);
    assert_eq!(backend.stats().launches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stored_chart_without_catalog() {
    let backend = FakeBrowserBackend::new();
    let pipeline = pipeline(memory_store(), &backend);

    let err = pipeline
        .render_stored(&hash("abc123"), &RenderOverrides::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, RenderErrorKind::Generation);
}

// ============================================================================
// Invalidation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_invalidate_only_touches_one_chart() {
    let store = memory_store();
    let backend = FakeBrowserBackend::new();
    let charts = StaticChartSource::new();
    charts.insert(stored_sales_chart("h1"));
    charts.insert(stored_sales_chart("h2"));
    let pipeline = pipeline(store.clone(), &backend).with_chart_source(Arc::new(charts));

    for chart in ["h1", "h2"] {
        for width in [400, 800] {
            let overrides = RenderOverrides {
                width: Some(width),
                ..RenderOverrides::default()
            };
            pipeline.render_stored(&hash(chart), &overrides).await.unwrap();
        }
    }
    let (spec, options) = sales_bar_chart();
    pipeline.render(&spec, &options).await.unwrap();
    assert_eq!(store.len(), 5);

    let removed = pipeline.invalidate_for_chart(&hash("h1")).await;
    assert_eq!(removed, 2);
    assert_eq!(store.len(), 3);

    let launches = backend.stats().launches();
    pipeline
        .render_stored(&hash("h2"), &RenderOverrides::default())
        .await
        .unwrap();
    pipeline.render(&spec, &options).await.unwrap();
    assert_eq!(backend.stats().launches(), launches);

    pipeline
        .render_stored(&hash("h1"), &RenderOverrides::default())
        .await
        .unwrap();
    assert_eq!(backend.stats().launches(), launches + 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_all() {
    let store = memory_store();
    let backend = FakeBrowserBackend::new();
    let pipeline = pipeline(store.clone(), &backend);

    let (spec, options) = sales_bar_chart();
    pipeline.render(&spec, &options).await.unwrap();
    pipeline
        .render(&two_series_line_chart(), &options)
        .await
        .unwrap();
    store.set("unrelated", b"x", DEFAULT_TTL).await.unwrap();

    assert_eq!(pipeline.invalidate_all().await, 2);
    assert_eq!(store.len(), 1);
    assert_eq!(pipeline.metrics().snapshot().await.invalidations, 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_retries_after_reconnect() {
    let store = Arc::new(FlakyCacheStore::healing());
    let backend = FakeBrowserBackend::new();
    let pipeline = pipeline(store.clone(), &backend);

    store.set_failing(false);
    store
        .set("chart:bar:800x600:light:h.h1:00", b"x", DEFAULT_TTL)
        .await
        .unwrap();
    store.set_failing(true);

    assert_eq!(pipeline.invalidate_for_chart(&hash("h1")).await, 1);
    assert_eq!(store.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_with_dead_cache_reports_zero() {
    let store = Arc::new(FlakyCacheStore::always_failing());
    let pipeline = pipeline(store, &FakeBrowserBackend::new());

    assert_eq!(pipeline.invalidate_all().await, 0);
}

// ============================================================================
// Shared renders
// ============================================================================

fn slow_backend() -> FakeBrowserBackend {
    FakeBrowserBackend::with_behavior(FakeBehavior {
        load_delay: Some(Duration::from_millis(500)),
        ..FakeBehavior::default()
    })
}

#[tokio::test(start_paused = true)]
async fn test_single_flight_collapses_concurrent_misses() {
    let backend = slow_backend();
    let stats = backend.stats();
    let pipeline = pipeline(memory_store(), &backend).with_single_flight(true);
    let (spec, options) = sales_bar_chart();

    let (a, b) = tokio::join!(
        pipeline.render(&spec, &options),
        pipeline.render(&spec, &options),
    );

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(stats.launches(), 1);
    assert_eq!(pipeline.metrics().snapshot().await.shared_renders, 1);
}

#[tokio::test(start_paused = true)]
async fn test_without_single_flight_each_miss_renders() {
    let backend = slow_backend();
    let stats = backend.stats();
    let pipeline = pipeline(memory_store(), &backend);
    let (spec, options) = sales_bar_chart();

    let (a, b) = tokio::join!(
        pipeline.render(&spec, &options),
        pipeline.render(&spec, &options),
    );

    assert!(a.is_ok() && b.is_ok());
    assert_eq!(stats.launches(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_single_flight_keeps_distinct_keys_apart() {
    let backend = slow_backend();
    let stats = backend.stats();
    let pipeline = pipeline(memory_store(), &backend).with_single_flight(true);
    let (spec, options) = sales_bar_chart();
    let line = two_series_line_chart();
    assert_eq!(line.chart_type, ChartType::Line);

    let (a, b) = tokio::join!(
        pipeline.render(&spec, &options),
        pipeline.render(&line, &options),
    );

    assert!(a.is_ok() && b.is_ok());
    assert_eq!(stats.launches(), 2);
    assert_eq!(pipeline.metrics().snapshot().await.shared_renders, 0);
}
