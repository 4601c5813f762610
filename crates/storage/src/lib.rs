//! Storage abstractions for the chart render services.
//!
//! Provides:
//! - Deterministic cache keys for rendered charts
//! - The render cache (Redis or in-memory) with best-effort semantics
//! - Read access to stored chart metadata (PostgreSQL)

pub mod cache;
pub mod catalog;
pub mod fingerprint;
pub mod memory_cache;

pub use cache::{CacheStore, Reconnect, RedisCacheStore, RenderCache, DEFAULT_TTL};
pub use catalog::{ChartCatalog, ChartRecord, ChartSource};
pub use fingerprint::{derive_key, derive_scoped_key, CacheKey};
pub use memory_cache::{key_pattern, MemoryCacheStats, MemoryCacheStore};
