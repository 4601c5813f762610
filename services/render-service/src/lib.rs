//! Chart render service library.
//!
//! This module exposes the internal modules for the binary and for testing.

pub mod config;
pub mod metrics;
pub mod pipeline;
pub mod single_flight;
pub mod state;

pub use config::ServiceConfig;
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use pipeline::{RenderOverrides, RenderPipeline, RenderRequest};
pub use single_flight::{FlightRole, SingleFlight};
pub use state::ServiceState;
