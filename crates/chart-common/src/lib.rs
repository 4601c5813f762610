//! Common types shared by the chart render services.

pub mod chart;
pub mod error;
pub mod hash;
pub mod options;

pub use chart::{ChartData, ChartSpec, ChartType, ColorSpec, Dataset, SeriesType};
pub use error::{ChartError, ChartResult, RenderError, RenderErrorKind};
pub use hash::ChartHash;
pub use options::{RenderOptions, Theme};
