//! Chart rasterization through a headless browser.
//!
//! - [`style`] resolves default colors, legend, title and scales
//! - [`document`] builds the page that draws the chart
//! - [`engine`] drives one backend session per render under timeouts
//! - [`chromium`] is the production backend

pub mod backend;
pub mod chromium;
pub mod document;
pub mod engine;
pub mod png;
pub mod poll;
pub mod style;

pub use backend::{
    BackendError, BrowserBackend, BrowserSession, CaptureRegion, LaunchOptions, LoadMilestone,
};
pub use chromium::{ChromiumBackend, ChromiumConfig};
pub use document::{build_document, ChartDocument, RENDER_MARKER};
pub use engine::{
    ChartRasterizer, EngineConfig, RenderEngine, RenderStage, RenderedImage, SessionGuard,
    DEFAULT_CHART_JS_URL, LAUNCH_GRACE,
};
pub use poll::{CompletionPoll, PollOutcome, PollSchedule, PollStep};
pub use style::{resolve_chart_config, ChartConfig, ThemeStyle, DARK_PALETTE, LIGHT_PALETTE};
