//! Shared test utilities for the chart render workspace.
//!
//! This crate provides common testing infrastructure including:
//! - A scripted rendering backend with call counters
//! - Failing and healing cache stores
//! - A map-backed chart catalog
//! - Chart fixtures
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```

pub mod fake_backend;
pub mod fakes;
pub mod fixtures;
pub mod paths;

pub use fake_backend::*;
pub use fakes::*;
pub use fixtures::*;
pub use paths::*;

/// Macro to skip a test if no browser is installed.
///
/// # Usage
///
/// ```ignore
/// use test_utils::require_browser;
///
/// #[tokio::test]
/// async fn test_live_render() {
///     let chrome = require_browser!();
///     // Test code using chrome...
/// }
/// ```
#[macro_export]
macro_rules! require_browser {
    () => {{
        match $crate::find_browser() {
            Some(path) => path,
            None => {
                eprintln!("SKIPPED: no Chromium browser found. Install one or set CHROME_BIN.");
                return;
            }
        }
    }};
}
