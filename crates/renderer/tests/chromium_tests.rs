//! Live rendering against a real browser.
//!
//! Ignored by default: needs a Chromium install and network access for the
//! Chart.js script. Run with `--ignored`.

use std::sync::Arc;

use renderer::png;
use renderer::{ChromiumBackend, ChromiumConfig, EngineConfig, RenderEngine};
use test_utils::{require_browser, sales_bar_chart};

#[tokio::test]
#[ignore]
async fn test_live_bar_chart_render() {
    let chrome = require_browser!();

    let backend = ChromiumBackend::new(ChromiumConfig {
        executable: Some(chrome),
        ..ChromiumConfig::default()
    });
    let engine = RenderEngine::new(Arc::new(backend), EngineConfig::default());
    let (spec, options) = sales_bar_chart();

    let image = engine.render(&spec, &options).await.unwrap();
    let info = png::inspect(&image.png).unwrap();

    assert_eq!((info.width, info.height), (800, 600));
    assert!(image.png.len() > 1000);
}
