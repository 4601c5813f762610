//! Headless Chromium backend over the DevTools protocol.
//!
//! Each session is a separate browser process with a throwaway profile
//! directory. The generated document is written into that directory and
//! loaded as a file so the load milestones are real navigation lifecycle
//! events.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, EventLifecycleEvent, NavigateParams, SetLifecycleEventsEnabledParams,
    Viewport,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{
    BackendError, BrowserBackend, BrowserSession, CaptureRegion, LaunchOptions, LoadMilestone,
};

/// Flags for a quiet, container-friendly headless browser.
pub const CHROME_ARGS: [&str; 12] = [
    "--disable-gpu",
    "--disable-dev-shm-usage",
    "--hide-scrollbars",
    "--mute-audio",
    "--allow-file-access-from-files",
    "--disable-background-networking",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-component-update",
    "--disable-default-apps",
    "--disable-sync",
    "--disable-extensions",
];

const DOCUMENT_FILE: &str = "chart.html";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromiumConfig {
    /// Browser binary. When unset the driver searches the usual locations.
    pub executable: Option<PathBuf>,
    /// Disable the Chromium sandbox, needed when running as root in containers.
    pub no_sandbox: bool,
    /// Timeout for individual DevTools requests.
    pub request_timeout: Duration,
    pub extra_args: Vec<String>,
}

impl Default for ChromiumConfig {
    fn default() -> Self {
        Self {
            executable: None,
            no_sandbox: true,
            request_timeout: Duration::from_secs(30),
            extra_args: Vec::new(),
        }
    }
}

pub struct ChromiumBackend {
    config: ChromiumConfig,
}

impl ChromiumBackend {
    pub fn new(config: ChromiumConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrowserBackend for ChromiumBackend {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserSession>, BackendError> {
        let profile = tempfile::Builder::new()
            .prefix("chart-render-")
            .tempdir()
            .map_err(|e| BackendError::Launch(format!("profile directory: {}", e)))?;

        let mut builder = BrowserConfig::builder()
            .window_size(options.window_width, options.window_height)
            .user_data_dir(profile.path())
            .launch_timeout(options.timeout)
            .request_timeout(self.config.request_timeout)
            .args(
                CHROME_ARGS
                    .iter()
                    .map(|arg| arg.to_string())
                    .chain(self.config.extra_args.iter().cloned()),
            );
        if self.config.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(path) = &self.config.executable {
            builder = builder.chrome_executable(path);
        }
        let browser_config = builder.build().map_err(BackendError::Launch)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| BackendError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "DevTools handler error");
                }
            }
        });

        info!(
            width = options.window_width,
            height = options.window_height,
            "Browser launched"
        );

        Ok(Box::new(ChromiumSession {
            browser,
            handler,
            page: None,
            profile,
            closed: false,
        }))
    }
}

pub struct ChromiumSession {
    browser: Browser,
    handler: JoinHandle<()>,
    page: Option<Page>,
    profile: TempDir,
    closed: bool,
}

impl ChromiumSession {
    fn page(&self) -> Result<&Page, BackendError> {
        self.page
            .as_ref()
            .ok_or_else(|| BackendError::Other("no page open".to_string()))
    }
}

fn cdp_error(err: CdpError) -> BackendError {
    BackendError::from_message(err.to_string())
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn open_page(&mut self) -> Result<(), BackendError> {
        let page = self.browser.new_page("about:blank").await.map_err(cdp_error)?;
        page.execute(SetLifecycleEventsEnabledParams::new(true))
            .await
            .map_err(cdp_error)?;
        self.page = Some(page);
        Ok(())
    }

    async fn set_viewport(&mut self, width: u32, height: u32) -> Result<(), BackendError> {
        self.page()?
            .execute(SetDeviceMetricsOverrideParams::new(
                width as i64,
                height as i64,
                1.0,
                false,
            ))
            .await
            .map_err(cdp_error)?;
        Ok(())
    }

    async fn load_document(&mut self, html: &str, milestone: LoadMilestone) -> Result<(), BackendError> {
        let path = self.profile.path().join(DOCUMENT_FILE);
        tokio::fs::write(&path, html)
            .await
            .map_err(|e| BackendError::Other(format!("writing document: {}", e)))?;

        let page = self.page()?;
        let mut events = page
            .event_listener::<EventLifecycleEvent>()
            .await
            .map_err(cdp_error)?;

        let url = format!("file://{}", path.display());
        let response = page
            .execute(NavigateParams::new(url))
            .await
            .map_err(cdp_error)?;
        if let Some(text) = &response.result.error_text {
            return Err(BackendError::Other(format!("navigation failed: {}", text)));
        }

        let loader = response.result.loader_id.clone();
        let wanted = milestone.lifecycle_event();
        while let Some(event) = events.next().await {
            let same_load = loader.as_ref().map_or(true, |id| *id == event.loader_id);
            if same_load && event.name == wanted {
                debug!(milestone = wanted, "Document reached load milestone");
                return Ok(());
            }
        }

        Err(BackendError::TargetClosed(
            "page closed before the document loaded".to_string(),
        ))
    }

    async fn element_present(&mut self, selector: &str) -> Result<bool, BackendError> {
        let selector = serde_json::to_string(selector)
            .map_err(|e| BackendError::Other(format!("selector encoding: {}", e)))?;
        let result = self
            .page()?
            .evaluate(format!("document.querySelector({}) !== null", selector))
            .await
            .map_err(cdp_error)?;

        result
            .into_value::<bool>()
            .map_err(|e| BackendError::Other(format!("unexpected evaluation result: {}", e)))
    }

    async fn capture_png(&mut self, region: CaptureRegion) -> Result<Vec<u8>, BackendError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .clip(Viewport {
                x: region.x as f64,
                y: region.y as f64,
                width: region.width as f64,
                height: region.height as f64,
                scale: 1.0,
            })
            .omit_background(false)
            .build();

        self.page()?.screenshot(params).await.map_err(cdp_error)
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.page = None;

        let result = match self.browser.close().await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(error = %e, "Browser close failed, killing process");
                let _ = self.browser.kill().await;
                Err(cdp_error(e))
            }
        };
        if let Err(e) = self.browser.wait().await {
            warn!(error = %e, "Waiting for browser exit failed");
        }
        self.handler.abort();

        result
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Chromium session dropped while open");
        }
        self.handler.abort();
    }
}
