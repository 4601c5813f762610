//! Scripted in-process rendering backend.
//!
//! Behaves like a browser that always draws successfully unless told
//! otherwise, and counts every call so tests can assert on launches, polls
//! and teardown.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use renderer::png::solid_png;
use renderer::{
    BackendError, BrowserBackend, BrowserSession, CaptureRegion, LaunchOptions, LoadMilestone,
};

/// Time a hanging launch spends spawning before its timeout starts.
const LAUNCH_SPAWN_TIME: Duration = Duration::from_millis(500);

/// What the fake backend should do at each stage.
#[derive(Debug, Clone)]
pub struct FakeBehavior {
    pub launch_error: Option<BackendError>,
    /// Sleep before launching returns.
    pub launch_delay: Option<Duration>,
    /// The process never comes up; launch gives up at its own timeout.
    pub launch_hangs: bool,
    pub viewport_error: Option<BackendError>,
    pub network_idle_error: Option<BackendError>,
    pub dom_content_error: Option<BackendError>,
    /// Sleep inside every document load.
    pub load_delay: Option<Duration>,
    /// 1-based check on which the marker appears. `None` means never.
    pub marker_on_check: Option<u32>,
    pub check_error: Option<BackendError>,
    pub capture_error: Option<BackendError>,
    /// Bytes returned by capture instead of a generated PNG.
    pub capture_bytes: Option<Vec<u8>>,
    pub close_error: Option<BackendError>,
}

impl Default for FakeBehavior {
    fn default() -> Self {
        Self {
            launch_error: None,
            launch_delay: None,
            launch_hangs: false,
            viewport_error: None,
            network_idle_error: None,
            dom_content_error: None,
            load_delay: None,
            marker_on_check: Some(1),
            check_error: None,
            capture_error: None,
            capture_bytes: None,
            close_error: None,
        }
    }
}

impl FakeBehavior {
    pub fn never_renders() -> Self {
        Self {
            marker_on_check: None,
            ..Self::default()
        }
    }
}

/// Call counters shared by a backend and all its sessions.
#[derive(Debug, Default)]
pub struct FakeBackendStats {
    pub launches: AtomicU32,
    pub page_opens: AtomicU32,
    pub network_idle_loads: AtomicU32,
    pub dom_content_loads: AtomicU32,
    pub checks: AtomicU32,
    pub captures: AtomicU32,
    pub closes: AtomicU32,
    pub launch_timeouts: AtomicU32,
    check_times: Mutex<Vec<Instant>>,
    last_document: Mutex<Option<String>>,
}

impl FakeBackendStats {
    pub fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    /// Launches the backend abandoned at its own timeout.
    pub fn launch_timeouts(&self) -> u32 {
        self.launch_timeouts.load(Ordering::SeqCst)
    }

    pub fn checks(&self) -> u32 {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn captures(&self) -> u32 {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn loads(&self, milestone: LoadMilestone) -> u32 {
        match milestone {
            LoadMilestone::NetworkIdle => self.network_idle_loads.load(Ordering::SeqCst),
            LoadMilestone::DomContentLoaded => self.dom_content_loads.load(Ordering::SeqCst),
        }
    }

    /// Gaps between consecutive marker checks.
    pub fn check_intervals(&self) -> Vec<Duration> {
        let times = self.check_times.lock().unwrap();
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// HTML of the most recent document load.
    pub fn last_document(&self) -> Option<String> {
        self.last_document.lock().unwrap().clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeBrowserBackend {
    behavior: FakeBehavior,
    stats: Arc<FakeBackendStats>,
}

impl FakeBrowserBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: FakeBehavior) -> Self {
        Self {
            behavior,
            stats: Arc::default(),
        }
    }

    pub fn stats(&self) -> Arc<FakeBackendStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl BrowserBackend for FakeBrowserBackend {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserSession>, BackendError> {
        self.stats.launches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.behavior.launch_delay {
            tokio::time::sleep(delay).await;
        }
        if self.behavior.launch_hangs {
            tokio::time::sleep(LAUNCH_SPAWN_TIME + options.timeout).await;
            self.stats.launch_timeouts.fetch_add(1, Ordering::SeqCst);
            return Err(BackendError::Timeout {
                stage: "launch",
                after: options.timeout,
            });
        }
        if let Some(err) = &self.behavior.launch_error {
            return Err(err.clone());
        }

        Ok(Box::new(FakeSession {
            behavior: self.behavior.clone(),
            stats: Arc::clone(&self.stats),
            width: options.window_width,
            height: options.window_height,
            checks: 0,
        }))
    }
}

struct FakeSession {
    behavior: FakeBehavior,
    stats: Arc<FakeBackendStats>,
    width: u32,
    height: u32,
    checks: u32,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn open_page(&mut self) -> Result<(), BackendError> {
        self.stats.page_opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_viewport(&mut self, width: u32, height: u32) -> Result<(), BackendError> {
        if let Some(err) = &self.behavior.viewport_error {
            return Err(err.clone());
        }
        self.width = width;
        self.height = height;
        Ok(())
    }

    async fn load_document(&mut self, html: &str, milestone: LoadMilestone) -> Result<(), BackendError> {
        *self.stats.last_document.lock().unwrap() = Some(html.to_string());
        let error = match milestone {
            LoadMilestone::NetworkIdle => {
                self.stats.network_idle_loads.fetch_add(1, Ordering::SeqCst);
                &self.behavior.network_idle_error
            }
            LoadMilestone::DomContentLoaded => {
                self.stats.dom_content_loads.fetch_add(1, Ordering::SeqCst);
                &self.behavior.dom_content_error
            }
        };
        if let Some(delay) = self.behavior.load_delay {
            tokio::time::sleep(delay).await;
        }
        match error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn element_present(&mut self, _selector: &str) -> Result<bool, BackendError> {
        self.checks += 1;
        self.stats.checks.fetch_add(1, Ordering::SeqCst);
        self.stats.check_times.lock().unwrap().push(Instant::now());

        if let Some(err) = &self.behavior.check_error {
            return Err(err.clone());
        }
        Ok(self
            .behavior
            .marker_on_check
            .is_some_and(|on| self.checks >= on))
    }

    async fn capture_png(&mut self, region: CaptureRegion) -> Result<Vec<u8>, BackendError> {
        self.stats.captures.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.behavior.capture_error {
            return Err(err.clone());
        }
        if let Some(bytes) = &self.behavior.capture_bytes {
            return Ok(bytes.clone());
        }
        solid_png(
            region.width as usize,
            region.height as usize,
            [255, 255, 255, 255],
        )
        .map_err(BackendError::Other)
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        match &self.behavior.close_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}
