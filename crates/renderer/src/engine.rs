//! Render engine: one isolated backend session per chart.
//!
//! ```text
//! LAUNCHING -> PAGE_OPEN -> CONTENT_LOADING -> WAITING_RENDER -> CAPTURED
//! ```
//!
//! Every stage runs under its own timeout. Content loading waits for network
//! idle first and falls back once to DOM content loaded. Completion is polled
//! through [`CompletionPoll`]. The session is closed on every exit path: the
//! normal path awaits the close, and a render future dropped mid-flight hands
//! the session to a background task from [`SessionGuard`]'s `Drop`.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use chart_common::{ChartSpec, RenderError, RenderErrorKind, RenderOptions};

use crate::backend::{
    BackendError, BrowserBackend, BrowserSession, CaptureRegion, LaunchOptions, LoadMilestone,
};
use crate::document::{build_document, ChartDocument, RENDER_MARKER};
use crate::png;
use crate::poll::{CompletionPoll, PollOutcome, PollSchedule, PollStep};

/// Extra time the engine allows a launch beyond the backend's own launch
/// timeout, so the backend times out and cleans up its process first.
pub const LAUNCH_GRACE: Duration = Duration::from_secs(2);

/// Chart.js build loaded by generated documents.
pub const DEFAULT_CHART_JS_URL: &str =
    "https://cdn.jsdelivr.net/npm/chart.js@4.4.1/dist/chart.umd.min.js";

/// Engine timeouts and document settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub launch_timeout: Duration,
    /// Opening the page and sizing the viewport.
    pub page_timeout: Duration,
    pub network_idle_timeout: Duration,
    pub dom_content_timeout: Duration,
    pub poll: PollSchedule,
    /// Bound on a single marker check.
    pub poll_check_timeout: Duration,
    pub capture_timeout: Duration,
    pub close_timeout: Duration,
    pub chart_js_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            launch_timeout: Duration::from_secs(30),
            page_timeout: Duration::from_secs(10),
            network_idle_timeout: Duration::from_secs(15),
            dom_content_timeout: Duration::from_secs(10),
            poll: PollSchedule::default(),
            poll_check_timeout: Duration::from_secs(5),
            capture_timeout: Duration::from_secs(15),
            close_timeout: Duration::from_secs(10),
            chart_js_url: DEFAULT_CHART_JS_URL.to_string(),
        }
    }
}

/// Stage of a render attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStage {
    Launching,
    PageOpen,
    ContentLoading,
    WaitingRender,
    Capturing,
}

impl RenderStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStage::Launching => "launching",
            RenderStage::PageOpen => "page_open",
            RenderStage::ContentLoading => "content_loading",
            RenderStage::WaitingRender => "waiting_render",
            RenderStage::Capturing => "capturing",
        }
    }
}

impl fmt::Display for RenderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a backend failure at a given stage to the error kind callers see.
pub fn classify(stage: RenderStage, error: &BackendError) -> RenderErrorKind {
    match (stage, error) {
        (RenderStage::Launching, _) => RenderErrorKind::LaunchFailure,
        (_, BackendError::TargetClosed(_)) => RenderErrorKind::TargetClosed,
        (_, BackendError::Protocol(_)) => RenderErrorKind::BackendProtocol,
        (RenderStage::ContentLoading, _) => RenderErrorKind::ContentLoadFailure,
        (RenderStage::WaitingRender, _) => RenderErrorKind::RenderTimeout,
        (RenderStage::Capturing, _) => RenderErrorKind::CaptureFailure,
        (RenderStage::PageOpen, _) => RenderErrorKind::Generation,
    }
}

/// A captured chart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub elapsed: Duration,
}

/// Anything that can turn a chart into PNG bytes.
#[async_trait]
pub trait ChartRasterizer: Send + Sync {
    async fn rasterize(
        &self,
        spec: &ChartSpec,
        options: &RenderOptions,
    ) -> Result<RenderedImage, RenderError>;
}

pub struct RenderEngine {
    backend: Arc<dyn BrowserBackend>,
    config: EngineConfig,
}

impl RenderEngine {
    pub fn new(backend: Arc<dyn BrowserBackend>, config: EngineConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Render one chart in a fresh backend session.
    pub async fn render(
        &self,
        spec: &ChartSpec,
        options: &RenderOptions,
    ) -> Result<RenderedImage, RenderError> {
        let started = Instant::now();

        options.validate().map_err(|e| {
            debug!(error = %e, "Rejected render options");
            RenderError::from(e)
        })?;

        let document = build_document(spec, options, &self.config.chart_js_url).map_err(|e| {
            error!(error = %e, "Failed to serialize chart configuration");
            RenderError::new(
                RenderErrorKind::Generation,
                "chart configuration could not be serialized",
            )
        })?;

        let launch = LaunchOptions {
            window_width: document.width,
            window_height: document.height,
            timeout: self.config.launch_timeout,
        };

        let launch_limit = self.config.launch_timeout + LAUNCH_GRACE;
        let session = match timeout(launch_limit, self.backend.launch(&launch)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => return Err(self.fail(RenderStage::Launching, e)),
            Err(_) => {
                return Err(self.fail(
                    RenderStage::Launching,
                    BackendError::Timeout {
                        stage: "launch",
                        after: launch_limit,
                    },
                ))
            }
        };

        let mut guard = SessionGuard::new(session);
        let result = match guard.session() {
            Some(session) => self.drive(session, &document).await,
            None => Err(RenderError::new(
                RenderErrorKind::Generation,
                "backend session unavailable",
            )),
        };
        guard.release(self.config.close_timeout).await;

        let png = result?;
        let elapsed = started.elapsed();

        info!(
            chart_type = %spec.chart_type,
            width = document.width,
            height = document.height,
            size = png.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Chart rendered"
        );

        Ok(RenderedImage {
            png,
            width: document.width,
            height: document.height,
            elapsed,
        })
    }

    async fn drive(
        &self,
        session: &mut dyn BrowserSession,
        document: &ChartDocument,
    ) -> Result<Vec<u8>, RenderError> {
        // PAGE_OPEN
        match timeout(self.config.page_timeout, session.open_page()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(self.fail(RenderStage::PageOpen, e)),
            Err(_) => {
                return Err(self.fail(
                    RenderStage::PageOpen,
                    BackendError::Timeout {
                        stage: "page open",
                        after: self.config.page_timeout,
                    },
                ))
            }
        }

        match timeout(
            self.config.page_timeout,
            session.set_viewport(document.width, document.height),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Viewport sizing failed, using backend default"),
            Err(_) => warn!("Viewport sizing timed out, using backend default"),
        }

        // CONTENT_LOADING
        self.load(session, &document.html).await?;

        // WAITING_RENDER
        self.wait_for_render(session).await?;

        // CAPTURED
        let region = CaptureRegion::full(document.width, document.height);
        let png = match timeout(self.config.capture_timeout, session.capture_png(region)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => return Err(self.fail(RenderStage::Capturing, e)),
            Err(_) => {
                return Err(self.fail(
                    RenderStage::Capturing,
                    BackendError::Timeout {
                        stage: "capture",
                        after: self.config.capture_timeout,
                    },
                ))
            }
        };

        match png::inspect(&png) {
            Ok(info) if info.width != document.width || info.height != document.height => {
                warn!(
                    expected_width = document.width,
                    expected_height = document.height,
                    width = info.width,
                    height = info.height,
                    "Captured image size differs from requested size"
                );
            }
            Ok(_) => {}
            Err(e) => {
                return Err(self.fail(
                    RenderStage::Capturing,
                    BackendError::Other(format!("capture is not a valid PNG: {}", e)),
                ))
            }
        }

        Ok(png)
    }

    async fn load(&self, session: &mut dyn BrowserSession, html: &str) -> Result<(), RenderError> {
        let strict = self.load_with(session, html, LoadMilestone::NetworkIdle).await;
        let error = match strict {
            Ok(()) => return Ok(()),
            Err(e) if e.is_fatal_to_session() => {
                return Err(self.fail(RenderStage::ContentLoading, e))
            }
            Err(e) => e,
        };

        warn!(error = %error, "Network idle not reached, retrying with DOM content loaded");

        self.load_with(session, html, LoadMilestone::DomContentLoaded)
            .await
            .map_err(|e| self.fail(RenderStage::ContentLoading, e))
    }

    async fn load_with(
        &self,
        session: &mut dyn BrowserSession,
        html: &str,
        milestone: LoadMilestone,
    ) -> Result<(), BackendError> {
        let limit = match milestone {
            LoadMilestone::NetworkIdle => self.config.network_idle_timeout,
            LoadMilestone::DomContentLoaded => self.config.dom_content_timeout,
        };

        match timeout(limit, session.load_document(html, milestone)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout {
                stage: milestone.lifecycle_event(),
                after: limit,
            }),
        }
    }

    async fn wait_for_render(&self, session: &mut dyn BrowserSession) -> Result<(), RenderError> {
        let mut poll = CompletionPoll::new(self.config.poll);
        let mut step = poll.start();

        let outcome = loop {
            step = match step {
                PollStep::Check { attempt } => {
                    let present = match timeout(
                        self.config.poll_check_timeout,
                        session.element_present(RENDER_MARKER),
                    )
                    .await
                    {
                        Ok(Ok(present)) => present,
                        Ok(Err(e)) if e.is_fatal_to_session() => {
                            return Err(self.fail(RenderStage::WaitingRender, e))
                        }
                        Ok(Err(e)) => {
                            debug!(attempt, error = %e, "Render marker check failed");
                            false
                        }
                        Err(_) => {
                            debug!(attempt, "Render marker check timed out");
                            false
                        }
                    };
                    poll.observe(present)
                }
                PollStep::Wait(delay) => {
                    tokio::time::sleep(delay).await;
                    poll.resume()
                }
                PollStep::Done(outcome) => break outcome,
            };
        };

        match outcome {
            PollOutcome::Complete { attempts } => {
                debug!(attempts, "Render marker found");
                Ok(())
            }
            PollOutcome::Exhausted { attempts } => Err(self.fail(
                RenderStage::WaitingRender,
                BackendError::Other(format!(
                    "render marker absent after {} checks",
                    attempts
                )),
            )),
        }
    }

    /// Classify, log the full detail and build the caller-facing error.
    fn fail(&self, stage: RenderStage, error: BackendError) -> RenderError {
        let kind = classify(stage, &error);
        error!(
            stage = %stage,
            kind = %kind,
            error = %error,
            "Chart render failed"
        );
        RenderError::new(kind, format!("failed while {}", stage_phrase(stage)))
    }
}

fn stage_phrase(stage: RenderStage) -> &'static str {
    match stage {
        RenderStage::Launching => "starting the renderer",
        RenderStage::PageOpen => "opening the render page",
        RenderStage::ContentLoading => "loading the chart document",
        RenderStage::WaitingRender => "waiting for the chart to draw",
        RenderStage::Capturing => "capturing the chart image",
    }
}

#[async_trait]
impl ChartRasterizer for RenderEngine {
    async fn rasterize(
        &self,
        spec: &ChartSpec,
        options: &RenderOptions,
    ) -> Result<RenderedImage, RenderError> {
        self.render(spec, options).await
    }
}

// ============================================================================
// Session ownership
// ============================================================================

/// Owns a launched session until it has been closed exactly once.
pub struct SessionGuard {
    session: Option<Box<dyn BrowserSession>>,
}

impl SessionGuard {
    pub fn new(session: Box<dyn BrowserSession>) -> Self {
        Self {
            session: Some(session),
        }
    }

    pub fn session(&mut self) -> Option<&mut (dyn BrowserSession + 'static)> {
        self.session.as_deref_mut()
    }

    /// Close the session. Later calls are no-ops.
    pub async fn release(&mut self, limit: Duration) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        match timeout(limit, session.close()).await {
            Ok(Ok(())) => debug!("Backend session closed"),
            Ok(Err(e)) => warn!(error = %e, "Backend session close reported an error"),
            Err(_) => warn!(after = ?limit, "Backend session close timed out"),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        warn!("Backend session dropped without release, closing in background");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = session.close().await {
                        warn!(error = %e, "Background session close failed");
                    }
                });
            }
            Err(_) => error!("No runtime available to close backend session"),
        }
    }
}
