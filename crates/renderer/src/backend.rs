//! Seam between the render engine and the external rendering backend.
//!
//! A [`BrowserBackend`] launches one isolated [`BrowserSession`] per render.
//! The engine owns all timeouts and guarantees that every launched session is
//! closed exactly once; implementations only translate calls into backend
//! operations.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Load milestone the engine waits for after navigating to the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadMilestone {
    /// No network activity for a short period. Strict: external scripts loaded.
    NetworkIdle,
    /// Document parsed. Looser fallback.
    DomContentLoaded,
}

impl LoadMilestone {
    /// Name of the matching Page lifecycle event.
    pub fn lifecycle_event(&self) -> &'static str {
        match self {
            LoadMilestone::NetworkIdle => "networkIdle",
            LoadMilestone::DomContentLoaded => "DOMContentLoaded",
        }
    }
}

/// Pixel region to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CaptureRegion {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// Parameters for starting a backend process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub window_width: u32,
    pub window_height: u32,
    pub timeout: Duration,
}

/// Failure reported by a backend implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("launch failed: {0}")]
    Launch(String),

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    #[error("target closed: {0}")]
    TargetClosed(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Classify a free-form backend message.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();

        const CLOSED: [&str; 6] = [
            "target closed",
            "session closed",
            "target crashed",
            "page crashed",
            "out of memory",
            "browser has disconnected",
        ];
        const PROTOCOL: [&str; 6] = [
            "protocol error",
            "no response",
            "websocket",
            "connection closed",
            "channel",
            "ws error",
        ];

        if CLOSED.iter().any(|needle| lower.contains(needle)) {
            BackendError::TargetClosed(message)
        } else if PROTOCOL.iter().any(|needle| lower.contains(needle)) {
            BackendError::Protocol(message)
        } else {
            BackendError::Other(message)
        }
    }

    /// Whether the backend itself is gone, so no further stage can succeed.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            BackendError::TargetClosed(_) | BackendError::Protocol(_)
        )
    }
}

/// Starts rendering sessions.
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    /// Launch an isolated backend process. The returned session is owned by
    /// exactly one render and never reused.
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserSession>, BackendError>;
}

/// One backend process and its single page.
#[async_trait]
pub trait BrowserSession: Send {
    async fn open_page(&mut self) -> Result<(), BackendError>;

    /// Size the rendering surface. Engines treat failure as non-fatal.
    async fn set_viewport(&mut self, width: u32, height: u32) -> Result<(), BackendError>;

    /// Load a self-contained document and wait for the milestone.
    async fn load_document(&mut self, html: &str, milestone: LoadMilestone) -> Result<(), BackendError>;

    /// Whether an element matching the selector exists.
    async fn element_present(&mut self, selector: &str) -> Result<bool, BackendError>;

    /// Capture a region as PNG, composited over the page background.
    async fn capture_png(&mut self, region: CaptureRegion) -> Result<Vec<u8>, BackendError>;

    /// Terminate the backend process.
    async fn close(&mut self) -> Result<(), BackendError>;
}
