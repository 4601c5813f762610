//! Error types for the chart render services.

use std::fmt;

use thiserror::Error;

/// Result type alias using ChartError.
pub type ChartResult<T> = Result<T, ChartError>;

/// Primary error type for storage, configuration and validation.
#[derive(Debug, Error)]
pub enum ChartError {
    // === Request Errors ===
    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    #[error("Chart not found: {0}")]
    ChartNotFound(String),

    // === Storage Errors ===
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    // === Infrastructure Errors ===
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ChartError {
    pub fn invalid(param: impl Into<String>, message: impl Into<String>) -> Self {
        ChartError::InvalidParameter {
            param: param.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ChartError {
    fn from(err: serde_json::Error) -> Self {
        ChartError::InternalError(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for ChartError {
    fn from(err: std::io::Error) -> Self {
        ChartError::InternalError(err.to_string())
    }
}

/// Classified reason a render request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderErrorKind {
    /// The chart spec or options were rejected before any work was done.
    InvalidRequest,
    /// A stored chart hash did not resolve to a record.
    ChartNotFound,
    /// The rendering backend could not be started.
    LaunchFailure,
    /// The chart document failed to load under both wait criteria.
    ContentLoadFailure,
    /// The render-complete marker never appeared.
    RenderTimeout,
    /// Screenshot capture failed after a successful render.
    CaptureFailure,
    /// The backend process crashed, ran out of resources or closed the target.
    TargetClosed,
    /// The backend connection dropped or answered with a protocol error.
    BackendProtocol,
    /// Anything else.
    Generation,
}

impl RenderErrorKind {
    /// Stable label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderErrorKind::InvalidRequest => "invalid_request",
            RenderErrorKind::ChartNotFound => "chart_not_found",
            RenderErrorKind::LaunchFailure => "launch_failure",
            RenderErrorKind::ContentLoadFailure => "content_load_failure",
            RenderErrorKind::RenderTimeout => "render_timeout",
            RenderErrorKind::CaptureFailure => "capture_failure",
            RenderErrorKind::TargetClosed => "target_closed",
            RenderErrorKind::BackendProtocol => "backend_protocol",
            RenderErrorKind::Generation => "generation",
        }
    }

    /// Human-readable message shown to the caller.
    pub fn user_message(&self) -> &'static str {
        match self {
            RenderErrorKind::InvalidRequest => "The chart request is invalid",
            RenderErrorKind::ChartNotFound => "The requested chart does not exist",
            RenderErrorKind::LaunchFailure => "The chart renderer could not be started",
            RenderErrorKind::ContentLoadFailure => "The chart document failed to load",
            RenderErrorKind::RenderTimeout => "The chart did not finish rendering in time",
            RenderErrorKind::CaptureFailure => "The rendered chart could not be captured",
            RenderErrorKind::TargetClosed => {
                "The chart renderer ran out of resources or closed unexpectedly"
            }
            RenderErrorKind::BackendProtocol => {
                "The chart renderer connection failed; this is an infrastructure problem"
            }
            RenderErrorKind::Generation => "Chart generation failed",
        }
    }

    /// Whether the failure points at the infrastructure rather than the request.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            RenderErrorKind::LaunchFailure
                | RenderErrorKind::TargetClosed
                | RenderErrorKind::BackendProtocol
        )
    }
}

impl fmt::Display for RenderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed render, carrying the classified kind and a reason string.
///
/// `reason` is safe to show to callers; backend diagnostics are logged where
/// the failure is classified and never copied in here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {reason}", kind.user_message())]
pub struct RenderError {
    pub kind: RenderErrorKind,
    pub reason: String,
}

impl RenderError {
    pub fn new(kind: RenderErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    pub fn user_message(&self) -> &'static str {
        self.kind.user_message()
    }

    /// HTTP status a routing layer should answer with.
    pub fn http_status_code(&self) -> u16 {
        match self.kind {
            RenderErrorKind::InvalidRequest => 400,
            RenderErrorKind::ChartNotFound => 404,
            RenderErrorKind::LaunchFailure
            | RenderErrorKind::TargetClosed
            | RenderErrorKind::BackendProtocol => 503,
            RenderErrorKind::RenderTimeout => 504,
            _ => 500,
        }
    }
}

impl From<ChartError> for RenderError {
    fn from(err: ChartError) -> Self {
        match err {
            ChartError::InvalidParameter { .. } => {
                RenderError::new(RenderErrorKind::InvalidRequest, err.to_string())
            }
            ChartError::ChartNotFound(hash) => RenderError::new(
                RenderErrorKind::ChartNotFound,
                format!("no chart with hash '{}'", hash),
            ),
            other => RenderError::new(RenderErrorKind::Generation, other.to_string()),
        }
    }
}
