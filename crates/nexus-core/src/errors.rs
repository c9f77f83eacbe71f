//! Error taxonomy.
//!
//! Only [`ValidationError`] and [`UpstreamError`] ever reach an HTTP caller
//! (wrapped in [`RelayError`]). [`AnalysisError`] and [`DeliveryError`] are
//! absorbed after the synchronous reply has been sent.

use thiserror::Error;

/// HTTP status the completion backend uses for "overloaded, try again".
pub const STATUS_SERVICE_UNAVAILABLE: u16 = 503;

/// Malformed or empty inbound request.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Request body was not valid JSON for a chat request.
    #[error("Invalid JSON format")]
    InvalidJson,
    /// `message` was missing, empty or whitespace-only.
    #[error("No message provided")]
    EmptyMessage,
}

/// Completion backend failure, surfaced after the retry budget is spent.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// Backend answered with a non-success status.
    #[error("completion backend error {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, verbatim.
        body: String,
    },
    /// Backend unreachable (connect failure, timeout, reset).
    #[error("completion backend unreachable: {0}")]
    Transport(String),
    /// Backend answered 2xx but the body did not contain a completion.
    #[error("invalid completion response: {0}")]
    InvalidResponse(String),
}

impl UpstreamError {
    /// Whether another attempt may succeed.
    ///
    /// Only an overloaded backend (503) and transport failures qualify; any
    /// other status points at a request or credential problem.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status == STATUS_SERVICE_UNAVAILABLE,
            Self::Transport(_) => true,
            Self::InvalidResponse(_) => false,
        }
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Status { status, .. } if *status == STATUS_SERVICE_UNAVAILABLE => "overloaded",
            Self::Status { .. } => "status",
            Self::Transport(_) => "transport",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }
}

/// Analysis backend failure. Internal only: converted into fallback metrics.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AnalysisError {
    /// Nothing to analyze.
    #[error("empty completion text")]
    EmptyInput,
    /// Backend answered with a non-success status.
    #[error("analysis backend error {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, verbatim.
        body: String,
    },
    /// Backend unreachable.
    #[error("analysis backend unreachable: {0}")]
    Transport(String),
    /// Backend answered 2xx with an undecodable body.
    #[error("invalid analysis response: {0}")]
    InvalidResponse(String),
}

/// Per-connection broadcast failure. Internal only: triggers unregistration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The connection's writer task is gone.
    #[error("connection closed")]
    Closed,
    /// The connection's outbound queue is full.
    #[error("outbound queue full")]
    Full,
}

/// Errors visible to the caller of a chat request.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Bad request; no upstream call was made.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Completion failed; there is no reply to return.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl RelayError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Upstream(e) => e.error_kind(),
        }
    }
}
