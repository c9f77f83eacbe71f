//! # nexus-upstream
//!
//! HTTP clients for the two backends the relay depends on:
//!
//! - [`CompletionClient`]: OpenAI-compatible chat completions with a bounded
//!   retry on 503 and transport failures.
//! - [`AnalysisClient`]: single-attempt text analysis that never fails; any
//!   problem becomes [`AnalysisMetrics::fallback`](nexus_core::AnalysisMetrics::fallback).
//!
//! Both sit behind the [`CompletionBackend`] / [`AnalysisBackend`] traits so
//! the relay can be driven by the scripted mocks in [`mock`].

#![deny(unsafe_code)]

use std::time::Duration;

use thiserror::Error;

pub mod analysis;
pub mod backend;
pub mod completion;
pub mod mock;
pub mod telegram;

pub use analysis::AnalysisClient;
pub use backend::{AnalysisBackend, CompletionBackend};
pub use completion::CompletionClient;
pub use telegram::{TelegramClient, TelegramError, WebhookChange};

/// Requests sent to a backend, labelled by `backend`.
pub const UPSTREAM_REQUESTS_TOTAL: &str = "upstream_requests_total";
/// Retries after a retryable completion failure, labelled by `backend`.
pub const UPSTREAM_RETRIES_TOTAL: &str = "upstream_retries_total";
/// Backend failures surfaced to the caller, labelled by `backend` and `kind`.
pub const UPSTREAM_ERRORS_TOTAL: &str = "upstream_errors_total";
/// Backend call latency in seconds, labelled by `backend`.
pub const UPSTREAM_DURATION_SECONDS: &str = "upstream_duration_seconds";

/// Label value for the completion backend.
pub const BACKEND_COMPLETION: &str = "completion";
/// Label value for the analysis backend.
pub const BACKEND_ANALYSIS: &str = "analysis";
/// Label value for the Telegram Bot API.
pub const BACKEND_TELEGRAM: &str = "telegram";

/// An HTTP client could not be built, typically because the TLS backend
/// failed to initialize.
#[derive(Debug, Error)]
#[error("building {backend} HTTP client: {source}")]
pub struct ClientBuildError {
    /// Which backend the client was for.
    pub backend: &'static str,
    /// Underlying builder failure.
    #[source]
    pub source: reqwest::Error,
}

pub(crate) fn build_http_client(
    backend: &'static str,
    timeout: Duration,
) -> Result<reqwest::Client, ClientBuildError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|source| ClientBuildError { backend, source })
}
