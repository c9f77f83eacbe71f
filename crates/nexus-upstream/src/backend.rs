//! Backend traits.

use async_trait::async_trait;
use nexus_core::{AnalysisMetrics, ChatRequest, UpstreamError};

/// Produces a completion for a chat request.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Complete `request`, retrying internally as the implementation sees fit.
    async fn complete(&self, request: &ChatRequest) -> Result<String, UpstreamError>;
}

/// Scores a completion.
///
/// Infallible by contract: failures come back as fallback metrics.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Analyze `text`.
    async fn analyze(&self, text: &str) -> AnalysisMetrics;
}
