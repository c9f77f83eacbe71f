//! Scripted backends for deterministic tests without network calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use nexus_core::{AnalysisMetrics, ChatRequest, UpstreamError};

use crate::backend::{AnalysisBackend, CompletionBackend};

/// Pre-programmed completion outcome.
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Return this completion text.
    Text(String),
    /// Fail with this error.
    Error(UpstreamError),
    /// Wait, then resolve the inner reply.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    /// Convenience: plain text reply.
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }

    /// Convenience: wrap any reply with a delay.
    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Completion backend that replays scripted replies in order.
pub struct MockCompletion {
    replies: Vec<MockReply>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockCompletion {
    /// Script the replies for successive calls.
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies,
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with `text`.
    pub fn always(text: &str) -> Self {
        Self::new(vec![MockReply::text(text); 64])
    }

    /// Number of `complete` calls so far.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Requests received, oldest first.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CompletionBackend for MockCompletion {
    async fn complete(&self, request: &ChatRequest) -> Result<String, UpstreamError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let Some(mut current) = self.replies.get(idx) else {
            return Err(UpstreamError::InvalidResponse(format!(
                "MockCompletion: no reply configured for call {idx}"
            )));
        };
        loop {
            match current {
                MockReply::Text(text) => return Ok(text.clone()),
                MockReply::Error(e) => return Err(e.clone()),
                MockReply::Delay(duration, inner) => {
                    tokio::time::sleep(*duration).await;
                    current = inner;
                }
            }
        }
    }
}

/// Analysis backend that returns the same metrics for every call.
pub struct MockAnalysis {
    metrics: AnalysisMetrics,
    delay: Duration,
    call_count: AtomicUsize,
    texts: Mutex<Vec<String>>,
}

impl MockAnalysis {
    /// Answer every call with `metrics`.
    pub fn new(metrics: AnalysisMetrics) -> Self {
        Self {
            metrics,
            delay: Duration::ZERO,
            call_count: AtomicUsize::new(0),
            texts: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with a fallback, as if the backend were down.
    pub fn failing(reason: &str) -> Self {
        Self::new(AnalysisMetrics::fallback(reason))
    }

    /// Sleep before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of `analyze` calls so far.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Texts analyzed, oldest first.
    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().clone()
    }
}

#[async_trait]
impl AnalysisBackend for MockAnalysis {
    async fn analyze(&self, text: &str) -> AnalysisMetrics {
        let _ = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.texts.lock().push(text.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.metrics.clone()
    }
}
