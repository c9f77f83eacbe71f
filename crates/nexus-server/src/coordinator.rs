//! Per-request orchestration: validate, complete, reply, then hand off
//! analysis to the background queue.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use nexus_core::{ChatReply, ChatRequest, MessageId, RelayError};
use nexus_upstream::CompletionBackend;
use tracing::{debug, instrument, warn};

use crate::dispatch::{AnalysisJob, AnalysisQueue};
use crate::metrics::{CHAT_ERRORS_TOTAL, CHAT_REQUEST_DURATION_SECONDS, CHAT_REQUESTS_TOTAL};

/// Answers chat requests.
///
/// Only validation and completion failures reach the caller. Analysis and
/// broadcast happen after the reply and their failures are logged.
pub struct RelayCoordinator {
    completion: Arc<dyn CompletionBackend>,
    queue: AnalysisQueue,
}

impl RelayCoordinator {
    /// Build a coordinator over a completion backend and an analysis queue.
    pub fn new(completion: Arc<dyn CompletionBackend>, queue: AnalysisQueue) -> Self {
        Self { completion, queue }
    }

    /// Handle one chat request.
    #[instrument(skip_all)]
    pub async fn handle(&self, request: ChatRequest) -> Result<ChatReply, RelayError> {
        counter!(CHAT_REQUESTS_TOTAL).increment(1);
        let started = Instant::now();
        let result = self.relay(request).await;
        histogram!(CHAT_REQUEST_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            counter!(CHAT_ERRORS_TOTAL, "kind" => e.error_kind()).increment(1);
        }
        result
    }

    async fn relay(&self, request: ChatRequest) -> Result<ChatReply, RelayError> {
        request.validate()?;

        let text = self.completion.complete(&request).await?;
        let message_id = MessageId::from_completion(&text);
        debug!(%message_id, chars = text.len(), "completion ready");

        let job = AnalysisJob {
            message_id: message_id.clone(),
            text: text.clone(),
        };
        if let Err(e) = self.queue.submit(job) {
            warn!(%message_id, error = %e, "analysis job rejected; subscribers will not see metrics");
        }

        Ok(ChatReply::success(message_id, text))
    }
}
