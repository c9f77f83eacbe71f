//! Bounded background queue for analysis + broadcast.
//!
//! Jobs wait in a bounded `mpsc` channel. A single dispatcher task drains it
//! and runs each job under a semaphore permit. When the channel is full new
//! jobs are rejected; the chat reply never waits on analysis.

use std::sync::Arc;

use metrics::{counter, gauge};
use nexus_core::MessageId;
use nexus_upstream::AnalysisBackend;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{
    ANALYSIS_JOBS_ACTIVE, ANALYSIS_JOBS_COMPLETED_TOTAL, ANALYSIS_JOBS_REJECTED_TOTAL,
    ANALYSIS_JOBS_SUBMITTED_TOTAL,
};
use crate::websocket::registry::ConnectionRegistry;

/// Analyze `text` and broadcast the result under `message_id`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnalysisJob {
    /// Id already returned to the chat caller.
    pub message_id: MessageId,
    /// Completion text to analyze.
    pub text: String,
}

/// Why a job was not accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// Queue at capacity.
    #[error("analysis queue full")]
    Full,
    /// Dispatcher has stopped.
    #[error("analysis queue closed")]
    Closed,
}

/// Queue limits.
#[derive(Clone, Copy, Debug)]
pub struct QueueConfig {
    /// Jobs that may wait at once.
    pub capacity: usize,
    /// Jobs that may run at once.
    pub max_concurrent: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            max_concurrent: 8,
        }
    }
}

/// Producer side of the analysis queue.
#[derive(Clone)]
pub struct AnalysisQueue {
    tx: mpsc::Sender<AnalysisJob>,
}

impl AnalysisQueue {
    /// Start the dispatcher. It stops when `cancel` fires, after letting
    /// running jobs finish.
    pub fn start(
        analysis: Arc<dyn AnalysisBackend>,
        registry: Arc<ConnectionRegistry>,
        config: QueueConfig,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        let handle = tokio::spawn(run_dispatcher(rx, analysis, registry, semaphore, cancel));
        (Self { tx }, handle)
    }

    /// Enqueue a job without waiting.
    pub fn submit(&self, job: AnalysisJob) -> Result<(), SubmitError> {
        match self.tx.try_send(job) {
            Ok(()) => {
                counter!(ANALYSIS_JOBS_SUBMITTED_TOTAL).increment(1);
                Ok(())
            }
            Err(e) => {
                counter!(ANALYSIS_JOBS_REJECTED_TOTAL).increment(1);
                Err(match e {
                    mpsc::error::TrySendError::Full(_) => SubmitError::Full,
                    mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
                })
            }
        }
    }

    /// Free slots in the queue.
    pub fn remaining_capacity(&self) -> usize {
        self.tx.capacity()
    }
}

async fn run_dispatcher(
    mut rx: mpsc::Receiver<AnalysisJob>,
    analysis: Arc<dyn AnalysisBackend>,
    registry: Arc<ConnectionRegistry>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    let mut running = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            Some(_) = running.join_next(), if !running.is_empty() => {}
            job = rx.recv() => {
                let Some(job) = job else { break };
                let permit = tokio::select! {
                    permit = Arc::clone(&semaphore).acquire_owned() => permit,
                    () = cancel.cancelled() => break,
                };
                let Ok(permit) = permit else { break };
                let analysis = Arc::clone(&analysis);
                let registry = Arc::clone(&registry);
                let _ = running.spawn(async move {
                    let _permit = permit;
                    process_job(job, analysis.as_ref(), &registry).await;
                });
            }
        }
    }

    rx.close();
    if !running.is_empty() {
        info!(in_flight = running.len(), "waiting for analysis jobs");
    }
    while running.join_next().await.is_some() {}
    debug!("analysis dispatcher stopped");
}

/// Run one job: analyze, then broadcast whatever came back.
pub async fn process_job(
    job: AnalysisJob,
    analysis: &dyn AnalysisBackend,
    registry: &ConnectionRegistry,
) -> usize {
    gauge!(ANALYSIS_JOBS_ACTIVE).increment(1.0);
    let metrics = analysis.analyze(&job.text).await;
    gauge!(ANALYSIS_JOBS_ACTIVE).decrement(1.0);

    let outcome = if metrics.is_fallback() {
        warn!(
            message_id = %job.message_id,
            reason = metrics.error.as_deref().unwrap_or_default(),
            "analysis fell back"
        );
        "fallback"
    } else {
        "success"
    };
    counter!(ANALYSIS_JOBS_COMPLETED_TOTAL, "outcome" => outcome).increment(1);

    let delivered = registry.broadcast(&job.message_id, &metrics);
    debug!(message_id = %job.message_id, outcome, delivered, "analysis job done");
    delivered
}
