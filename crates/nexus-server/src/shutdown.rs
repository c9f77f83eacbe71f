//! Relay-wide stop signal and bounded drain of background tasks.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A background task the server waits for on shutdown.
pub type NamedTask = (&'static str, JoinHandle<()>);

/// What happened to the tasks handed to [`ShutdownCoordinator::drain`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Tasks that ended before the deadline.
    pub finished: usize,
    /// Tasks still running at the deadline; these were aborted.
    pub aborted: usize,
}

impl DrainReport {
    /// Every task ended on its own.
    pub fn is_clean(&self) -> bool {
        self.aborted == 0
    }
}

/// Owns the token that the listeners, the analysis dispatcher and every
/// subscriber socket watch.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Fresh, untriggered signal.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token that fires when shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Fire the signal. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fire the signal, then give `tasks` until `grace` elapses to stop.
    /// Stragglers are aborted.
    pub async fn drain(&self, tasks: Vec<NamedTask>, grace: Duration) -> DrainReport {
        self.shutdown();
        info!(
            tasks = tasks.len(),
            grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
            "draining background tasks"
        );

        let deadline = Instant::now() + grace;
        let mut report = DrainReport::default();
        for (name, mut handle) in tasks {
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {
                    debug!(task = name, "task stopped");
                    report.finished += 1;
                }
                Ok(Err(e)) => {
                    warn!(task = name, error = %e, "task ended abnormally");
                    report.finished += 1;
                }
                Err(_) => {
                    handle.abort();
                    warn!(task = name, "task still running at deadline, aborted");
                    report.aborted += 1;
                }
            }
        }
        report
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
