//! Idle detection for subscriber sockets.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::connection::ClientConnection;

/// Why [`run_heartbeat`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// Nothing was heard from the client for at least the timeout.
    TimedOut,
    /// The socket or the server is going away.
    Cancelled,
}

/// Check the connection's idle time every `every`; return once it reaches
/// `timeout` or `cancel` fires.
///
/// The socket writer sends the pings; this task only watches for answers.
pub async fn run_heartbeat(
    connection: Arc<ClientConnection>,
    every: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticks = interval(every);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
            _ = ticks.tick() => {
                let idle = connection.idle_for();
                if idle >= timeout {
                    debug!(
                        conn_id = %connection.id,
                        idle_ms = u64::try_from(idle.as_millis()).unwrap_or(u64::MAX),
                        "subscriber silent past heartbeat timeout"
                    );
                    return HeartbeatResult::TimedOut;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::ConnectionId;
    use tokio::sync::mpsc;

    fn idle_connection() -> Arc<ClientConnection> {
        let (tx, _rx) = mpsc::channel(1);
        Arc::new(ClientConnection::new(ConnectionId::new(), tx))
    }

    #[tokio::test]
    async fn cancellation_wins() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_heartbeat(
            idle_connection(),
            Duration::from_secs(30),
            Duration::from_secs(90),
            cancel,
        )
        .await;
        assert_eq!(result, HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_subscriber_times_out() {
        let started = tokio::time::Instant::now();
        let result = run_heartbeat(
            idle_connection(),
            Duration::from_millis(10),
            Duration::from_millis(40),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::TimedOut);
        assert_eq!(started.elapsed(), Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn chatty_subscriber_is_kept() {
        let conn = idle_connection();
        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(run_heartbeat(
            Arc::clone(&conn),
            Duration::from_millis(10),
            Duration::from_millis(60),
            cancel.clone(),
        ));

        for _ in 0..8 {
            conn.touch();
            tokio::time::sleep(Duration::from_millis(15)).await;
        }
        assert!(!watcher.is_finished());
        cancel.cancel();
        assert_eq!(watcher.await.unwrap(), HeartbeatResult::Cancelled);
    }
}
