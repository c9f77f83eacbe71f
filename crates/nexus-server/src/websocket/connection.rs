//! Subscriber connection state.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use nexus_core::DeliveryError;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique subscriber connection identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Fresh time-ordered id.
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    /// Borrow the id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A connected subscriber.
///
/// Outbound frames go through a bounded queue drained by the socket's writer
/// task; the connection never blocks a broadcaster.
///
/// [`close`](Self::close) fires the connection's close token. The socket task
/// watches it, so a connection the registry gives up on is also hung up.
pub struct ClientConnection {
    /// Registry key.
    pub id: ConnectionId,
    tx: mpsc::Sender<Arc<String>>,
    closed: CancellationToken,
    opened_at: Instant,
    last_seen: Mutex<Instant>,
    failed_sends: AtomicU64,
}

impl ClientConnection {
    /// Wrap the sending half of a socket's outbound queue.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self::with_close_token(id, tx, CancellationToken::new())
    }

    /// Like [`new`](Self::new), closing through `closed`. Pass a child of the
    /// server's shutdown token so either side can end the socket.
    pub fn with_close_token(
        id: ConnectionId,
        tx: mpsc::Sender<Arc<String>>,
        closed: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            closed,
            opened_at: now,
            last_seen: Mutex::new(now),
            failed_sends: AtomicU64::new(0),
        }
    }

    /// Ask the socket task to send a Close frame and hang up. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) was called or the server is stopping.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token fired by [`close`](Self::close).
    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Enqueue a frame without waiting.
    pub fn send(&self, frame: Arc<String>) -> Result<(), DeliveryError> {
        self.tx.try_send(frame).map_err(|e| {
            let _ = self.failed_sends.fetch_add(1, Ordering::Relaxed);
            match e {
                TrySendError::Full(_) => DeliveryError::Full,
                TrySendError::Closed(_) => DeliveryError::Closed,
            }
        })
    }

    /// Frames that could not be enqueued.
    pub fn failed_sends(&self) -> u64 {
        self.failed_sends.load(Ordering::Relaxed)
    }

    /// Record inbound activity (pong or any client frame).
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound activity, or since opening.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Time since the socket was upgraded.
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection(capacity: usize) -> (ClientConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ClientConnection::new(ConnectionId::new(), tx), rx)
    }

    #[test]
    fn ids_are_unique_and_prefixed() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("conn_"));
        assert_eq!(a.to_string(), a.as_str());
    }

    #[tokio::test]
    async fn send_message_success() {
        let (conn, mut rx) = make_connection(4);
        conn.send(Arc::new("hello".into())).unwrap();
        assert_eq!(&*rx.recv().await.unwrap(), "hello");
        assert_eq!(conn.failed_sends(), 0);
    }

    #[test]
    fn send_to_closed_channel_fails() {
        let (conn, rx) = make_connection(4);
        drop(rx);
        assert_eq!(conn.send(Arc::new("x".into())), Err(DeliveryError::Closed));
        assert_eq!(conn.failed_sends(), 1);
    }

    #[test]
    fn send_to_full_channel_fails() {
        let (conn, _rx) = make_connection(1);
        conn.send(Arc::new("msg1".into())).unwrap();
        assert_eq!(conn.send(Arc::new("msg2".into())), Err(DeliveryError::Full));
    }

    #[tokio::test(start_paused = true)]
    async fn touch_resets_idle_time() {
        let (conn, _rx) = make_connection(1);
        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(conn.idle_for(), Duration::from_millis(20));
        conn.touch();
        assert_eq!(conn.idle_for(), Duration::ZERO);
        assert_eq!(conn.age(), Duration::from_millis(20));
    }

    #[test]
    fn close_fires_token_once() {
        let (conn, _rx) = make_connection(1);
        let token = conn.close_token();
        assert!(!conn.is_closed());
        conn.close();
        conn.close();
        assert!(conn.is_closed());
        assert!(token.is_cancelled());
    }

    #[test]
    fn parent_token_closes_connection() {
        let server = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(1);
        let conn = ClientConnection::with_close_token(ConnectionId::new(), tx, server.child_token());
        server.cancel();
        assert!(conn.is_closed());
    }
}
