//! Subscriber socket lifecycle: upgrade, writer/reader tasks, heartbeat.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

use super::connection::{ClientConnection, ConnectionId};
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use super::registry::ConnectionRegistry;
use crate::config::ServerConfig;

/// How long a closing socket may spend sending its close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Per-socket tuning.
#[derive(Clone, Debug)]
pub struct SocketConfig {
    /// Interval between pings.
    pub heartbeat_interval: Duration,
    /// Drop the socket after this long without a pong.
    pub heartbeat_timeout: Duration,
    /// Outbound queue depth.
    pub send_queue_capacity: usize,
}

impl From<&ServerConfig> for SocketConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval,
            heartbeat_timeout: config.heartbeat_timeout,
            send_queue_capacity: config.send_queue_capacity.max(1),
        }
    }
}

/// State for the subscriber listener.
#[derive(Clone)]
pub struct WsState {
    /// Where sockets register.
    pub registry: Arc<ConnectionRegistry>,
    /// Per-socket tuning.
    pub config: SocketConfig,
    /// Cancelled on server shutdown.
    pub shutdown: CancellationToken,
}

/// GET `/` and `/ws` on the subscriber port.
pub async fn ws_upgrade_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.registry, state.config, state.shutdown))
}

/// Drive one subscriber until it closes, stops answering pings, fails a
/// write, is dropped by the registry, or the server shuts down. The
/// connection is registered for exactly that span.
pub async fn handle_socket(
    socket: WebSocket,
    registry: Arc<ConnectionRegistry>,
    config: SocketConfig,
    shutdown: CancellationToken,
) {
    let cancel = shutdown.child_token();
    let (tx, mut rx) = mpsc::channel::<Arc<String>>(config.send_queue_capacity);
    let connection = Arc::new(ClientConnection::with_close_token(
        ConnectionId::new(),
        tx,
        cancel.clone(),
    ));
    let conn_id = connection.id.clone();
    let registration = registry.register(Arc::clone(&connection));
    info!(conn_id = %conn_id, "subscriber connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer: queued frames out, periodic ping, close frame once cancelled.
    let writer_cancel = cancel.clone();
    let writer_cid = conn_id.clone();
    let ping_every = config.heartbeat_interval;
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(ping_every);
        // First tick completes immediately.
        ping_interval.tick().await;

        loop {
            tokio::select! {
                biased;
                () = writer_cancel.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    trace!(conn_id = %writer_cid, "sent ping");
                }
            }
        }
    });

    // Reader: liveness only; client payloads are ignored.
    let reader_conn = Arc::clone(&connection);
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Close(_) => break,
                Message::Text(_) | Message::Binary(_) => {
                    reader_conn.touch();
                    trace!(conn_id = %reader_conn.id, "ignoring client frame");
                }
                // axum answers pings automatically
                Message::Pong(_) | Message::Ping(_) => reader_conn.touch(),
            }
        }
    });

    let mut heartbeat = tokio::spawn(run_heartbeat(
        Arc::clone(&connection),
        config.heartbeat_interval,
        config.heartbeat_timeout,
        cancel.clone(),
    ));

    let (reason, writer_done) = tokio::select! {
        _ = &mut writer => ("write_closed", true),
        _ = &mut reader => ("remote_closed", false),
        result = &mut heartbeat => match result {
            Ok(HeartbeatResult::TimedOut) => ("heartbeat_timeout", false),
            _ => ("cancelled", false),
        },
    };
    let reason = if shutdown.is_cancelled() {
        "shutdown"
    } else if connection.is_closed() {
        "dropped_by_registry"
    } else {
        reason
    };

    cancel.cancel();
    reader.abort();
    heartbeat.abort();
    drop(registration);

    // Give the writer a moment to flush the close frame to a slow peer.
    if !writer_done && tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }

    info!(
        conn_id = %conn_id,
        reason,
        connected_ms = u64::try_from(connection.age().as_millis()).unwrap_or(u64::MAX),
        "subscriber disconnected"
    );
}
