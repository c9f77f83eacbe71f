//! Live subscriber set and metrics fan-out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use metrics::{counter, gauge};
use nexus_core::{AnalysisMetrics, MessageId, MetricsFrame};
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::connection::{ClientConnection, ConnectionId};
use crate::metrics::{
    WS_BROADCAST_DELIVERIES_TOTAL, WS_BROADCAST_DROPS_TOTAL, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};

/// Connections currently believed live, indexed by id.
///
/// Shared as `Arc<ConnectionRegistry>` between the socket handler and the
/// analysis dispatcher.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
    /// Avoids read-locking for count queries.
    active_count: AtomicUsize,
}

/// Unregisters its connection when dropped.
#[must_use = "dropping the handle unregisters the connection"]
pub struct RegistrationHandle {
    registry: Weak<ConnectionRegistry>,
    id: ConnectionId,
}

impl RegistrationHandle {
    /// Id of the registered connection.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }
}

impl Drop for RegistrationHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let _ = registry.unregister(&self.id);
        }
    }
}

impl ConnectionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            active_count: AtomicUsize::new(0),
        }
    }

    /// Add a connection. It stays registered until the handle is dropped,
    /// [`unregister`](Self::unregister) is called, or a broadcast to it fails.
    pub fn register(self: &Arc<Self>, connection: Arc<ClientConnection>) -> RegistrationHandle {
        let id = connection.id.clone();
        {
            let mut conns = self.connections.write();
            if conns.insert(id.clone(), connection).is_none() {
                let _ = self.active_count.fetch_add(1, Ordering::Relaxed);
            }
        }
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        self.publish_count();
        debug!(conn_id = %id, "subscriber registered");
        RegistrationHandle {
            registry: Arc::downgrade(self),
            id,
        }
    }

    /// Remove a connection and close its socket. Returns whether it was
    /// present; absent ids are a no-op.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let removed = self.connections.write().remove(id);
        let removed = removed.is_some_and(|conn| {
            conn.close();
            true
        });
        if removed {
            let _ = self.active_count.fetch_sub(1, Ordering::Relaxed);
            counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
            self.publish_count();
            debug!(conn_id = %id, "subscriber unregistered");
        }
        removed
    }

    /// Push one metrics frame to every registered connection.
    ///
    /// Serializes once. Delivery is a non-blocking enqueue; a connection whose
    /// queue is closed or full is closed and removed. Returns the number of
    /// successful deliveries.
    pub fn broadcast(&self, message_id: &MessageId, metrics: &AnalysisMetrics) -> usize {
        let frame = MetricsFrame::new(message_id.clone(), metrics.clone());
        let json = match serde_json::to_string(&frame) {
            Ok(j) => Arc::new(j),
            Err(e) => {
                warn!(%message_id, error = %e, "failed to serialize metrics frame");
                return 0;
            }
        };

        let mut delivered = 0usize;
        let mut to_remove = Vec::new();
        {
            let conns = self.connections.read();
            for conn in conns.values() {
                match conn.send(Arc::clone(&json)) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        counter!(WS_BROADCAST_DROPS_TOTAL, "reason" => drop_reason(e))
                            .increment(1);
                        warn!(conn_id = %conn.id, %message_id, error = %e, "dropping subscriber after failed delivery");
                        conn.close();
                        to_remove.push(conn.id.clone());
                    }
                }
            }
        }
        for id in &to_remove {
            let _ = self.unregister(id);
        }

        counter!(WS_BROADCAST_DELIVERIES_TOTAL).increment(delivered as u64);
        debug!(
            %message_id,
            delivered,
            removed = to_remove.len(),
            "broadcast metrics frame"
        );
        delivered
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    fn publish_count(&self) {
        gauge!(WS_CONNECTIONS_ACTIVE).set(self.connection_count() as f64);
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn drop_reason(e: nexus_core::DeliveryError) -> &'static str {
    match e {
        nexus_core::DeliveryError::Closed => "closed",
        nexus_core::DeliveryError::Full => "full",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn make_connection(capacity: usize) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(ClientConnection::new(ConnectionId::new(), tx)), rx)
    }

    fn sample() -> (MessageId, AnalysisMetrics) {
        (
            MessageId::from_completion("world"),
            AnalysisMetrics::fallback("test"),
        )
    }

    #[test]
    fn register_and_unregister() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, _rx) = make_connection(4);
        let id = conn.id.clone();
        let handle = registry.register(conn);
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(handle.id(), &id);

        assert!(registry.unregister(&id));
        assert_eq!(registry.connection_count(), 0);
        assert!(!registry.unregister(&id));
        drop(handle);
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn dropping_handle_unregisters() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, _rx) = make_connection(4);
        {
            let _handle = registry.register(conn);
            assert_eq!(registry.connection_count(), 1);
        }
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn broadcast_with_no_connections_returns_zero() {
        let registry = ConnectionRegistry::new();
        let (id, metrics) = sample();
        assert_eq!(registry.broadcast(&id, &metrics), 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (c1, mut rx1) = make_connection(4);
        let (c2, mut rx2) = make_connection(4);
        let _h1 = registry.register(c1);
        let _h2 = registry.register(c2);

        let (id, metrics) = sample();
        assert_eq!(registry.broadcast(&id, &metrics), 2);

        for rx in [&mut rx1, &mut rx2] {
            let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(frame["type"], "metrics");
            assert_eq!(frame["message_id"], id.as_str());
            assert_eq!(frame["data"]["status"], "error");
        }
    }

    #[test]
    fn closed_connection_is_pruned() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (live1, _rx1) = make_connection(4);
        let (live2, _rx2) = make_connection(4);
        let (dead, dead_rx) = make_connection(4);
        let _h1 = registry.register(live1);
        let _h2 = registry.register(live2);
        let _h3 = registry.register(dead);
        drop(dead_rx);

        let (id, metrics) = sample();
        assert_eq!(registry.broadcast(&id, &metrics), 2);
        assert_eq!(registry.connection_count(), 2);
    }

    #[test]
    fn full_connection_is_pruned() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (slow, _rx) = make_connection(1);
        let _h = registry.register(Arc::clone(&slow));

        let (id, metrics) = sample();
        assert_eq!(registry.broadcast(&id, &metrics), 1);
        assert!(!slow.is_closed());
        assert_eq!(registry.broadcast(&id, &metrics), 0);
        assert_eq!(registry.connection_count(), 0);
        assert!(slow.is_closed());
    }

    #[test]
    fn unregister_closes_the_socket() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, _rx) = make_connection(1);
        let _h = registry.register(Arc::clone(&conn));
        assert!(registry.unregister(&conn.id));
        assert!(conn.is_closed());
    }

    #[test]
    fn handle_outliving_registry_is_harmless() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, _rx) = make_connection(1);
        let handle = registry.register(conn);
        drop(registry);
        drop(handle);
    }
}
