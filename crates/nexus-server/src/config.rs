//! Server configuration.

use std::time::Duration;

use nexus_settings::{NexusSettings, SettingsError};

/// Runtime configuration for [`RelayServer`](crate::server::RelayServer).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind both listeners to.
    pub host: String,
    /// Chat/health port (`0` auto-assigns).
    pub http_port: u16,
    /// Subscriber `WebSocket` port (`0` auto-assigns).
    pub ws_port: u16,
    /// Interval between pings.
    pub heartbeat_interval: Duration,
    /// Drop a subscriber after this long without a pong.
    pub heartbeat_timeout: Duration,
    /// Per-subscriber outbound queue depth.
    pub send_queue_capacity: usize,
    /// Background analysis jobs that may wait at once.
    pub queue_capacity: usize,
    /// Background analyses that may run at once.
    pub max_concurrent: usize,
    /// How long shutdown waits for in-flight work.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            http_port: 0,
            ws_port: 0,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            send_queue_capacity: 64,
            queue_capacity: 256,
            max_concurrent: 8,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Derive from validated settings. Fails if either port is missing.
    pub fn from_settings(settings: &NexusSettings) -> Result<Self, SettingsError> {
        Ok(Self {
            host: settings.server.host.clone(),
            http_port: settings.http_port()?,
            ws_port: settings.ws_port()?,
            heartbeat_interval: Duration::from_millis(settings.server.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(settings.server.heartbeat_timeout_ms),
            send_queue_capacity: settings.server.send_queue_capacity,
            queue_capacity: settings.dispatch.queue_capacity,
            max_concurrent: settings.dispatch.max_concurrent,
            shutdown_timeout: Duration::from_millis(settings.server.shutdown_timeout_ms),
        })
    }
}
