//! Body of `GET /health`.

use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

/// Liveness snapshot of the relay.
#[derive(Clone, Debug, Serialize)]
pub struct HealthResponse {
    /// `"ok"` whenever the listener can answer at all.
    pub status: &'static str,
    /// When the snapshot was taken.
    #[serde(serialize_with = "rfc3339")]
    pub timestamp: DateTime<Utc>,
    /// Whole seconds since the server was built.
    pub uptime_secs: u64,
    /// Registered subscribers.
    pub connections: usize,
}

impl HealthResponse {
    /// Snapshot taken now.
    pub fn snapshot(started: Instant, connections: usize) -> Self {
        Self {
            status: "ok",
            timestamp: Utc::now(),
            uptime_secs: started.elapsed().as_secs(),
            connections,
        }
    }
}

fn rfc3339<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}
