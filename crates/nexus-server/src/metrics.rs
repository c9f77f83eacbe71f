//! Metric names and the Prometheus recorder behind `GET /metrics`.

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup before any metrics are recorded; a second call fails.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Chat requests total (counter).
pub const CHAT_REQUESTS_TOTAL: &str = "chat_requests_total";
/// Chat requests that failed (counter, labels: kind).
pub const CHAT_ERRORS_TOTAL: &str = "chat_errors_total";
/// Chat request duration seconds (histogram).
pub const CHAT_REQUEST_DURATION_SECONDS: &str = "chat_request_duration_seconds";
/// Analysis jobs accepted by the queue (counter).
pub const ANALYSIS_JOBS_SUBMITTED_TOTAL: &str = "analysis_jobs_submitted_total";
/// Analysis jobs rejected because the queue was full or closed (counter).
pub const ANALYSIS_JOBS_REJECTED_TOTAL: &str = "analysis_jobs_rejected_total";
/// Analysis jobs finished (counter, labels: outcome).
pub const ANALYSIS_JOBS_COMPLETED_TOTAL: &str = "analysis_jobs_completed_total";
/// Analysis jobs currently running (gauge).
pub const ANALYSIS_JOBS_ACTIVE: &str = "analysis_jobs_active";
/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Metrics frames delivered to subscribers (counter).
pub const WS_BROADCAST_DELIVERIES_TOTAL: &str = "ws_broadcast_deliveries_total";
/// Broadcast drops total (counter, labels: reason).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Telegram updates handled (counter, labels: outcome).
pub const TELEGRAM_UPDATES_TOTAL: &str = "telegram_updates_total";

fn describe_metrics() {
    describe_counter!(CHAT_REQUESTS_TOTAL, "Chat requests received");
    describe_counter!(CHAT_ERRORS_TOTAL, "Chat requests answered with an error");
    describe_histogram!(
        CHAT_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Time to answer a chat request"
    );
    describe_counter!(ANALYSIS_JOBS_SUBMITTED_TOTAL, "Analysis jobs queued");
    describe_counter!(ANALYSIS_JOBS_REJECTED_TOTAL, "Analysis jobs rejected");
    describe_counter!(ANALYSIS_JOBS_COMPLETED_TOTAL, "Analysis jobs finished");
    describe_gauge!(ANALYSIS_JOBS_ACTIVE, "Analysis jobs running");
    describe_counter!(WS_CONNECTIONS_TOTAL, "Subscriber connections opened");
    describe_counter!(WS_DISCONNECTIONS_TOTAL, "Subscriber connections closed");
    describe_gauge!(WS_CONNECTIONS_ACTIVE, "Subscriber connections open");
    describe_counter!(WS_BROADCAST_DELIVERIES_TOTAL, "Metrics frames delivered");
    describe_counter!(WS_BROADCAST_DROPS_TOTAL, "Metrics frames not delivered");
    describe_counter!(TELEGRAM_UPDATES_TOTAL, "Telegram updates handled");
    describe_counter!(nexus_upstream::UPSTREAM_REQUESTS_TOTAL, "Backend requests sent");
    describe_counter!(nexus_upstream::UPSTREAM_RETRIES_TOTAL, "Completion retries");
    describe_counter!(nexus_upstream::UPSTREAM_ERRORS_TOTAL, "Backend failures");
    describe_histogram!(
        nexus_upstream::UPSTREAM_DURATION_SECONDS,
        Unit::Seconds,
        "Backend call latency"
    );
}
