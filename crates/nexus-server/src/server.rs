//! `RelayServer`: HTTP and subscriber listeners around one coordinator.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use nexus_upstream::{AnalysisBackend, CompletionBackend, TelegramClient};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::chat::chat_handler;
use crate::config::ServerConfig;
use crate::coordinator::RelayCoordinator;
use crate::dispatch::{AnalysisQueue, QueueConfig};
use crate::health::HealthResponse;
use crate::shutdown::{NamedTask, ShutdownCoordinator};
use crate::telegram::{WEBHOOK_PATH, telegram_webhook_handler};
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::socket::{SocketConfig, WsState, ws_upgrade_handler};

/// Shared state accessible from HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Answers chat requests.
    pub coordinator: Arc<RelayCoordinator>,
    /// Subscriber set, for `/health`.
    pub registry: Arc<ConnectionRegistry>,
    /// When the server started.
    pub start_time: Instant,
    /// Renders `/metrics`.
    pub metrics_handle: PrometheusHandle,
    /// Replies to Telegram chats, when the bot is enabled.
    pub telegram: Option<Arc<TelegramClient>>,
}

/// Bound listener addresses.
#[derive(Clone, Copy, Debug)]
pub struct ServerHandle {
    /// Chat/health listener.
    pub http_addr: SocketAddr,
    /// Subscriber listener.
    pub ws_addr: SocketAddr,
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    coordinator: Arc<RelayCoordinator>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics_handle: PrometheusHandle,
    telegram: Option<Arc<TelegramClient>>,
    tasks: Mutex<Vec<NamedTask>>,
}

impl RelayServer {
    /// Create a server and start its analysis dispatcher. Must be called
    /// inside a tokio runtime.
    pub fn new(
        config: ServerConfig,
        completion: Arc<dyn CompletionBackend>,
        analysis: Arc<dyn AnalysisBackend>,
        metrics_handle: PrometheusHandle,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let (queue, dispatcher) = AnalysisQueue::start(
            analysis,
            Arc::clone(&registry),
            QueueConfig {
                capacity: config.queue_capacity,
                max_concurrent: config.max_concurrent,
            },
            shutdown.token(),
        );

        Self {
            config,
            registry,
            coordinator: Arc::new(RelayCoordinator::new(completion, queue)),
            shutdown,
            start_time: Instant::now(),
            metrics_handle,
            telegram: None,
            tasks: Mutex::new(vec![("analysis_dispatcher", dispatcher)]),
        }
    }

    /// Accept Telegram updates on the HTTP listener and reply through `bot`.
    #[must_use]
    pub fn with_telegram(mut self, bot: Arc<TelegramClient>) -> Self {
        self.telegram = Some(bot);
        self
    }

    /// Router for the chat/health listener.
    pub fn http_router(&self) -> Router {
        let state = AppState {
            coordinator: Arc::clone(&self.coordinator),
            registry: Arc::clone(&self.registry),
            start_time: self.start_time,
            metrics_handle: self.metrics_handle.clone(),
            telegram: self.telegram.clone(),
        };

        let mut router = Router::new()
            .route("/chat", post(chat_handler))
            .route("/", post(chat_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler));
        if self.telegram.is_some() {
            router = router.route(WEBHOOK_PATH, post(telegram_webhook_handler));
        }

        router
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Router for the subscriber listener.
    pub fn ws_router(&self) -> Router {
        let state = WsState {
            registry: Arc::clone(&self.registry),
            config: SocketConfig::from(&self.config),
            shutdown: self.shutdown.token(),
        };

        Router::new()
            .route("/", get(ws_upgrade_handler))
            .route("/ws", get(ws_upgrade_handler))
            .with_state(state)
    }

    /// Bind both listeners and start serving. Returns the bound addresses.
    pub async fn listen(&self) -> std::io::Result<ServerHandle> {
        let host = self.config.host.as_str();
        let http_listener = TcpListener::bind((host, self.config.http_port)).await?;
        let ws_listener = TcpListener::bind((host, self.config.ws_port)).await?;
        let handle = ServerHandle {
            http_addr: http_listener.local_addr()?,
            ws_addr: ws_listener.local_addr()?,
        };

        let http_task = self.serve("http", http_listener, self.http_router());
        let ws_task = self.serve("ws", ws_listener, self.ws_router());
        self.tasks
            .lock()
            .extend([("http_listener", http_task), ("ws_listener", ws_task)]);

        info!(
            http_addr = %handle.http_addr,
            ws_addr = %handle.ws_addr,
            "relay listening"
        );
        Ok(handle)
    }

    fn serve(&self, name: &'static str, listener: TcpListener, app: Router) -> JoinHandle<()> {
        let token = self.shutdown.token();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(listener = name, error = %e, "listener failed");
            }
        })
    }

    /// Stop accepting work, close subscribers, and wait (bounded) for the
    /// listeners and in-flight analyses. Returns `false` if anything had to
    /// be aborted.
    pub async fn shutdown_gracefully(&self) -> bool {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let report = self.shutdown.drain(tasks, self.config.shutdown_timeout).await;
        info!(finished = report.finished, aborted = report.aborted, "relay stopped");
        report.is_clean()
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::snapshot(
        state.start_time,
        state.registry.connection_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    crate::metrics::render(&state.metrics_handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use nexus_core::{AnalysisMetrics, MessageId};
    use nexus_upstream::mock::{MockAnalysis, MockCompletion};
    use tower::ServiceExt;

    struct TestServer {
        server: RelayServer,
        completion: Arc<MockCompletion>,
    }

    fn make_server() -> TestServer {
        let completion = Arc::new(MockCompletion::always("world"));
        let analysis = Arc::new(MockAnalysis::new(AnalysisMetrics::success(
            false,
            0.5,
            BTreeMap::new(),
        )));
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = RelayServer::new(
            ServerConfig::default(),
            completion.clone(),
            analysis,
            handle,
        );
        TestServer { server, completion }
    }

    fn post_chat(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 10_000)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let t = make_server();
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let resp = t.server.http_router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = json_body(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert!(parsed["timestamp"].is_string());
        assert!(parsed["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn chat_returns_fingerprinted_reply() {
        let t = make_server();
        for uri in ["/chat", "/"] {
            let resp = t
                .server
                .http_router()
                .oneshot(post_chat(uri, r#"{"message":"hello"}"#))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            let parsed = json_body(resp).await;
            assert_eq!(parsed["message"], "world");
            assert_eq!(parsed["status"], "success");
            assert_eq!(parsed["id"], MessageId::from_completion("world").as_str());
        }
        assert_eq!(t.completion.call_count(), 2);
    }

    #[tokio::test]
    async fn chat_forwards_system_instruction_and_context() {
        let t = make_server();
        let body = r#"{"message":"again","system_instruction":"be brief","context":[{"role":"user","content":"hi"}]}"#;
        let resp = t
            .server
            .http_router()
            .oneshot(post_chat("/chat", body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let seen = t.completion.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].system_instruction.as_deref(), Some("be brief"));
        assert_eq!(seen[0].context.len(), 1);
    }

    #[tokio::test]
    async fn empty_or_missing_message_is_400() {
        let t = make_server();
        for body in [r#"{"message":""}"#, r#"{"message":"  "}"#, r#"{"wrong_field":"x"}"#] {
            let resp = t
                .server
                .http_router()
                .oneshot(post_chat("/chat", body))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            assert_eq!(json_body(resp).await["error"], "No message provided");
        }
        assert_eq!(t.completion.call_count(), 0);
    }

    #[tokio::test]
    async fn invalid_json_is_400() {
        let t = make_server();
        for body in ["{not json", r#"{"message": 5}"#, "[1,2]"] {
            let resp = t
                .server
                .http_router()
                .oneshot(post_chat("/chat", body))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            assert_eq!(json_body(resp).await["error"], "Invalid JSON format");
        }
        assert_eq!(t.completion.call_count(), 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_text() {
        let t = make_server();
        let req = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let resp = t.server.http_router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let t = make_server();
        let req = Request::builder()
            .uri("/nonexistent")
            .body(Body::empty())
            .unwrap();
        let resp = t.server.http_router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn telegram_route_absent_without_bot() {
        let t = make_server();
        let resp = t
            .server
            .http_router()
            .oneshot(post_chat("/getmemore", r#"{"update_id":1}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ws_route_requires_upgrade() {
        let t = make_server();
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = t.server.ws_router().oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn listen_binds_distinct_ports_and_shuts_down() {
        let t = make_server();
        let handle = t.server.listen().await.unwrap();
        assert_ne!(handle.http_addr.port(), 0);
        assert_ne!(handle.http_addr.port(), handle.ws_addr.port());

        assert!(t.server.shutdown_gracefully().await);
        assert!(t.server.shutdown().is_shutting_down());
    }
}
