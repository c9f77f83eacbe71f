//! # nexus-server
//!
//! Axum gateway for the Nexus relay.
//!
//! - HTTP listener: `POST /chat` (and `POST /`), `GET /health`, `GET /metrics`
//! - Optional `POST /getmemore` Telegram webhook on the HTTP listener
//! - `WebSocket` listener on a separate port: subscribers receive one metrics
//!   frame per analyzed completion
//! - [`coordinator::RelayCoordinator`] answers chat requests and hands the
//!   completion to the bounded [`dispatch::AnalysisQueue`]
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod chat;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod telegram;
pub mod websocket;
