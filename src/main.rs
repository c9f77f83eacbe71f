//! # nexus-relay
//!
//! Relay binary: loads settings, wires the upstream clients into the server
//! and runs both listeners until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use nexus_server::config::ServerConfig;
use nexus_server::server::RelayServer;
use nexus_settings::NexusSettings;
use nexus_telemetry::TelemetryConfig;
use nexus_upstream::{AnalysisClient, CompletionClient, TelegramClient};

/// Chat relay with background analysis and `WebSocket` metrics fan-out.
#[derive(Parser, Debug)]
#[command(name = "nexus-relay", about = "Nexus chat relay server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Settings file (default `~/.nexus/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level (overrides settings; `RUST_LOG` still wins).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Fold flag overrides into loaded settings.
    fn apply(&self, settings: &mut NexusSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(nexus_settings::settings_path);
    let mut settings = nexus_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);
    settings.validate().context("Invalid configuration")?;

    let telemetry =
        TelemetryConfig::from_level_name(&settings.logging.level, settings.logging.json)
            .context("Invalid log level")?;
    nexus_telemetry::init_telemetry(&telemetry).context("Failed to initialize logging")?;

    let metrics_handle =
        nexus_server::metrics::install_recorder().context("Failed to install metrics recorder")?;

    let completion = CompletionClient::new(settings.completion_api_key()?, &settings.completion)
        .context("Failed to create completion client")?;
    let analysis = AnalysisClient::new(settings.analysis_api_key()?, &settings.analysis)
        .context("Failed to create analysis client")?;
    tracing::info!(
        completion_endpoint = completion.endpoint(),
        model = %settings.completion.model,
        analysis_url = %settings.analysis.url,
        "upstream clients ready"
    );

    let config = ServerConfig::from_settings(&settings)?;
    let mut server = RelayServer::new(
        config,
        Arc::new(completion),
        Arc::new(analysis),
        metrics_handle,
    );
    if let Some(token) = settings.telegram.bot_token() {
        let bot = TelegramClient::new(token, &settings.telegram)
            .context("Failed to create Telegram client")?;
        if let Some(url) = settings.telegram.webhook_url() {
            if let Err(e) = bot.ensure_webhook(url).await {
                tracing::error!(error = %e, "Telegram webhook registration failed");
            }
        }
        server = server.with_telegram(Arc::new(bot));
        tracing::info!("Telegram webhook enabled");
    }
    let handle = server.listen().await.context("Failed to bind listeners")?;

    tracing::info!(
        "Nexus relay listening: chat on http://{}, subscribers on ws://{}",
        handle.http_addr,
        handle.ws_addr
    );

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if !server.shutdown_gracefully().await {
        tracing::warn!("shutdown timed out");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
