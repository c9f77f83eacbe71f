//! Settings types.
//!
//! All structs use `camelCase` keys in the settings file and fill missing keys
//! from their `Default` impl.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NexusSettings {
    /// Listeners and subscriber connection tuning.
    pub server: ServerSettings,
    /// Completion backend.
    pub completion: CompletionSettings,
    /// Analysis backend.
    pub analysis: AnalysisSettings,
    /// Background analysis queue.
    pub dispatch: DispatchSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// Optional Telegram bot front end.
    pub telegram: TelegramSettings,
}

/// Listener and subscriber settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address for both listeners.
    pub host: String,
    /// Chat/health HTTP port. Required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_port: Option<u16>,
    /// Subscriber WebSocket port. Required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_port: Option<u16>,
    /// Interval between WebSocket pings in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Drop a subscriber after this long without a pong, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Per-subscriber outbound queue depth.
    pub send_queue_capacity: usize,
    /// How long shutdown waits for in-flight work, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: None,
            ws_port: None,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            send_queue_capacity: 64,
            shutdown_timeout_ms: 10_000,
        }
    }
}

/// Completion backend settings (OpenAI-compatible chat completions).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletionSettings {
    /// Bearer credential. Required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// API base URL; `/chat/completions` is appended.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum completion tokens.
    pub max_tokens: u32,
    /// Per-attempt request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Fixed delay between attempts in milliseconds.
    pub retry_backoff_ms: u64,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "mixtral-8x7b-32768".to_string(),
            temperature: 0.7,
            max_tokens: 1000,
            timeout_ms: 30_000,
            max_attempts: 3,
            retry_backoff_ms: 1000,
        }
    }
}

/// Analysis backend settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisSettings {
    /// Bearer credential. Required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Full analyze endpoint URL.
    pub url: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Project name sent with each request.
    pub project: String,
    /// Group name sent with each request.
    pub group: String,
    /// Analysis profile slug.
    pub analysis_slug: String,
    /// Language hint; `auto` lets the backend detect it.
    pub language: String,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            url: "https://api.neoapi.ai/analyze".to_string(),
            timeout_ms: 30_000,
            project: "neoapi".to_string(),
            group: "playground".to_string(),
            analysis_slug: "playground".to_string(),
            language: "auto".to_string(),
        }
    }
}

/// Background analysis queue settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchSettings {
    /// Jobs waiting beyond this are rejected.
    pub queue_capacity: usize,
    /// Analyses running at once.
    pub max_concurrent: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_concurrent: 8,
        }
    }
}

/// Log output settings. `RUST_LOG` takes precedence over `level`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level filter.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Telegram bot webhook settings. The adapter is off unless a bot token is set.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelegramSettings {
    /// Bot token issued by BotFather.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,
    /// Bot API base URL; `/bot<token>/<method>` is appended.
    pub api_base: String,
    /// Public URL Telegram should deliver updates to. When set, the relay
    /// registers it on startup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Bot API request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_base: "https://api.telegram.org".to_string(),
            webhook_url: None,
            timeout_ms: 10_000,
        }
    }
}

impl TelegramSettings {
    /// Bot token, if the adapter is enabled.
    pub fn bot_token(&self) -> Option<&str> {
        non_empty(self.bot_token.as_deref())
    }

    /// Webhook URL to register, if any.
    pub fn webhook_url(&self) -> Option<&str> {
        non_empty(self.webhook_url.as_deref())
    }

    /// Bot API request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl NexusSettings {
    /// Completion credential.
    pub fn completion_api_key(&self) -> Result<&str> {
        non_empty(self.completion.api_key.as_deref()).ok_or(SettingsError::Missing("GROQ_API_KEY"))
    }

    /// Analysis credential.
    pub fn analysis_api_key(&self) -> Result<&str> {
        non_empty(self.analysis.api_key.as_deref()).ok_or(SettingsError::Missing("NEO_API_KEY"))
    }

    /// Chat/health HTTP port.
    pub fn http_port(&self) -> Result<u16> {
        self.server
            .http_port
            .ok_or(SettingsError::Missing("NEXUS_HTTP_PORT"))
    }

    /// Subscriber WebSocket port.
    pub fn ws_port(&self) -> Result<u16> {
        self.server
            .ws_port
            .ok_or(SettingsError::Missing("NEXUS_WS_PORT"))
    }

    /// Check that every required value is present and the rest are sane.
    pub fn validate(&self) -> Result<()> {
        let _ = self.completion_api_key()?;
        let _ = self.analysis_api_key()?;
        let http_port = self.http_port()?;
        let ws_port = self.ws_port()?;

        if http_port != 0 && http_port == ws_port {
            return Err(SettingsError::InvalidValue(format!(
                "httpPort and wsPort must differ (both {http_port})"
            )));
        }
        if self.dispatch.queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "queueCapacity must be at least 1".into(),
            ));
        }
        if self.dispatch.max_concurrent == 0 {
            return Err(SettingsError::InvalidValue(
                "maxConcurrent must be at least 1".into(),
            ));
        }
        if self.server.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "sendQueueCapacity must be at least 1".into(),
            ));
        }
        if self.server.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "heartbeatIntervalMs must be at least 1".into(),
            ));
        }
        if self.server.heartbeat_timeout_ms < self.server.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(
                "heartbeatTimeoutMs must not be shorter than heartbeatIntervalMs".into(),
            ));
        }
        if self.telegram.webhook_url().is_some() && self.telegram.bot_token().is_none() {
            return Err(SettingsError::Missing("TELEGRAM_BOT_TOKEN"));
        }
        if !(0.0..=2.0).contains(&self.completion.temperature) {
            return Err(SettingsError::InvalidValue(format!(
                "temperature {} outside 0.0..=2.0",
                self.completion.temperature
            )));
        }
        Ok(())
    }
}

impl CompletionSettings {
    /// Per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay between attempts.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl AnalysisSettings {
    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
