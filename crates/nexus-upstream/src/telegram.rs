//! Telegram Bot API client: replies to chats and webhook registration.
//!
//! The bot token is part of every request path, so URLs are stripped from
//! transport errors before they are logged or returned.

use std::time::Instant;

use metrics::{counter, histogram};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use nexus_settings::TelegramSettings;

use crate::{
    BACKEND_TELEGRAM, ClientBuildError, UPSTREAM_DURATION_SECONDS, UPSTREAM_ERRORS_TOTAL,
    UPSTREAM_REQUESTS_TOTAL,
};

/// Bot API call failure.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TelegramError {
    /// The API answered `ok: false` or a non-success status.
    #[error("telegram {method} failed ({status}): {description}")]
    Rejected {
        /// Bot API method name.
        method: &'static str,
        /// HTTP status code.
        status: u16,
        /// The API's `description`, or the raw body.
        description: String,
    },
    /// Bot API unreachable.
    #[error("telegram {method} unreachable: {reason}")]
    Transport {
        /// Bot API method name.
        method: &'static str,
        /// Underlying failure, without the request URL.
        reason: String,
    },
    /// The API answered with a body that is not a Bot API envelope.
    #[error("invalid telegram {method} response: {reason}")]
    InvalidResponse {
        /// Bot API method name.
        method: &'static str,
        /// Decode failure.
        reason: String,
    },
}

impl TelegramError {
    /// Short classification string for metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => "status",
            Self::Transport { .. } => "transport",
            Self::InvalidResponse { .. } => "invalid_response",
        }
    }
}

/// Outcome of [`TelegramClient::ensure_webhook`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WebhookChange {
    /// The bot already delivered to the wanted URL.
    Unchanged,
    /// The webhook was (re)registered.
    Registered,
}

#[derive(Deserialize)]
struct Envelope<T> {
    ok: bool,
    description: Option<String>,
    result: Option<T>,
}

#[derive(Default, Deserialize)]
struct WebhookInfo {
    #[serde(default)]
    url: String,
}

#[derive(Serialize)]
struct SendMessageBody<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Serialize)]
struct SetWebhookBody<'a> {
    url: &'a str,
}

/// Client for `{api_base}/bot{token}/{method}`.
pub struct TelegramClient {
    http: reqwest::Client,
    base: String,
}

impl TelegramClient {
    /// Build a client for the bot identified by `token`.
    pub fn new(token: &str, settings: &TelegramSettings) -> Result<Self, ClientBuildError> {
        Ok(Self {
            http: crate::build_http_client(BACKEND_TELEGRAM, settings.timeout())?,
            base: format!("{}/bot{token}", settings.api_base.trim_end_matches('/')),
        })
    }

    /// Post `text` to `chat_id`.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        let _: serde_json::Value = self
            .call("sendMessage", Some(&SendMessageBody { chat_id, text }))
            .await?;
        debug!(chat_id, chars = text.len(), "telegram reply sent");
        Ok(())
    }

    /// URL updates are currently delivered to; empty when none is set.
    pub async fn webhook_url(&self) -> Result<String, TelegramError> {
        let info: WebhookInfo = self.call::<(), _>("getWebhookInfo", None).await?;
        Ok(info.url)
    }

    /// Point update delivery at `url`.
    pub async fn set_webhook(&self, url: &str) -> Result<(), TelegramError> {
        let _: bool = self.call("setWebhook", Some(&SetWebhookBody { url })).await?;
        Ok(())
    }

    /// Register `url` unless it is already the bot's webhook.
    pub async fn ensure_webhook(&self, url: &str) -> Result<WebhookChange, TelegramError> {
        if self.webhook_url().await? == url {
            info!(url, "telegram webhook already registered");
            return Ok(WebhookChange::Unchanged);
        }
        self.set_webhook(url).await?;
        info!(url, "telegram webhook registered");
        Ok(WebhookChange::Registered)
    }

    async fn call<B, T>(&self, method: &'static str, body: Option<&B>) -> Result<T, TelegramError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned + Default,
    {
        counter!(UPSTREAM_REQUESTS_TOTAL, "backend" => BACKEND_TELEGRAM).increment(1);
        let started = Instant::now();
        let result = self.send(method, body).await;
        histogram!(UPSTREAM_DURATION_SECONDS, "backend" => BACKEND_TELEGRAM)
            .record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            counter!(UPSTREAM_ERRORS_TOTAL, "backend" => BACKEND_TELEGRAM, "kind" => e.error_kind())
                .increment(1);
        }
        result
    }

    async fn send<B, T>(&self, method: &'static str, body: Option<&B>) -> Result<T, TelegramError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned + Default,
    {
        let url = format!("{}/{method}", self.base);
        let request = match body {
            Some(body) => self.http.post(url).json(body),
            None => self.http.get(url),
        };
        let transport = |e: reqwest::Error| TelegramError::Transport {
            method,
            reason: e.without_url().to_string(),
        };

        let response = request.send().await.map_err(transport)?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(transport)?;

        match serde_json::from_slice::<Envelope<T>>(&bytes) {
            Ok(envelope) if envelope.ok && (200..300).contains(&status) => {
                Ok(envelope.result.unwrap_or_default())
            }
            Ok(envelope) => Err(TelegramError::Rejected {
                method,
                status,
                description: envelope.description.unwrap_or_default(),
            }),
            Err(_) if !(200..300).contains(&status) => Err(TelegramError::Rejected {
                method,
                status,
                description: String::from_utf8_lossy(&bytes).into_owned(),
            }),
            Err(e) => Err(TelegramError::InvalidResponse {
                method,
                reason: e.to_string(),
            }),
        }
    }
}
