//! OpenAI-compatible chat completion client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use nexus_core::{ChatRequest, ChatTurn, RetryConfig, UpstreamError};
use nexus_settings::CompletionSettings;

use crate::backend::CompletionBackend;
use crate::{
    BACKEND_COMPLETION, ClientBuildError, UPSTREAM_DURATION_SECONDS, UPSTREAM_ERRORS_TOTAL,
    UPSTREAM_REQUESTS_TOTAL, UPSTREAM_RETRIES_TOTAL,
};

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: Vec<ChatTurn>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Client for `POST {base_url}/chat/completions`.
///
/// Cheap to share behind an `Arc`: holds a pooled `reqwest::Client` and
/// immutable settings only.
pub struct CompletionClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    retry: RetryConfig,
}

impl CompletionClient {
    /// Build a client from settings. Retries follow `max_attempts` and
    /// `retry_backoff_ms`.
    pub fn new(
        api_key: impl Into<String>,
        settings: &CompletionSettings,
    ) -> Result<Self, ClientBuildError> {
        Ok(Self {
            http: crate::build_http_client(BACKEND_COMPLETION, settings.timeout())?,
            endpoint: format!(
                "{}/chat/completions",
                settings.base_url.trim_end_matches('/')
            ),
            api_key: api_key.into(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            retry: RetryConfig {
                max_attempts: settings.max_attempts,
                backoff: settings.retry_backoff(),
            },
        })
    }

    /// Override the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Full URL requests are sent to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn attempt(&self, body: &CompletionBody<'_>) -> Result<String, UpstreamError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        let parsed: CompletionResponse = serde_json::from_slice(&bytes)
            .map_err(|e| UpstreamError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                UpstreamError::InvalidResponse("missing choices[0].message.content".into())
            })
    }
}

#[async_trait]
impl CompletionBackend for CompletionClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, UpstreamError> {
        let body = CompletionBody {
            model: &self.model,
            messages: request.turns(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut attempt = 1;
        loop {
            counter!(UPSTREAM_REQUESTS_TOTAL, "backend" => BACKEND_COMPLETION).increment(1);
            let started = Instant::now();
            let result = self.attempt(&body).await;
            histogram!(UPSTREAM_DURATION_SECONDS, "backend" => BACKEND_COMPLETION)
                .record(started.elapsed().as_secs_f64());

            match result {
                Ok(text) => {
                    debug!(attempt, chars = text.len(), "completion received");
                    return Ok(text);
                }
                Err(e) if e.is_retryable() && self.retry.has_next(attempt) => {
                    counter!(UPSTREAM_RETRIES_TOTAL, "backend" => BACKEND_COMPLETION)
                        .increment(1);
                    warn!(
                        attempt,
                        max_attempts = self.retry.attempts(),
                        delay_ms = duration_ms(self.retry.backoff),
                        error = %e,
                        "retrying completion after error"
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    counter!(
                        UPSTREAM_ERRORS_TOTAL,
                        "backend" => BACKEND_COMPLETION,
                        "kind" => e.error_kind()
                    )
                    .increment(1);
                    error!(attempt, kind = e.error_kind(), error = %e, "completion failed");
                    return Err(e);
                }
            }
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
