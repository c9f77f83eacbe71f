//! Text analysis client with graceful fallback.

use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use nexus_core::{AnalysisError, AnalysisMetrics};
use nexus_settings::AnalysisSettings;

use crate::backend::AnalysisBackend;
use crate::{
    BACKEND_ANALYSIS, ClientBuildError, UPSTREAM_DURATION_SECONDS, UPSTREAM_ERRORS_TOTAL, UPSTREAM_REQUESTS_TOTAL,
};

#[derive(Serialize)]
struct AnalyzeBody<'a> {
    text: &'a str,
    project: &'a str,
    group: &'a str,
    analysis_slug: &'a str,
    full_metrics: bool,
    language: &'a str,
}

/// Absent and `null` fields both take the neutral default.
#[derive(Deserialize)]
struct AnalyzeResponse {
    is_ai_generated: Option<bool>,
    human_likeness_score: Option<f64>,
    metrics: Option<BTreeMap<String, Value>>,
}

/// Client for the analysis endpoint. One attempt per call.
pub struct AnalysisClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    project: String,
    group: String,
    analysis_slug: String,
    language: String,
}

impl AnalysisClient {
    /// Build a client from settings.
    pub fn new(
        api_key: impl Into<String>,
        settings: &AnalysisSettings,
    ) -> Result<Self, ClientBuildError> {
        Ok(Self {
            http: crate::build_http_client(BACKEND_ANALYSIS, settings.timeout())?,
            url: settings.url.clone(),
            api_key: api_key.into(),
            project: settings.project.clone(),
            group: settings.group.clone(),
            analysis_slug: settings.analysis_slug.clone(),
            language: settings.language.clone(),
        })
    }

    /// Analyze `text`, reporting failures as errors instead of fallbacks.
    pub async fn try_analyze(&self, text: &str) -> Result<AnalysisMetrics, AnalysisError> {
        if text.trim().is_empty() {
            return Err(AnalysisError::EmptyInput);
        }

        let body = AnalyzeBody {
            text,
            project: &self.project,
            group: &self.group,
            analysis_slug: &self.analysis_slug,
            full_metrics: true,
            language: &self.language,
        };

        counter!(UPSTREAM_REQUESTS_TOTAL, "backend" => BACKEND_ANALYSIS).increment(1);
        let started = Instant::now();
        let result = self.send(&body).await;
        histogram!(UPSTREAM_DURATION_SECONDS, "backend" => BACKEND_ANALYSIS)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn send(&self, body: &AnalyzeBody<'_>) -> Result<AnalysisMetrics, AnalysisError> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;
        let parsed: AnalyzeResponse = serde_json::from_slice(&bytes)
            .map_err(|e| AnalysisError::InvalidResponse(e.to_string()))?;

        Ok(AnalysisMetrics::success(
            parsed.is_ai_generated.unwrap_or_default(),
            parsed.human_likeness_score.unwrap_or_default(),
            parsed.metrics.unwrap_or_default(),
        ))
    }
}

#[async_trait]
impl AnalysisBackend for AnalysisClient {
    async fn analyze(&self, text: &str) -> AnalysisMetrics {
        match self.try_analyze(text).await {
            Ok(metrics) => metrics,
            Err(AnalysisError::EmptyInput) => {
                debug!("skipping analysis of empty completion");
                AnalysisMetrics::fallback(AnalysisError::EmptyInput.to_string())
            }
            Err(e) => {
                let kind = match &e {
                    AnalysisError::Status { status, body } => {
                        error!(status, body = %body, "analysis backend returned error");
                        "status"
                    }
                    AnalysisError::Transport(_) => {
                        error!(error = %e, "analysis backend unreachable");
                        "transport"
                    }
                    AnalysisError::InvalidResponse(_) | AnalysisError::EmptyInput => {
                        error!(error = %e, "analysis response undecodable");
                        "invalid_response"
                    }
                };
                counter!(UPSTREAM_ERRORS_TOTAL, "backend" => BACKEND_ANALYSIS, "kind" => kind)
                    .increment(1);
                AnalysisMetrics::fallback(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_core::AnalysisStatus;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer) -> AnalysisSettings {
        AnalysisSettings {
            url: format!("{}/analyze", server.uri()),
            ..AnalysisSettings::default()
        }
    }

    #[tokio::test]
    async fn success_reads_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/analyze"))
            .and(header("authorization", "Bearer neo-key"))
            .and(body_json(serde_json::json!({
                "text": "world",
                "project": "neoapi",
                "group": "playground",
                "analysis_slug": "playground",
                "full_metrics": true,
                "language": "auto"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "is_ai_generated": true,
                "human_likeness_score": 0.42,
                "metrics": {"perplexity": 17.0}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = AnalysisClient::new("neo-key", &settings(&server)).unwrap();
        let metrics = client.analyze("world").await;
        assert_eq!(metrics.status, AnalysisStatus::Success);
        assert!(metrics.is_ai_generated);
        assert!((metrics.human_likeness_score - 0.42).abs() < f64::EPSILON);
        assert_eq!(metrics.metrics["perplexity"], 17.0);
    }

    #[tokio::test]
    async fn missing_fields_default() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = AnalysisClient::new("k", &settings(&server)).unwrap();
        let metrics = client.analyze("world").await;
        assert_eq!(metrics.status, AnalysisStatus::Success);
        assert!(!metrics.is_ai_generated);
        assert!(metrics.metrics.is_empty());
    }

    #[tokio::test]
    async fn null_fields_default_like_missing_ones() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "is_ai_generated": null,
                "human_likeness_score": null,
                "metrics": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = AnalysisClient::new("k", &settings(&server)).unwrap();
        let metrics = client.try_analyze("world").await.unwrap();
        assert_eq!(metrics.status, AnalysisStatus::Success);
        assert!(!metrics.is_ai_generated);
        assert!(metrics.human_likeness_score.abs() < f64::EPSILON);
        assert!(metrics.metrics.is_empty());
    }

    #[tokio::test]
    async fn empty_text_skips_backend() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = AnalysisClient::new("k", &settings(&server)).unwrap();
        let metrics = client.analyze("   ").await;
        assert!(metrics.is_fallback());
        assert_eq!(metrics.error.as_deref(), Some("empty completion text"));
    }

    #[tokio::test]
    async fn error_status_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(2)
            .mount(&server)
            .await;

        let client = AnalysisClient::new("k", &settings(&server)).unwrap();
        let err = client.try_analyze("world").await.unwrap_err();
        assert!(matches!(err, AnalysisError::Status { status: 500, .. }));

        let metrics = client.analyze("world").await;
        assert!(metrics.is_fallback());
        assert!(!metrics.is_ai_generated);
    }

    #[tokio::test]
    async fn undecodable_body_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = AnalysisClient::new("k", &settings(&server)).unwrap();
        assert!(matches!(
            client.try_analyze("world").await,
            Err(AnalysisError::InvalidResponse(_))
        ));
        assert!(client.analyze("world").await.is_fallback());
    }

    #[tokio::test]
    async fn unreachable_backend_falls_back() {
        let settings = AnalysisSettings {
            url: "http://127.0.0.1:1/analyze".into(),
            ..AnalysisSettings::default()
        };
        let client = AnalysisClient::new("k", &settings).unwrap();
        let metrics = client.analyze("world").await;
        assert!(metrics.is_fallback());
        assert!(metrics.error.unwrap().contains("unreachable"));
    }
}
