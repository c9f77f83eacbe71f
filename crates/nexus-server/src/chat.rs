//! `POST /chat` handler and error mapping.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use nexus_core::{ChatReply, ChatRequest, RelayError, ValidationError};
use serde::Serialize;
use tracing::{debug, error};

use crate::server::AppState;

/// Error body: `{"error": "..."}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Human-readable reason.
    pub error: String,
}

/// [`RelayError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub RelayError);

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        Self(e)
    }
}

impl ApiError {
    /// Status code for this error.
    pub fn status(&self) -> StatusCode {
        match self.0 {
            RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            RelayError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// POST /chat (also mounted at `/`).
pub async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        debug!(error = %rejection, "rejected chat body");
        ApiError(ValidationError::InvalidJson.into())
    })?;

    match state.coordinator.handle(request).await {
        Ok(reply) => Ok(Json(reply)),
        Err(e) => {
            if let RelayError::Upstream(upstream) = &e {
                error!(kind = upstream.error_kind(), error = %upstream, "chat request failed");
            }
            Err(ApiError(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_core::UpstreamError;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn validation_maps_to_400() {
        let resp = ApiError(ValidationError::EmptyMessage.into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"], "No message provided");

        let resp = ApiError(ValidationError::InvalidJson.into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"], "Invalid JSON format");
    }

    #[tokio::test]
    async fn upstream_maps_to_500() {
        let err = RelayError::Upstream(UpstreamError::Transport("connection refused".into()));
        let resp = ApiError::from(err).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("connection refused"));
    }
}
