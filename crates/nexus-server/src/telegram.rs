//! Telegram webhook: each text message becomes a chat request, and the
//! completion is sent back to the same chat.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use metrics::counter;
use nexus_core::{ChatRequest, RelayError};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::metrics::TELEGRAM_UPDATES_TOTAL;
use crate::server::AppState;

/// Sent to the chat when the completion backend fails.
pub const MALFUNCTION_REPLY: &str = "Neural interface malfunction";

/// Route Telegram delivers updates to.
pub const WEBHOOK_PATH: &str = "/getmemore";

/// The slice of a Bot API `Update` the relay reads. Everything else
/// (edits, callbacks, channel posts) is ignored.
#[derive(Debug, Deserialize)]
pub struct Update {
    /// Update sequence number.
    #[serde(default)]
    pub update_id: i64,
    /// New incoming message, if this update carries one.
    pub message: Option<IncomingMessage>,
}

/// Incoming Telegram message.
#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    /// Chat the message came from.
    pub chat: Chat,
    /// Text body; absent for stickers, photos and the like.
    pub text: Option<String>,
}

/// Telegram chat reference.
#[derive(Debug, Deserialize)]
pub struct Chat {
    /// Chat identifier replies are addressed to.
    pub id: i64,
}

/// POST /getmemore
///
/// Answers 200 for every decodable update so Telegram does not redeliver it;
/// reply failures are logged. An undecodable body gets 400.
pub async fn telegram_webhook_handler(
    State(state): State<AppState>,
    payload: Result<Json<Update>, JsonRejection>,
) -> StatusCode {
    let Some(bot) = state.telegram.as_ref() else {
        return StatusCode::NOT_FOUND;
    };
    let update = match payload {
        Ok(Json(update)) => update,
        Err(rejection) => {
            warn!(error = %rejection, "rejected telegram update");
            counter!(TELEGRAM_UPDATES_TOTAL, "outcome" => "invalid").increment(1);
            return StatusCode::BAD_REQUEST;
        }
    };

    let Some((chat_id, text)) = update
        .message
        .and_then(|m| m.text.map(|text| (m.chat.id, text)))
    else {
        debug!(update_id = update.update_id, "telegram update without text");
        counter!(TELEGRAM_UPDATES_TOTAL, "outcome" => "ignored").increment(1);
        return StatusCode::OK;
    };
    info!(update_id = update.update_id, chat_id, "telegram message received");

    let reply = match state.coordinator.handle(ChatRequest::new(text)).await {
        Ok(reply) => reply.message,
        Err(RelayError::Validation(e)) => {
            debug!(chat_id, error = %e, "telegram message not relayed");
            counter!(TELEGRAM_UPDATES_TOTAL, "outcome" => "ignored").increment(1);
            return StatusCode::OK;
        }
        Err(RelayError::Upstream(e)) => {
            error!(chat_id, kind = e.error_kind(), error = %e, "telegram chat request failed");
            MALFUNCTION_REPLY.to_string()
        }
    };

    let outcome = match bot.send_message(chat_id, &reply).await {
        Ok(()) => "replied",
        Err(e) => {
            error!(chat_id, error = %e, "telegram reply not delivered");
            "reply_failed"
        }
    };
    counter!(TELEGRAM_UPDATES_TOTAL, "outcome" => outcome).increment(1);
    StatusCode::OK
}
