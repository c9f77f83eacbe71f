//! Inbound chat request and the synchronous reply.

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;
use crate::message_id::MessageId;

/// Speaker of a conversation turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instruction turn placed ahead of the conversation.
    System,
    /// End-user turn.
    User,
    /// Model turn.
    Assistant,
}

/// One prior turn of a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Who spoke.
    pub role: ChatRole,
    /// What was said.
    pub content: String,
}

impl ChatTurn {
    /// Build a turn.
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Body of `POST /chat`.
///
/// A missing `message` deserializes to an empty string so that it is
/// rejected by [`ChatRequest::validate`] with the same error as `""`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The user message to complete.
    #[serde(default)]
    pub message: String,
    /// Optional system instruction, sent ahead of `context`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    /// Prior conversation turns, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<ChatTurn>,
}

impl ChatRequest {
    /// Request carrying only a user message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Attach a system instruction.
    #[must_use]
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    /// Attach prior turns.
    #[must_use]
    pub fn with_context(mut self, context: Vec<ChatTurn>) -> Self {
        self.context = context;
        self
    }

    /// Reject empty or whitespace-only messages.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.message.trim().is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        Ok(())
    }

    /// Full turn list sent upstream: system instruction, context, then the
    /// user message.
    pub fn turns(&self) -> Vec<ChatTurn> {
        let mut turns = Vec::with_capacity(self.context.len() + 2);
        if let Some(instruction) = self.system_instruction.as_deref().filter(|s| !s.is_empty()) {
            turns.push(ChatTurn::new(ChatRole::System, instruction));
        }
        turns.extend(self.context.iter().cloned());
        turns.push(ChatTurn::new(ChatRole::User, self.message.clone()));
        turns
    }
}

/// Reply returned to the caller once the completion is available.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    /// Fingerprint of `message`; subscribers see the same id.
    pub id: MessageId,
    /// Completion text.
    pub message: String,
    /// Always `"success"`; failures use the error body instead.
    pub status: String,
}

impl ChatReply {
    /// Successful reply for a completion.
    pub fn success(id: MessageId, message: String) -> Self {
        Self {
            id,
            message,
            status: "success".into(),
        }
    }
}
