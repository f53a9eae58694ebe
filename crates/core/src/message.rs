use serde::{Deserialize, Serialize};

use crate::attachment::Attachment;
use crate::ids::{ChatId, MessageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Lifecycle of an assistant message. A terminal status is never downgraded
/// back to `InProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    InProgress,
    Completed,
    Interrupted,
    Failed,
}

impl StreamStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, StreamStatus::InProgress)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub role: MessageRole,
    /// Plain text for `User`; a JSON-serialized `Vec<StreamEvent>` for
    /// `Assistant`.
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// `Some` only for assistant messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_status: Option<StreamStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Message {
    #[must_use]
    pub fn user(chat_id: ChatId, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            chat_id,
            role: MessageRole::User,
            content: content.into(),
            model_id: None,
            stream_status: None,
            total_cost_usd: None,
            session_id: None,
            checkpoint_id: None,
            attachments: Vec::new(),
        }
    }

    #[must_use]
    pub fn assistant_in_progress(chat_id: ChatId, model_id: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            chat_id,
            role: MessageRole::Assistant,
            content: String::new(),
            model_id: Some(model_id.into()),
            stream_status: Some(StreamStatus::InProgress),
            total_cost_usd: None,
            session_id: None,
            checkpoint_id: None,
            attachments: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Transition an assistant message to a terminal status. No-op (keeps
    /// the existing status) once already terminal, per the invariant that a
    /// terminal `stream_status` is never downgraded back to `in_progress`
    /// and is reached exactly once.
    pub fn finalize(&mut self, status: StreamStatus, content: String, total_cost_usd: Option<f64>) {
        if self.stream_status.is_some_and(StreamStatus::is_terminal) {
            return;
        }
        self.stream_status = Some(status);
        self.content = content;
        self.total_cost_usd = total_cost_usd;
    }
}
