use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attachment::Attachment;
use crate::ids::QueuedMessageId;

/// Maximum number of messages a single chat's queue may hold.
pub const MAX_QUEUE_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    Plan,
    Ask,
    Auto,
}

/// A prompt waiting to be injected into an active stream. Transient: lives
/// only in the per-chat Redis-backed queue, never in the relational store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: QueuedMessageId,
    pub content: String,
    pub model_id: String,
    pub permission_mode: PermissionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_mode: Option<String>,
    pub queued_at: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl QueuedMessage {
    #[must_use]
    pub fn new(content: impl Into<String>, model_id: impl Into<String>, permission_mode: PermissionMode) -> Self {
        Self {
            id: QueuedMessageId::new(),
            content: content.into(),
            model_id: model_id.into(),
            permission_mode,
            thinking_mode: None,
            queued_at: Utc::now(),
            attachments: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_thinking_mode(mut self, thinking_mode: impl Into<String>) -> Self {
        self.thinking_mode = Some(thinking_mode.into());
        self
    }

    #[must_use]
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Concatenate additional content with a newline and merge attachments,
    /// matching `append_to_message`'s exact semantics.
    pub fn append(&mut self, content: &str, attachments: Vec<Attachment>) {
        self.content.push('\n');
        self.content.push_str(content);
        self.attachments.extend(attachments);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_concatenates_with_newline() {
        let mut message = QueuedMessage::new("first", "claude-3", PermissionMode::Auto);
        message.append("second", vec![]);
        assert_eq!(message.content, "first\nsecond");
    }

    #[test]
    fn append_merges_attachments() {
        let mut message = QueuedMessage::new("first", "claude-3", PermissionMode::Auto)
            .with_attachments(vec![Attachment::new("url1", "image/png", "a.png")]);
        message.append("second", vec![Attachment::new("url2", "image/png", "b.png")]);
        assert_eq!(message.attachments.len(), 2);
    }

    #[test]
    fn max_queue_size_is_positive() {
        assert!(MAX_QUEUE_SIZE > 0);
    }
}
