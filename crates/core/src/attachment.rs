use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::MessageId;

/// An attachment carried on a `Message` or `QueuedMessage`.
///
/// Fields mirror the original queue injector's attachment dict
/// (`id`, `message_id`, `file_url`, `file_type`, `filename`, `created_at`).
/// File upload itself is out of scope; this is the reference the streaming
/// pipeline threads through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    pub file_url: String,
    pub file_type: String,
    pub filename: String,
    pub created_at: DateTime<Utc>,
}

impl Attachment {
    #[must_use]
    pub fn new(file_url: impl Into<String>, file_type: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_id: None,
            file_url: file_url.into(),
            file_type: file_type.into(),
            filename: filename.into(),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_message_id(mut self, message_id: MessageId) -> Self {
        self.message_id = Some(message_id);
        self
    }
}
