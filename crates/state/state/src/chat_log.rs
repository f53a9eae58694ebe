use async_trait::async_trait;
use chatflow_core::{ChatId, QueuedMessage};
use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// The kind of a shared-log entry, per the External Interfaces contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEntryKind {
    Content,
    Error,
    Complete,
    QueueInjected,
}

/// One entry of the per-chat append-only stream log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub kind: LogEntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl LogEntry {
    #[must_use]
    pub fn content(event: serde_json::Value) -> Self {
        Self {
            kind: LogEntryKind::Content,
            payload: Some(serde_json::json!({ "event": event })),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: LogEntryKind::Error,
            payload: Some(serde_json::json!({ "error": message.into() })),
        }
    }

    #[must_use]
    pub fn complete() -> Self {
        Self {
            kind: LogEntryKind::Complete,
            payload: None,
        }
    }

    #[must_use]
    pub fn queue_injected(payload: serde_json::Value) -> Self {
        Self {
            kind: LogEntryKind::QueueInjected,
            payload: Some(payload),
        }
    }
}

/// Error returned by [`ChatLog::queue_add`] when the per-chat queue is full.
#[derive(Debug, thiserror::Error)]
#[error("queue is full")]
pub struct QueueFullError;

/// The per-chat stream log and bounded message queue: the Shared Log & KV's
/// list-based half (the control-flag half is [`crate::StateStore`]).
#[async_trait]
pub trait ChatLog: Send + Sync {
    /// Append an entry to the per-chat stream log, trimming to the
    /// configured `STREAM_MAX_LEN` (approximate trimming allowed). Failures
    /// are the caller's concern to log and swallow — they never abort a
    /// stream.
    async fn append_stream_entry(&self, chat_id: ChatId, entry: LogEntry) -> Result<(), StateError>;

    /// Read the full stream log in append order. Intended for tests and
    /// debugging; clients normally tail the log rather than read it whole.
    async fn read_stream(&self, chat_id: ChatId) -> Result<Vec<LogEntry>, StateError>;

    /// `RPUSH` a new queued message. Returns `Err(QueueFullError)` when the
    /// queue already holds `MAX_QUEUE_SIZE` entries, otherwise the message's
    /// `position` (pre-push length).
    async fn queue_add(&self, chat_id: ChatId, message: QueuedMessage) -> Result<usize, StateError>;

    /// List the queue in FIFO order with each message's reconstructed
    /// `position`.
    async fn queue_get(&self, chat_id: ChatId) -> Result<Vec<(QueuedMessage, usize)>, StateError>;

    /// Overwrite the content of a queued message in place (`LSET`).
    async fn queue_update(
        &self,
        chat_id: ChatId,
        message_id: chatflow_core::QueuedMessageId,
        content: String,
    ) -> Result<bool, StateError>;

    /// Append content (newline-joined) and merge attachments onto an
    /// existing queued message in place.
    async fn queue_append(
        &self,
        chat_id: ChatId,
        message_id: chatflow_core::QueuedMessageId,
        content: &str,
        attachments: Vec<chatflow_core::Attachment>,
    ) -> Result<bool, StateError>;

    /// Remove one queued message by id (`LREM` count=1).
    async fn queue_remove(
        &self,
        chat_id: ChatId,
        message_id: chatflow_core::QueuedMessageId,
    ) -> Result<bool, StateError>;

    /// Pop the head of the queue (`LPOP`).
    async fn queue_pop_next(&self, chat_id: ChatId) -> Result<Option<QueuedMessage>, StateError>;

    /// `true` iff the queue has at least one entry.
    async fn queue_has_messages(&self, chat_id: ChatId) -> Result<bool, StateError>;
}
