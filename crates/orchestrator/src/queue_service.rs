use std::sync::Arc;

use chatflow_core::{Attachment, ChatId, PermissionMode, QueuedMessage, QueuedMessageId};
use chatflow_state::{ChatLog, StateError};

/// A queued message annotated with its reconstructed FIFO position.
#[derive(Debug, Clone)]
pub struct QueuedMessageView {
    pub message: QueuedMessage,
    pub position: usize,
}

/// Typed wrapper over a chat's bounded message queue.
///
/// Grounded on `QueueService` in `queue.py`: every method here is a direct
/// counterpart of one of its methods, with `position` carried the same
/// way — reconstructed from list index rather than stored on the message.
/// The actual RPUSH/LPOP/LSET/LREM mechanics live behind [`ChatLog`]; this
/// type just gives the operations names and types that match the spec.
pub struct QueueService {
    log: Arc<dyn ChatLog>,
}

impl QueueService {
    #[must_use]
    pub fn new(log: Arc<dyn ChatLog>) -> Self {
        Self { log }
    }

    /// Fails with `Err(StateError::Backend(_))` wrapping [`chatflow_state::QueueFullError`]
    /// when the queue is already at `MAX_QUEUE_SIZE`. On success returns the
    /// message's pre-push position.
    pub async fn add_message(&self, chat_id: ChatId, message: QueuedMessage) -> Result<usize, StateError> {
        self.log.queue_add(chat_id, message).await
    }

    pub async fn get_queue(&self, chat_id: ChatId) -> Result<Vec<QueuedMessageView>, StateError> {
        Ok(self
            .log
            .queue_get(chat_id)
            .await?
            .into_iter()
            .map(|(message, position)| QueuedMessageView { message, position })
            .collect())
    }

    pub async fn update_message(
        &self,
        chat_id: ChatId,
        message_id: QueuedMessageId,
        content: String,
    ) -> Result<bool, StateError> {
        self.log.queue_update(chat_id, message_id, content).await
    }

    pub async fn append_to_message(
        &self,
        chat_id: ChatId,
        message_id: QueuedMessageId,
        content: &str,
        attachments: Vec<Attachment>,
    ) -> Result<bool, StateError> {
        self.log.queue_append(chat_id, message_id, content, attachments).await
    }

    pub async fn remove_message(&self, chat_id: ChatId, message_id: QueuedMessageId) -> Result<bool, StateError> {
        self.log.queue_remove(chat_id, message_id).await
    }

    pub async fn pop_next_message(&self, chat_id: ChatId) -> Result<Option<QueuedMessage>, StateError> {
        self.log.queue_pop_next(chat_id).await
    }

    pub async fn has_messages(&self, chat_id: ChatId) -> Result<bool, StateError> {
        self.log.queue_has_messages(chat_id).await
    }
}

/// Builds a new queued message with the spec's default permission mode.
#[must_use]
pub fn new_queued_message(content: impl Into<String>, model_id: impl Into<String>) -> QueuedMessage {
    QueuedMessage::new(content, model_id, PermissionMode::Auto)
}

#[cfg(test)]
mod tests {
    use chatflow_state_memory::MemoryChatLog;

    use super::*;

    fn service() -> QueueService {
        QueueService::new(Arc::new(MemoryChatLog::new(100, 2)))
    }

    #[tokio::test]
    async fn add_then_pop_is_fifo() {
        let svc = service();
        let chat_id = ChatId::new();
        let first = new_queued_message("first", "claude-3");
        let second = new_queued_message("second", "claude-3");
        assert_eq!(svc.add_message(chat_id, first.clone()).await.unwrap(), 0);
        assert_eq!(svc.add_message(chat_id, second).await.unwrap(), 1);

        let popped = svc.pop_next_message(chat_id).await.unwrap().unwrap();
        assert_eq!(popped.id, first.id);
        assert!(svc.has_messages(chat_id).await.unwrap());
    }

    #[tokio::test]
    async fn add_message_fails_once_full() {
        let svc = service();
        let chat_id = ChatId::new();
        svc.add_message(chat_id, new_queued_message("a", "claude-3")).await.unwrap();
        svc.add_message(chat_id, new_queued_message("b", "claude-3")).await.unwrap();
        assert!(svc.add_message(chat_id, new_queued_message("c", "claude-3")).await.is_err());
    }

    #[tokio::test]
    async fn s5_full_queue_rejects_add_but_preserves_existing_entries() {
        let svc = service();
        let chat_id = ChatId::new();
        svc.add_message(chat_id, new_queued_message("a", "claude-3")).await.unwrap();
        svc.add_message(chat_id, new_queued_message("b", "claude-3")).await.unwrap();

        assert!(svc.add_message(chat_id, new_queued_message("c", "claude-3")).await.is_err());

        let queue = svc.get_queue(chat_id).await.unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].message.content, "a");
        assert_eq!(queue[1].message.content, "b");
    }

    #[tokio::test]
    async fn append_to_message_concatenates_and_merges_attachments() {
        let svc = service();
        let chat_id = ChatId::new();
        let message = new_queued_message("first", "claude-3");
        let message_id = message.id;
        svc.add_message(chat_id, message).await.unwrap();

        let attachment = Attachment::new("url", "image/png", "a.png");
        assert!(svc
            .append_to_message(chat_id, message_id, "second", vec![attachment])
            .await
            .unwrap());

        let queue = svc.get_queue(chat_id).await.unwrap();
        assert_eq!(queue[0].message.content, "first\nsecond");
        assert_eq!(queue[0].message.attachments.len(), 1);
        assert_eq!(queue[0].position, 0);
    }
}
