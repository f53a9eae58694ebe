use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;

use chatflow_core::{Attachment, ChatId, QueuedMessage, QueuedMessageId};
use chatflow_state::error::StateError;
use chatflow_state::{ChatLog, LogEntry, QueueFullError};

/// In-process [`ChatLog`] test double.
pub struct MemoryChatLog {
    streams: DashMap<ChatId, Mutex<Vec<LogEntry>>>,
    queues: DashMap<ChatId, Mutex<Vec<QueuedMessage>>>,
    stream_max_len: usize,
    max_queue_size: usize,
}

impl MemoryChatLog {
    #[must_use]
    pub fn new(stream_max_len: usize, max_queue_size: usize) -> Self {
        Self {
            streams: DashMap::new(),
            queues: DashMap::new(),
            stream_max_len,
            max_queue_size,
        }
    }
}

impl Default for MemoryChatLog {
    fn default() -> Self {
        Self::new(10_000, chatflow_core::MAX_QUEUE_SIZE)
    }
}

#[async_trait]
impl ChatLog for MemoryChatLog {
    async fn append_stream_entry(&self, chat_id: ChatId, entry: LogEntry) -> Result<(), StateError> {
        let stream = self.streams.entry(chat_id).or_default();
        let mut stream = stream.lock().expect("stream lock poisoned");
        stream.push(entry);
        let overflow = stream.len().saturating_sub(self.stream_max_len);
        if overflow > 0 {
            stream.drain(0..overflow);
        }
        Ok(())
    }

    async fn read_stream(&self, chat_id: ChatId) -> Result<Vec<LogEntry>, StateError> {
        Ok(self
            .streams
            .get(&chat_id)
            .map(|s| s.lock().expect("stream lock poisoned").clone())
            .unwrap_or_default())
    }

    async fn queue_add(&self, chat_id: ChatId, message: QueuedMessage) -> Result<usize, StateError> {
        let queue = self.queues.entry(chat_id).or_default();
        let mut queue = queue.lock().expect("queue lock poisoned");
        if queue.len() >= self.max_queue_size {
            return Err(StateError::Backend(QueueFullError.to_string()));
        }
        let position = queue.len();
        queue.push(message);
        Ok(position)
    }

    async fn queue_get(&self, chat_id: ChatId) -> Result<Vec<(QueuedMessage, usize)>, StateError> {
        Ok(self
            .queues
            .get(&chat_id)
            .map(|q| {
                q.lock()
                    .expect("queue lock poisoned")
                    .iter()
                    .cloned()
                    .enumerate()
                    .map(|(i, m)| (m, i))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn queue_update(&self, chat_id: ChatId, message_id: QueuedMessageId, content: String) -> Result<bool, StateError> {
        let Some(queue) = self.queues.get(&chat_id) else {
            return Ok(false);
        };
        let mut queue = queue.lock().expect("queue lock poisoned");
        let Some(message) = queue.iter_mut().find(|m| m.id == message_id) else {
            return Ok(false);
        };
        message.content = content;
        Ok(true)
    }

    async fn queue_append(
        &self,
        chat_id: ChatId,
        message_id: QueuedMessageId,
        content: &str,
        attachments: Vec<Attachment>,
    ) -> Result<bool, StateError> {
        let Some(queue) = self.queues.get(&chat_id) else {
            return Ok(false);
        };
        let mut queue = queue.lock().expect("queue lock poisoned");
        let Some(message) = queue.iter_mut().find(|m| m.id == message_id) else {
            return Ok(false);
        };
        message.append(content, attachments);
        Ok(true)
    }

    async fn queue_remove(&self, chat_id: ChatId, message_id: QueuedMessageId) -> Result<bool, StateError> {
        let Some(queue) = self.queues.get(&chat_id) else {
            return Ok(false);
        };
        let mut queue = queue.lock().expect("queue lock poisoned");
        let before = queue.len();
        queue.retain(|m| m.id != message_id);
        Ok(queue.len() != before)
    }

    async fn queue_pop_next(&self, chat_id: ChatId) -> Result<Option<QueuedMessage>, StateError> {
        let Some(queue) = self.queues.get(&chat_id) else {
            return Ok(None);
        };
        let mut queue = queue.lock().expect("queue lock poisoned");
        Ok(if queue.is_empty() { None } else { Some(queue.remove(0)) })
    }

    async fn queue_has_messages(&self, chat_id: ChatId) -> Result<bool, StateError> {
        Ok(self
            .queues
            .get(&chat_id)
            .is_some_and(|q| !q.lock().expect("queue lock poisoned").is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatflow_core::PermissionMode;

    #[tokio::test]
    async fn queue_enforces_bound_and_fifo_order() {
        let log = MemoryChatLog::new(100, 2);
        let chat_id = ChatId::new();
        log.queue_add(chat_id, QueuedMessage::new("a", "claude-3", PermissionMode::Auto))
            .await
            .unwrap();
        log.queue_add(chat_id, QueuedMessage::new("b", "claude-3", PermissionMode::Auto))
            .await
            .unwrap();
        assert!(
            log.queue_add(chat_id, QueuedMessage::new("c", "claude-3", PermissionMode::Auto))
                .await
                .is_err()
        );

        let popped = log.queue_pop_next(chat_id).await.unwrap().unwrap();
        assert_eq!(popped.content, "a");
        log.queue_add(chat_id, QueuedMessage::new("c", "claude-3", PermissionMode::Auto))
            .await
            .expect("space freed after pop");
    }

    #[tokio::test]
    async fn stream_trims_to_max_len() {
        let log = MemoryChatLog::new(2, 50);
        let chat_id = ChatId::new();
        for _ in 0..5 {
            log.append_stream_entry(chat_id, LogEntry::complete()).await.unwrap();
        }
        assert_eq!(log.read_stream(chat_id).await.unwrap().len(), 2);
    }
}
