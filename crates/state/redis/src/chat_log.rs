use async_trait::async_trait;
use redis::AsyncCommands;

use chatflow_core::{Attachment, ChatId, QueuedMessage, QueuedMessageId};
use chatflow_state::error::StateError;
use chatflow_state::{ChatLog, LogEntry, QueueFullError};

use crate::config::RedisConfig;

/// Redis-backed implementation of [`ChatLog`]: the per-chat stream log and
/// bounded message queue.
pub struct RedisChatLog {
    pool: deadpool_redis::Pool,
    prefix: String,
    stream_max_len: usize,
    max_queue_size: usize,
    queue_message_ttl: std::time::Duration,
}

impl RedisChatLog {
    /// # Errors
    ///
    /// Returns [`StateError::Connection`] if the pool cannot be created.
    pub fn new(config: &RedisConfig) -> Result<Self, StateError> {
        let cfg = deadpool_redis::Config::from_url(config.effective_url());
        let pool = cfg
            .builder()
            .map(|b| {
                b.max_size(config.pool_size)
                    .wait_timeout(Some(config.connection_timeout))
                    .runtime(deadpool_redis::Runtime::Tokio1)
                    .build()
            })
            .map_err(|e| StateError::Connection(e.to_string()))?
            .map_err(|e| StateError::Connection(e.to_string()))?;

        Ok(Self {
            pool,
            prefix: config.prefix.clone(),
            stream_max_len: config.stream_max_len,
            max_queue_size: config.max_queue_size,
            queue_message_ttl: config.queue_message_ttl,
        })
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, StateError> {
        self.pool
            .get()
            .await
            .map_err(|e| StateError::Connection(e.to_string()))
    }

    fn stream_key(&self, chat_id: ChatId) -> String {
        format!("{}:chat:{chat_id}:stream", self.prefix)
    }

    fn queue_key(&self, chat_id: ChatId) -> String {
        format!("{}:chat:{chat_id}:queue", self.prefix)
    }
}

#[async_trait]
impl ChatLog for RedisChatLog {
    async fn append_stream_entry(&self, chat_id: ChatId, entry: LogEntry) -> Result<(), StateError> {
        let key = self.stream_key(chat_id);
        let payload = serde_json::to_string(&entry).map_err(|e| StateError::Backend(e.to_string()))?;
        let mut conn = self.conn().await?;
        let () = conn
            .rpush(&key, payload)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;
        let max_len = i64::try_from(self.stream_max_len).unwrap_or(i64::MAX);
        let () = conn
            .ltrim(&key, -max_len, -1)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn read_stream(&self, chat_id: ChatId) -> Result<Vec<LogEntry>, StateError> {
        let key = self.stream_key(chat_id);
        let mut conn = self.conn().await?;
        let raw: Vec<String> = conn
            .lrange(&key, 0, -1)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;
        raw.into_iter()
            .map(|s| serde_json::from_str(&s).map_err(|e| StateError::Backend(e.to_string())))
            .collect()
    }

    async fn queue_add(&self, chat_id: ChatId, message: QueuedMessage) -> Result<usize, StateError> {
        let key = self.queue_key(chat_id);
        let mut conn = self.conn().await?;
        let len: usize = conn
            .llen(&key)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;
        if len >= self.max_queue_size {
            return Err(StateError::Backend(QueueFullError.to_string()));
        }
        let payload = serde_json::to_string(&message).map_err(|e| StateError::Backend(e.to_string()))?;
        let () = conn
            .rpush(&key, payload)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;
        let secs = self.queue_message_ttl.as_secs().max(1);
        let _: bool = conn
            .expire(&key, i64::try_from(secs).unwrap_or(i64::MAX))
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;
        Ok(len)
    }

    async fn queue_get(&self, chat_id: ChatId) -> Result<Vec<(QueuedMessage, usize)>, StateError> {
        let key = self.queue_key(chat_id);
        let mut conn = self.conn().await?;
        let raw: Vec<String> = conn
            .lrange(&key, 0, -1)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;
        raw.into_iter()
            .enumerate()
            .map(|(position, s)| {
                serde_json::from_str::<QueuedMessage>(&s)
                    .map(|m| (m, position))
                    .map_err(|e| StateError::Backend(e.to_string()))
            })
            .collect()
    }

    async fn queue_update(
        &self,
        chat_id: ChatId,
        message_id: QueuedMessageId,
        content: String,
    ) -> Result<bool, StateError> {
        let Some((mut message, position)) = self.find_in_queue(chat_id, message_id).await? else {
            return Ok(false);
        };
        message.content = content;
        self.write_at(chat_id, position, &message).await?;
        Ok(true)
    }

    async fn queue_append(
        &self,
        chat_id: ChatId,
        message_id: QueuedMessageId,
        content: &str,
        attachments: Vec<Attachment>,
    ) -> Result<bool, StateError> {
        let Some((mut message, position)) = self.find_in_queue(chat_id, message_id).await? else {
            return Ok(false);
        };
        message.append(content, attachments);
        self.write_at(chat_id, position, &message).await?;
        Ok(true)
    }

    async fn queue_remove(&self, chat_id: ChatId, message_id: QueuedMessageId) -> Result<bool, StateError> {
        let Some((message, _position)) = self.find_in_queue(chat_id, message_id).await? else {
            return Ok(false);
        };
        let key = self.queue_key(chat_id);
        let payload = serde_json::to_string(&message).map_err(|e| StateError::Backend(e.to_string()))?;
        let mut conn = self.conn().await?;
        let removed: i64 = conn
            .lrem(&key, 1, payload)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;
        Ok(removed > 0)
    }

    async fn queue_pop_next(&self, chat_id: ChatId) -> Result<Option<QueuedMessage>, StateError> {
        let key = self.queue_key(chat_id);
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn
            .lpop(&key, None)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;
        raw.map(|s| serde_json::from_str(&s).map_err(|e| StateError::Backend(e.to_string())))
            .transpose()
    }

    async fn queue_has_messages(&self, chat_id: ChatId) -> Result<bool, StateError> {
        let key = self.queue_key(chat_id);
        let mut conn = self.conn().await?;
        let len: usize = conn
            .llen(&key)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;
        Ok(len > 0)
    }
}

impl RedisChatLog {
    async fn find_in_queue(
        &self,
        chat_id: ChatId,
        message_id: QueuedMessageId,
    ) -> Result<Option<(QueuedMessage, usize)>, StateError> {
        let all = self.queue_get(chat_id).await?;
        Ok(all.into_iter().find(|(m, _)| m.id == message_id))
    }

    async fn write_at(&self, chat_id: ChatId, position: usize, message: &QueuedMessage) -> Result<(), StateError> {
        let key = self.queue_key(chat_id);
        let payload = serde_json::to_string(message).map_err(|e| StateError::Backend(e.to_string()))?;
        let mut conn = self.conn().await?;
        let () = conn
            .lset(&key, i64::try_from(position).unwrap_or(i64::MAX), payload)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use super::*;
    use chatflow_core::PermissionMode;

    fn test_config() -> RedisConfig {
        RedisConfig {
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            prefix: format!("chatflow-test-{}", uuid::Uuid::new_v4()),
            ..RedisConfig::default()
        }
    }

    #[tokio::test]
    async fn queue_round_trips_fifo() {
        let log = RedisChatLog::new(&test_config()).expect("pool creation should succeed");
        let chat_id = ChatId::new();
        let first = QueuedMessage::new("first", "claude-3", PermissionMode::Auto);
        let second = QueuedMessage::new("second", "claude-3", PermissionMode::Auto);
        log.queue_add(chat_id, first.clone()).await.unwrap();
        log.queue_add(chat_id, second).await.unwrap();

        let popped = log.queue_pop_next(chat_id).await.unwrap().unwrap();
        assert_eq!(popped.id, first.id);
        assert!(log.queue_has_messages(chat_id).await.unwrap());
    }

    #[tokio::test]
    async fn stream_entries_append_in_order() {
        let log = RedisChatLog::new(&test_config()).expect("pool creation should succeed");
        let chat_id = ChatId::new();
        log.append_stream_entry(chat_id, LogEntry::content(serde_json::json!({"delta": "a"})))
            .await
            .unwrap();
        log.append_stream_entry(chat_id, LogEntry::complete()).await.unwrap();

        let entries = log.read_stream(chat_id).await.unwrap();
        assert_eq!(entries.len(), 2);
    }
}
