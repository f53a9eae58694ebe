use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use chatflow_core::{
    Chat, ChatId, Message, MessageId, ScheduledTask, StreamStatus, TaskExecution, TaskId, TaskStatus, User, UserId,
    UserSettings, decode_cursor, encode_cursor,
};
use chatflow_state::error::StateError;
use chatflow_state::repository::{Page, Repository};

struct TimestampedChat {
    chat: Chat,
    created_at: DateTime<Utc>,
}

struct TimestampedMessage {
    message: Message,
    created_at: DateTime<Utc>,
}

/// In-process [`Repository`] test double. Stores entities in insertion order
/// behind `DashMap`s keyed by id; listing operations sort by `(created_at,
/// id)` descending to match the Postgres implementation's cursor ordering.
#[derive(Default)]
pub struct MemoryRepository {
    users: DashMap<UserId, User>,
    user_settings: DashMap<UserId, UserSettings>,
    chats: DashMap<ChatId, Mutex<TimestampedChat>>,
    messages: DashMap<MessageId, Mutex<TimestampedMessage>>,
    scheduled_tasks: DashMap<TaskId, Mutex<ScheduledTask>>,
    task_executions: DashMap<chatflow_core::ExecutionId, Mutex<TaskExecution>>,
}

impl MemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user directly (the memory store has no `create_user`; the spec
    /// never names one, users are provisioned by the auth layer).
    pub fn put_user(&self, user: User) {
        self.users.insert(user.id, user);
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StateError> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn get_user_settings(&self, user_id: UserId) -> Result<Option<UserSettings>, StateError> {
        Ok(self.user_settings.get(&user_id).map(|s| s.clone()))
    }

    async fn save_user_settings(&self, settings: &UserSettings) -> Result<(), StateError> {
        self.user_settings.insert(settings.user_id, settings.clone());
        Ok(())
    }

    async fn create_chat(&self, chat: &Chat) -> Result<(), StateError> {
        self.chats.insert(
            chat.id,
            Mutex::new(TimestampedChat {
                chat: chat.clone(),
                created_at: Utc::now(),
            }),
        );
        Ok(())
    }

    async fn get_chat(&self, id: ChatId) -> Result<Option<Chat>, StateError> {
        Ok(self.chats.get(&id).map(|c| c.lock().expect("chat lock poisoned").chat.clone()))
    }

    async fn update_chat(&self, chat: &Chat) -> Result<(), StateError> {
        if let Some(entry) = self.chats.get(&chat.id) {
            entry.lock().expect("chat lock poisoned").chat = chat.clone();
        }
        Ok(())
    }

    async fn list_chats_by_user(&self, user_id: UserId, cursor: Option<&str>, limit: u32) -> Result<Page<Chat>, StateError> {
        let mut all: Vec<(Chat, DateTime<Utc>)> = self
            .chats
            .iter()
            .filter_map(|e| {
                let locked = e.value().lock().expect("chat lock poisoned");
                (locked.chat.user_id == user_id).then(|| (locked.chat.clone(), locked.created_at))
            })
            .collect();
        all.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.id.as_uuid().cmp(&a.0.id.as_uuid())));

        let cursor_bound = cursor.map(decode_cursor).transpose().map_err(|e| StateError::Backend(e.to_string()))?;
        if let Some((cursor_time, cursor_id)) = cursor_bound {
            all.retain(|(chat, created_at)| (*created_at, chat.id.as_uuid()) < (cursor_time, cursor_id));
        }

        paginate(all, limit)
    }

    async fn create_message(&self, message: &Message) -> Result<(), StateError> {
        self.messages.insert(
            message.id,
            Mutex::new(TimestampedMessage {
                message: message.clone(),
                created_at: Utc::now(),
            }),
        );
        Ok(())
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<Message>, StateError> {
        Ok(self
            .messages
            .get(&id)
            .map(|m| m.lock().expect("message lock poisoned").message.clone()))
    }

    async fn update_message(&self, message: &Message) -> Result<(), StateError> {
        if let Some(entry) = self.messages.get(&message.id) {
            entry.lock().expect("message lock poisoned").message = message.clone();
        }
        Ok(())
    }

    async fn list_messages_by_chat(
        &self,
        chat_id: ChatId,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page<Message>, StateError> {
        let mut all: Vec<(Message, DateTime<Utc>)> = self
            .messages
            .iter()
            .filter_map(|e| {
                let locked = e.value().lock().expect("message lock poisoned");
                (locked.message.chat_id == chat_id).then(|| (locked.message.clone(), locked.created_at))
            })
            .collect();
        all.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.id.as_uuid().cmp(&a.0.id.as_uuid())));

        let cursor_bound = cursor.map(decode_cursor).transpose().map_err(|e| StateError::Backend(e.to_string()))?;
        if let Some((cursor_time, cursor_id)) = cursor_bound {
            all.retain(|(message, created_at)| (*created_at, message.id.as_uuid()) < (cursor_time, cursor_id));
        }

        paginate(all, limit)
    }

    async fn find_in_progress_message(&self, chat_id: ChatId) -> Result<Option<Message>, StateError> {
        Ok(self.messages.iter().find_map(|e| {
            let locked = e.value().lock().expect("message lock poisoned");
            (locked.message.chat_id == chat_id && locked.message.stream_status == Some(StreamStatus::InProgress))
                .then(|| locked.message.clone())
        }))
    }

    async fn create_scheduled_task(&self, task: &ScheduledTask) -> Result<(), StateError> {
        self.scheduled_tasks.insert(task.id, Mutex::new(task.clone()));
        Ok(())
    }

    async fn get_scheduled_task(&self, id: TaskId) -> Result<Option<ScheduledTask>, StateError> {
        Ok(self.scheduled_tasks.get(&id).map(|t| t.lock().expect("task lock poisoned").clone()))
    }

    async fn update_scheduled_task(&self, task: &ScheduledTask) -> Result<(), StateError> {
        if let Some(entry) = self.scheduled_tasks.get(&task.id) {
            *entry.lock().expect("task lock poisoned") = task.clone();
        }
        Ok(())
    }

    async fn list_scheduled_tasks_by_user(&self, user_id: UserId) -> Result<Vec<ScheduledTask>, StateError> {
        Ok(self
            .scheduled_tasks
            .iter()
            .filter_map(|e| {
                let locked = e.value().lock().expect("task lock poisoned");
                (locked.user_id == user_id).then(|| locked.clone())
            })
            .collect())
    }

    async fn delete_scheduled_task(&self, id: TaskId) -> Result<(), StateError> {
        self.scheduled_tasks.remove(&id);
        Ok(())
    }

    async fn count_active_tasks_for_user(&self, user_id: UserId) -> Result<i64, StateError> {
        Ok(self
            .scheduled_tasks
            .iter()
            .filter(|e| {
                let locked = e.value().lock().expect("task lock poisoned");
                locked.user_id == user_id && locked.counts_against_cap()
            })
            .count() as i64)
    }

    async fn list_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>, StateError> {
        let mut due: Vec<ScheduledTask> = self
            .scheduled_tasks
            .iter()
            .filter_map(|e| {
                let locked = e.value().lock().expect("task lock poisoned");
                (locked.enabled
                    && locked.status == TaskStatus::Active
                    && locked.next_execution.is_some_and(|next| next <= now))
                .then(|| locked.clone())
            })
            .collect();
        due.sort_by_key(|task| task.next_execution);
        due.truncate(100);
        Ok(due)
    }

    async fn create_task_execution(&self, execution: &TaskExecution) -> Result<(), StateError> {
        self.task_executions.insert(execution.id, Mutex::new(execution.clone()));
        Ok(())
    }

    async fn update_task_execution(&self, execution: &TaskExecution) -> Result<(), StateError> {
        if let Some(entry) = self.task_executions.get(&execution.id) {
            *entry.lock().expect("execution lock poisoned") = execution.clone();
        }
        Ok(())
    }

    async fn find_recent_execution(&self, task_id: TaskId, since: DateTime<Utc>) -> Result<Option<TaskExecution>, StateError> {
        Ok(self
            .task_executions
            .iter()
            .filter_map(|e| {
                let locked = e.value().lock().expect("execution lock poisoned");
                (locked.task_id == task_id && locked.executed_at >= since).then(|| locked.clone())
            })
            .max_by_key(|e| e.executed_at))
    }

    async fn list_task_executions(
        &self,
        task_id: TaskId,
        offset: u32,
        limit: u32,
    ) -> Result<(Vec<TaskExecution>, i64), StateError> {
        let mut all: Vec<TaskExecution> = self
            .task_executions
            .iter()
            .filter_map(|e| {
                let locked = e.value().lock().expect("execution lock poisoned");
                (locked.task_id == task_id).then(|| locked.clone())
            })
            .collect();
        all.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));

        let total = all.len() as i64;
        let page = all.into_iter().skip(offset as usize).take(limit as usize).collect();
        Ok((page, total))
    }
}

fn paginate<T>(mut all: Vec<(T, DateTime<Utc>)>, limit: u32) -> Result<Page<T>, StateError>
where
    T: HasId,
{
    let limit = limit as usize;
    all.truncate(limit + 1);
    let next_cursor = if all.len() > limit {
        all.truncate(limit);
        all.last().map(|(item, created_at)| encode_cursor(*created_at, item.id()))
    } else {
        None
    };

    Ok(Page {
        items: all.into_iter().map(|(item, _)| item).collect(),
        next_cursor,
    })
}

trait HasId {
    fn id(&self) -> uuid::Uuid;
}

impl HasId for Chat {
    fn id(&self) -> uuid::Uuid {
        self.id.as_uuid()
    }
}

impl HasId for Message {
    fn id(&self) -> uuid::Uuid {
        self.id.as_uuid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatflow_core::RecurrenceType;

    #[tokio::test]
    async fn list_chats_by_user_paginates_newest_first() {
        let repo = MemoryRepository::new();
        let user_id = UserId::new();
        for i in 0..3 {
            let chat = Chat::new(user_id, format!("chat-{i}"));
            repo.create_chat(&chat).await.unwrap();
        }

        let page = repo.list_chats_by_user(user_id, None, 2).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.next_cursor.is_some());

        let next = repo
            .list_chats_by_user(user_id, page.next_cursor.as_deref(), 2)
            .await
            .unwrap();
        assert_eq!(next.items.len(), 1);
        assert!(next.next_cursor.is_none());
    }

    #[tokio::test]
    async fn count_active_tasks_excludes_paused() {
        let repo = MemoryRepository::new();
        let user_id = UserId::new();
        let mut task = ScheduledTask::new(
            user_id,
            "digest",
            "summarize",
            "claude-3",
            RecurrenceType::Daily,
            chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            None,
            Some(Utc::now()),
        );
        repo.create_scheduled_task(&task).await.unwrap();
        assert_eq!(repo.count_active_tasks_for_user(user_id).await.unwrap(), 1);

        task.pause();
        repo.update_scheduled_task(&task).await.unwrap();
        assert_eq!(repo.count_active_tasks_for_user(user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn list_due_tasks_is_ordered_oldest_first_and_excludes_non_candidates() {
        let repo = MemoryRepository::new();
        let user_id = UserId::new();
        let now = Utc::now();

        let due_task = |name: &str, next_execution: DateTime<Utc>| {
            ScheduledTask::new(
                user_id,
                name,
                "summarize",
                "claude-3",
                RecurrenceType::Daily,
                chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                None,
                Some(next_execution),
            )
        };

        let later = due_task("later", now - chrono::Duration::minutes(1));
        let earlier = due_task("earlier", now - chrono::Duration::minutes(10));
        repo.create_scheduled_task(&later).await.unwrap();
        repo.create_scheduled_task(&earlier).await.unwrap();

        let mut pending = due_task("pending", now - chrono::Duration::minutes(1));
        pending.status = TaskStatus::Pending;
        repo.create_scheduled_task(&pending).await.unwrap();

        let mut paused = due_task("paused", now - chrono::Duration::minutes(1));
        paused.pause();
        repo.create_scheduled_task(&paused).await.unwrap();

        let mut no_next_execution = due_task("no-next-execution", now);
        no_next_execution.next_execution = None;
        repo.create_scheduled_task(&no_next_execution).await.unwrap();

        let due = repo.list_due_tasks(now).await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].task_name, "earlier");
        assert_eq!(due[1].task_name, "later");
    }
}
