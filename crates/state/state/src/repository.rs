use async_trait::async_trait;
use chrono::{DateTime, Utc};

use chatflow_core::{Chat, ChatId, Message, MessageId, ScheduledTask, TaskExecution, TaskId, User, UserId, UserSettings};

use crate::error::StateError;

/// A page of cursor-paginated results: the page's items plus the cursor to
/// request the next page, or `None` once exhausted.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// Scoped transactional handle to the relational store: abstracts entity
/// load/save for Chats, Messages, ScheduledTasks, TaskExecutions, and
/// UserSettings so the orchestrator and scheduler never speak SQL directly.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StateError>;

    async fn get_user_settings(&self, user_id: UserId) -> Result<Option<UserSettings>, StateError>;

    async fn save_user_settings(&self, settings: &UserSettings) -> Result<(), StateError>;

    async fn create_chat(&self, chat: &Chat) -> Result<(), StateError>;

    async fn get_chat(&self, id: ChatId) -> Result<Option<Chat>, StateError>;

    async fn update_chat(&self, chat: &Chat) -> Result<(), StateError>;

    async fn list_chats_by_user(
        &self,
        user_id: UserId,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page<Chat>, StateError>;

    async fn create_message(&self, message: &Message) -> Result<(), StateError>;

    async fn get_message(&self, id: MessageId) -> Result<Option<Message>, StateError>;

    async fn update_message(&self, message: &Message) -> Result<(), StateError>;

    async fn list_messages_by_chat(
        &self,
        chat_id: ChatId,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page<Message>, StateError>;

    /// The single assistant message currently `in_progress` for this chat, if
    /// any — enforces the "at most one in-progress assistant message"
    /// invariant.
    async fn find_in_progress_message(&self, chat_id: ChatId) -> Result<Option<Message>, StateError>;

    async fn create_scheduled_task(&self, task: &ScheduledTask) -> Result<(), StateError>;

    async fn get_scheduled_task(&self, id: TaskId) -> Result<Option<ScheduledTask>, StateError>;

    async fn update_scheduled_task(&self, task: &ScheduledTask) -> Result<(), StateError>;

    async fn list_scheduled_tasks_by_user(&self, user_id: UserId) -> Result<Vec<ScheduledTask>, StateError>;

    /// Unconditional for the owner; the caller is responsible for the
    /// ownership check before calling this.
    async fn delete_scheduled_task(&self, id: TaskId) -> Result<(), StateError>;

    /// Count of this user's tasks that count against the 10-active-task cap
    /// (`enabled = true AND status IN (ACTIVE, PENDING)`).
    async fn count_active_tasks_for_user(&self, user_id: UserId) -> Result<i64, StateError>;

    /// Tasks with `enabled AND status = ACTIVE AND next_execution IS NOT NULL
    /// AND next_execution <= now`, for the scheduler runner's periodic
    /// `check_due`. Ordered by `next_execution` ascending (oldest due
    /// first) and capped at 100 rows per call so one tick can't process an
    /// unbounded backlog.
    async fn list_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>, StateError>;

    async fn create_task_execution(&self, execution: &TaskExecution) -> Result<(), StateError>;

    async fn update_task_execution(&self, execution: &TaskExecution) -> Result<(), StateError>;

    /// The most recent execution of `task_id` at or after `since`, used by
    /// the dedupe-window check before dispatching a new run.
    async fn find_recent_execution(
        &self,
        task_id: TaskId,
        since: DateTime<Utc>,
    ) -> Result<Option<TaskExecution>, StateError>;

    /// Offset-paginated execution history for one task, newest first, plus
    /// the total count (for `get_execution_history`'s `pages` field).
    async fn list_task_executions(
        &self,
        task_id: TaskId,
        offset: u32,
        limit: u32,
    ) -> Result<(Vec<TaskExecution>, i64), StateError>;
}
