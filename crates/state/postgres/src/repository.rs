use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use chatflow_core::{
    Attachment, Chat, ChatId, CustomProvider, ExecutionStatus, Message, MessageId, MessageRole,
    RecurrenceType, ScheduledTask, StreamStatus, TaskExecution, TaskId, TaskStatus, User, UserId,
    UserSettings, decode_cursor, encode_cursor,
};
use chatflow_crypto::PayloadEncryptor;
use chatflow_state::error::StateError;
use chatflow_state::repository::{Page, Repository};

use crate::config::PostgresConfig;
use crate::migrations;

/// Build `PgConnectOptions` from a [`PostgresConfig`], applying SSL settings
/// when configured.
pub(crate) fn build_connect_options(config: &PostgresConfig) -> Result<sqlx::postgres::PgConnectOptions, StateError> {
    let mut options: sqlx::postgres::PgConnectOptions = config
        .url
        .parse()
        .map_err(|e: sqlx::Error| StateError::Connection(e.to_string()))?;

    if let Some(ref mode) = config.ssl_mode {
        let ssl_mode = match mode.as_str() {
            "disable" => sqlx::postgres::PgSslMode::Disable,
            "prefer" => sqlx::postgres::PgSslMode::Prefer,
            "require" => sqlx::postgres::PgSslMode::Require,
            "verify-ca" => sqlx::postgres::PgSslMode::VerifyCa,
            "verify-full" => sqlx::postgres::PgSslMode::VerifyFull,
            other => return Err(StateError::Connection(format!("unknown ssl_mode: {other}"))),
        };
        options = options.ssl_mode(ssl_mode);
    }
    if let Some(ref path) = config.ssl_root_cert {
        options = options.ssl_root_cert(path);
    }
    if let Some(ref path) = config.ssl_cert {
        options = options.ssl_client_cert(path);
    }
    if let Some(ref path) = config.ssl_key {
        options = options.ssl_client_key(path);
    }
    Ok(options)
}

fn recurrence_to_str(value: RecurrenceType) -> &'static str {
    match value {
        RecurrenceType::Once => "ONCE",
        RecurrenceType::Daily => "DAILY",
        RecurrenceType::Weekly => "WEEKLY",
        RecurrenceType::Monthly => "MONTHLY",
    }
}

fn recurrence_from_str(value: &str) -> Result<RecurrenceType, StateError> {
    match value {
        "ONCE" => Ok(RecurrenceType::Once),
        "DAILY" => Ok(RecurrenceType::Daily),
        "WEEKLY" => Ok(RecurrenceType::Weekly),
        "MONTHLY" => Ok(RecurrenceType::Monthly),
        other => Err(StateError::Backend(format!("unknown recurrence_type: {other}"))),
    }
}

fn task_status_to_str(value: TaskStatus) -> &'static str {
    match value {
        TaskStatus::Active => "active",
        TaskStatus::Paused => "paused",
        TaskStatus::Pending => "pending",
        TaskStatus::Completed => "completed",
    }
}

fn task_status_from_str(value: &str) -> Result<TaskStatus, StateError> {
    match value {
        "active" => Ok(TaskStatus::Active),
        "paused" => Ok(TaskStatus::Paused),
        "pending" => Ok(TaskStatus::Pending),
        "completed" => Ok(TaskStatus::Completed),
        other => Err(StateError::Backend(format!("unknown task status: {other}"))),
    }
}

fn execution_status_to_str(value: ExecutionStatus) -> &'static str {
    match value {
        ExecutionStatus::Running => "running",
        ExecutionStatus::Success => "success",
        ExecutionStatus::Failed => "failed",
    }
}

fn execution_status_from_str(value: &str) -> Result<ExecutionStatus, StateError> {
    match value {
        "running" => Ok(ExecutionStatus::Running),
        "success" => Ok(ExecutionStatus::Success),
        "failed" => Ok(ExecutionStatus::Failed),
        other => Err(StateError::Backend(format!("unknown execution status: {other}"))),
    }
}

fn message_role_to_str(value: MessageRole) -> &'static str {
    match value {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

fn message_role_from_str(value: &str) -> Result<MessageRole, StateError> {
    match value {
        "user" => Ok(MessageRole::User),
        "assistant" => Ok(MessageRole::Assistant),
        other => Err(StateError::Backend(format!("unknown message role: {other}"))),
    }
}

fn stream_status_to_str(value: StreamStatus) -> &'static str {
    match value {
        StreamStatus::InProgress => "in_progress",
        StreamStatus::Completed => "completed",
        StreamStatus::Interrupted => "interrupted",
        StreamStatus::Failed => "failed",
    }
}

fn stream_status_from_str(value: &str) -> Result<StreamStatus, StateError> {
    match value {
        "in_progress" => Ok(StreamStatus::InProgress),
        "completed" => Ok(StreamStatus::Completed),
        "interrupted" => Ok(StreamStatus::Interrupted),
        "failed" => Ok(StreamStatus::Failed),
        other => Err(StateError::Backend(format!("unknown stream status: {other}"))),
    }
}

fn attachments_to_json(attachments: &[Attachment]) -> Result<String, StateError> {
    serde_json::to_string(attachments).map_err(|e| StateError::Backend(e.to_string()))
}

fn attachments_from_json(raw: &str) -> Result<Vec<Attachment>, StateError> {
    serde_json::from_str(raw).map_err(|e| StateError::Backend(e.to_string()))
}

fn chat_from_row(row: &PgRow) -> Result<(Chat, DateTime<Utc>), StateError> {
    let id: Uuid = row.try_get("id").map_err(|e| StateError::Backend(e.to_string()))?;
    let user_id: Uuid = row.try_get("user_id").map_err(|e| StateError::Backend(e.to_string()))?;
    let chat = Chat {
        id: ChatId::from(id),
        user_id: UserId::from(user_id),
        title: row.try_get("title").map_err(|e| StateError::Backend(e.to_string()))?,
        sandbox_id: row.try_get("sandbox_id").map_err(|e| StateError::Backend(e.to_string()))?,
        sandbox_provider: row
            .try_get("sandbox_provider")
            .map_err(|e| StateError::Backend(e.to_string()))?,
        session_id: row.try_get("session_id").map_err(|e| StateError::Backend(e.to_string()))?,
        context_token_usage: row
            .try_get("context_token_usage")
            .map_err(|e| StateError::Backend(e.to_string()))?,
    };
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(|e| StateError::Backend(e.to_string()))?;
    Ok((chat, created_at))
}

fn message_from_row(row: &PgRow) -> Result<(Message, DateTime<Utc>), StateError> {
    let id: Uuid = row.try_get("id").map_err(|e| StateError::Backend(e.to_string()))?;
    let chat_id: Uuid = row.try_get("chat_id").map_err(|e| StateError::Backend(e.to_string()))?;
    let role: String = row.try_get("role").map_err(|e| StateError::Backend(e.to_string()))?;
    let stream_status: Option<String> = row
        .try_get("stream_status")
        .map_err(|e| StateError::Backend(e.to_string()))?;
    let attachments: String = row.try_get("attachments").map_err(|e| StateError::Backend(e.to_string()))?;

    let message = Message {
        id: MessageId::from(id),
        chat_id: ChatId::from(chat_id),
        role: message_role_from_str(&role)?,
        content: row.try_get("content").map_err(|e| StateError::Backend(e.to_string()))?,
        model_id: row.try_get("model_id").map_err(|e| StateError::Backend(e.to_string()))?,
        stream_status: stream_status.map(|s| stream_status_from_str(&s)).transpose()?,
        total_cost_usd: row
            .try_get("total_cost_usd")
            .map_err(|e| StateError::Backend(e.to_string()))?,
        session_id: row.try_get("session_id").map_err(|e| StateError::Backend(e.to_string()))?,
        checkpoint_id: row.try_get("checkpoint_id").map_err(|e| StateError::Backend(e.to_string()))?,
        attachments: attachments_from_json(&attachments)?,
    };
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(|e| StateError::Backend(e.to_string()))?;
    Ok((message, created_at))
}

fn task_from_row(row: &PgRow) -> Result<ScheduledTask, StateError> {
    let id: Uuid = row.try_get("id").map_err(|e| StateError::Backend(e.to_string()))?;
    let user_id: Uuid = row.try_get("user_id").map_err(|e| StateError::Backend(e.to_string()))?;
    let recurrence_type: String = row
        .try_get("recurrence_type")
        .map_err(|e| StateError::Backend(e.to_string()))?;
    let status: String = row.try_get("status").map_err(|e| StateError::Backend(e.to_string()))?;
    let scheduled_day: Option<i32> = row
        .try_get("scheduled_day")
        .map_err(|e| StateError::Backend(e.to_string()))?;
    let execution_count: i64 = row
        .try_get("execution_count")
        .map_err(|e| StateError::Backend(e.to_string()))?;
    let failure_count: i64 = row.try_get("failure_count").map_err(|e| StateError::Backend(e.to_string()))?;

    Ok(ScheduledTask {
        id: TaskId::from(id),
        user_id: UserId::from(user_id),
        task_name: row.try_get("task_name").map_err(|e| StateError::Backend(e.to_string()))?,
        prompt_message: row
            .try_get("prompt_message")
            .map_err(|e| StateError::Backend(e.to_string()))?,
        model_id: row.try_get("model_id").map_err(|e| StateError::Backend(e.to_string()))?,
        recurrence_type: recurrence_from_str(&recurrence_type)?,
        scheduled_time: row
            .try_get::<NaiveTime, _>("scheduled_time")
            .map_err(|e| StateError::Backend(e.to_string()))?,
        scheduled_day: scheduled_day.map(|d| u32::try_from(d).unwrap_or(0)),
        status: task_status_from_str(&status)?,
        enabled: row.try_get("enabled").map_err(|e| StateError::Backend(e.to_string()))?,
        next_execution: row
            .try_get("next_execution")
            .map_err(|e| StateError::Backend(e.to_string()))?,
        execution_count: u64::try_from(execution_count).unwrap_or(0),
        failure_count: u64::try_from(failure_count).unwrap_or(0),
        last_execution: row.try_get("last_execution").map_err(|e| StateError::Backend(e.to_string()))?,
        last_error: row.try_get("last_error").map_err(|e| StateError::Backend(e.to_string()))?,
    })
}

fn execution_from_row(row: &PgRow) -> Result<TaskExecution, StateError> {
    let id: Uuid = row.try_get("id").map_err(|e| StateError::Backend(e.to_string()))?;
    let task_id: Uuid = row.try_get("task_id").map_err(|e| StateError::Backend(e.to_string()))?;
    let status: String = row.try_get("status").map_err(|e| StateError::Backend(e.to_string()))?;
    let chat_id: Option<Uuid> = row.try_get("chat_id").map_err(|e| StateError::Backend(e.to_string()))?;
    let message_id: Option<Uuid> = row.try_get("message_id").map_err(|e| StateError::Backend(e.to_string()))?;

    Ok(TaskExecution {
        id: chatflow_core::ExecutionId::from(id),
        task_id: TaskId::from(task_id),
        executed_at: row.try_get("executed_at").map_err(|e| StateError::Backend(e.to_string()))?,
        completed_at: row.try_get("completed_at").map_err(|e| StateError::Backend(e.to_string()))?,
        status: execution_status_from_str(&status)?,
        error_message: row.try_get("error_message").map_err(|e| StateError::Backend(e.to_string()))?,
        chat_id: chat_id.map(ChatId::from),
        message_id: message_id.map(MessageId::from),
        duration_ms: row.try_get("duration_ms").map_err(|e| StateError::Backend(e.to_string()))?,
    })
}

/// PostgreSQL-backed implementation of [`Repository`], the Durable Store
/// Gateway's scoped transactional handle to the relational store.
pub struct PostgresRepository {
    pool: sqlx::PgPool,
    config: Arc<PostgresConfig>,
    encryptor: Option<Arc<PayloadEncryptor>>,
}

impl PostgresRepository {
    /// Create a new `PostgresRepository`, connecting and running migrations.
    ///
    /// `encryptor` is applied to `user_settings.custom_providers`; pass
    /// `None` only for tests against a throwaway database.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Connection`] if pool creation fails, or
    /// [`StateError::Backend`] if migrations fail.
    pub async fn new(config: PostgresConfig, encryptor: Option<Arc<PayloadEncryptor>>) -> Result<Self, StateError> {
        let connect_options = build_connect_options(&config)?;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect_with(connect_options)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::run_migrations(&pool, &config)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(Self {
            pool,
            config: Arc::new(config),
            encryptor,
        })
    }

    fn encode_custom_providers(&self, providers: &[CustomProvider]) -> Result<String, StateError> {
        let value = serde_json::to_value(providers).map_err(|e| StateError::Backend(e.to_string()))?;
        match &self.encryptor {
            Some(enc) => enc.encrypt_json(&value).map_err(|e| StateError::Backend(e.to_string())),
            None => serde_json::to_string(providers).map_err(|e| StateError::Backend(e.to_string())),
        }
    }

    /// Decrypt `custom_providers`, tolerating legacy plaintext rows per the
    /// External Interfaces contract: a decryption failure falls back to a
    /// direct JSON parse of the stored value rather than erroring out.
    fn decode_custom_providers(&self, raw: &str) -> Result<Vec<CustomProvider>, StateError> {
        if let Some(enc) = &self.encryptor
            && let Ok(value) = enc.decrypt_json(raw)
        {
            return serde_json::from_value(value).map_err(|e| StateError::Backend(e.to_string()));
        }
        serde_json::from_str(raw).map_err(|e| StateError::Backend(e.to_string()))
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StateError> {
        let table = self.config.users_table();
        let row = sqlx::query(&format!("SELECT id, email, username FROM {table} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        row.map(|r| {
            Ok(User {
                id,
                email: r.try_get("email").map_err(|e| StateError::Backend(e.to_string()))?,
                username: r.try_get("username").map_err(|e| StateError::Backend(e.to_string()))?,
            })
        })
        .transpose()
    }

    async fn get_user_settings(&self, user_id: UserId) -> Result<Option<UserSettings>, StateError> {
        let table = self.config.user_settings_table();
        let row = sqlx::query(&format!(
            "SELECT custom_providers, sandbox_provider, feature_toggles FROM {table} WHERE user_id = $1"
        ))
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StateError::Backend(e.to_string()))?;

        let Some(row) = row else { return Ok(None) };
        let custom_providers_raw: String = row
            .try_get("custom_providers")
            .map_err(|e| StateError::Backend(e.to_string()))?;
        let feature_toggles_raw: String = row
            .try_get("feature_toggles")
            .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(Some(UserSettings {
            user_id,
            custom_providers: self.decode_custom_providers(&custom_providers_raw)?,
            sandbox_provider: row
                .try_get("sandbox_provider")
                .map_err(|e| StateError::Backend(e.to_string()))?,
            feature_toggles: serde_json::from_str(&feature_toggles_raw).map_err(|e| StateError::Backend(e.to_string()))?,
        }))
    }

    async fn save_user_settings(&self, settings: &UserSettings) -> Result<(), StateError> {
        let table = self.config.user_settings_table();
        let custom_providers = self.encode_custom_providers(&settings.custom_providers)?;
        let feature_toggles =
            serde_json::to_string(&settings.feature_toggles).map_err(|e| StateError::Backend(e.to_string()))?;

        sqlx::query(&format!(
            "INSERT INTO {table} (user_id, custom_providers, sandbox_provider, feature_toggles) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id) DO UPDATE \
             SET custom_providers = EXCLUDED.custom_providers, \
                 sandbox_provider = EXCLUDED.sandbox_provider, \
                 feature_toggles = EXCLUDED.feature_toggles"
        ))
        .bind(settings.user_id.as_uuid())
        .bind(custom_providers)
        .bind(&settings.sandbox_provider)
        .bind(feature_toggles)
        .execute(&self.pool)
        .await
        .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn create_chat(&self, chat: &Chat) -> Result<(), StateError> {
        let table = self.config.chats_table();
        sqlx::query(&format!(
            "INSERT INTO {table} \
             (id, user_id, title, sandbox_id, sandbox_provider, session_id, context_token_usage) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(chat.id.as_uuid())
        .bind(chat.user_id.as_uuid())
        .bind(&chat.title)
        .bind(&chat.sandbox_id)
        .bind(&chat.sandbox_provider)
        .bind(&chat.session_id)
        .bind(chat.context_token_usage)
        .execute(&self.pool)
        .await
        .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn get_chat(&self, id: ChatId) -> Result<Option<Chat>, StateError> {
        let table = self.config.chats_table();
        let row = sqlx::query(&format!("SELECT * FROM {table} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        row.map(|r| chat_from_row(&r).map(|(chat, _)| chat)).transpose()
    }

    async fn update_chat(&self, chat: &Chat) -> Result<(), StateError> {
        let table = self.config.chats_table();
        sqlx::query(&format!(
            "UPDATE {table} SET title = $2, sandbox_id = $3, sandbox_provider = $4, \
             session_id = $5, context_token_usage = $6 WHERE id = $1"
        ))
        .bind(chat.id.as_uuid())
        .bind(&chat.title)
        .bind(&chat.sandbox_id)
        .bind(&chat.sandbox_provider)
        .bind(&chat.session_id)
        .bind(chat.context_token_usage)
        .execute(&self.pool)
        .await
        .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn list_chats_by_user(&self, user_id: UserId, cursor: Option<&str>, limit: u32) -> Result<Page<Chat>, StateError> {
        let table = self.config.chats_table();
        let fetch_limit = i64::from(limit) + 1;

        let rows = if let Some(cursor) = cursor {
            let (created_at, id) = decode_cursor(cursor).map_err(|e| StateError::Backend(e.to_string()))?;
            sqlx::query(&format!(
                "SELECT * FROM {table} WHERE user_id = $1 \
                 AND (created_at, id) < ($2, $3) \
                 ORDER BY created_at DESC, id DESC LIMIT $4"
            ))
            .bind(user_id.as_uuid())
            .bind(created_at)
            .bind(id)
            .bind(fetch_limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(&format!(
                "SELECT * FROM {table} WHERE user_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2"
            ))
            .bind(user_id.as_uuid())
            .bind(fetch_limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| StateError::Backend(e.to_string()))?;

        paginate(rows, limit, chat_from_row)
    }

    async fn create_message(&self, message: &Message) -> Result<(), StateError> {
        let table = self.config.messages_table();
        sqlx::query(&format!(
            "INSERT INTO {table} \
             (id, chat_id, role, content, model_id, stream_status, total_cost_usd, session_id, \
              checkpoint_id, attachments) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(message.id.as_uuid())
        .bind(message.chat_id.as_uuid())
        .bind(message_role_to_str(message.role))
        .bind(&message.content)
        .bind(&message.model_id)
        .bind(message.stream_status.map(stream_status_to_str))
        .bind(message.total_cost_usd)
        .bind(&message.session_id)
        .bind(&message.checkpoint_id)
        .bind(attachments_to_json(&message.attachments)?)
        .execute(&self.pool)
        .await
        .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<Message>, StateError> {
        let table = self.config.messages_table();
        let row = sqlx::query(&format!("SELECT * FROM {table} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        row.map(|r| message_from_row(&r).map(|(message, _)| message)).transpose()
    }

    async fn update_message(&self, message: &Message) -> Result<(), StateError> {
        let table = self.config.messages_table();
        sqlx::query(&format!(
            "UPDATE {table} SET content = $2, stream_status = $3, total_cost_usd = $4, \
             session_id = $5, checkpoint_id = $6, attachments = $7 WHERE id = $1"
        ))
        .bind(message.id.as_uuid())
        .bind(&message.content)
        .bind(message.stream_status.map(stream_status_to_str))
        .bind(message.total_cost_usd)
        .bind(&message.session_id)
        .bind(&message.checkpoint_id)
        .bind(attachments_to_json(&message.attachments)?)
        .execute(&self.pool)
        .await
        .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn list_messages_by_chat(
        &self,
        chat_id: ChatId,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page<Message>, StateError> {
        let table = self.config.messages_table();
        let fetch_limit = i64::from(limit) + 1;

        let rows = if let Some(cursor) = cursor {
            let (created_at, id) = decode_cursor(cursor).map_err(|e| StateError::Backend(e.to_string()))?;
            sqlx::query(&format!(
                "SELECT * FROM {table} WHERE chat_id = $1 \
                 AND (created_at, id) < ($2, $3) \
                 ORDER BY created_at DESC, id DESC LIMIT $4"
            ))
            .bind(chat_id.as_uuid())
            .bind(created_at)
            .bind(id)
            .bind(fetch_limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(&format!(
                "SELECT * FROM {table} WHERE chat_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2"
            ))
            .bind(chat_id.as_uuid())
            .bind(fetch_limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| StateError::Backend(e.to_string()))?;

        paginate(rows, limit, message_from_row)
    }

    async fn find_in_progress_message(&self, chat_id: ChatId) -> Result<Option<Message>, StateError> {
        let table = self.config.messages_table();
        let row = sqlx::query(&format!(
            "SELECT * FROM {table} WHERE chat_id = $1 AND stream_status = 'in_progress' LIMIT 1"
        ))
        .bind(chat_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StateError::Backend(e.to_string()))?;

        row.map(|r| message_from_row(&r).map(|(message, _)| message)).transpose()
    }

    async fn create_scheduled_task(&self, task: &ScheduledTask) -> Result<(), StateError> {
        let table = self.config.scheduled_tasks_table();
        sqlx::query(&format!(
            "INSERT INTO {table} \
             (id, user_id, task_name, prompt_message, model_id, recurrence_type, scheduled_time, \
              scheduled_day, status, enabled, next_execution, execution_count, failure_count, \
              last_execution, last_error) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
        ))
        .bind(task.id.as_uuid())
        .bind(task.user_id.as_uuid())
        .bind(&task.task_name)
        .bind(&task.prompt_message)
        .bind(&task.model_id)
        .bind(recurrence_to_str(task.recurrence_type))
        .bind(task.scheduled_time)
        .bind(task.scheduled_day.map(|d| i32::try_from(d).unwrap_or(0)))
        .bind(task_status_to_str(task.status))
        .bind(task.enabled)
        .bind(task.next_execution)
        .bind(i64::try_from(task.execution_count).unwrap_or(i64::MAX))
        .bind(i64::try_from(task.failure_count).unwrap_or(i64::MAX))
        .bind(task.last_execution)
        .bind(&task.last_error)
        .execute(&self.pool)
        .await
        .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn get_scheduled_task(&self, id: TaskId) -> Result<Option<ScheduledTask>, StateError> {
        let table = self.config.scheduled_tasks_table();
        let row = sqlx::query(&format!("SELECT * FROM {table} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        row.map(|r| task_from_row(&r)).transpose()
    }

    async fn update_scheduled_task(&self, task: &ScheduledTask) -> Result<(), StateError> {
        let table = self.config.scheduled_tasks_table();
        sqlx::query(&format!(
            "UPDATE {table} SET task_name = $2, prompt_message = $3, model_id = $4, \
             recurrence_type = $5, scheduled_time = $6, scheduled_day = $7, status = $8, \
             enabled = $9, next_execution = $10, execution_count = $11, failure_count = $12, \
             last_execution = $13, last_error = $14 WHERE id = $1"
        ))
        .bind(task.id.as_uuid())
        .bind(&task.task_name)
        .bind(&task.prompt_message)
        .bind(&task.model_id)
        .bind(recurrence_to_str(task.recurrence_type))
        .bind(task.scheduled_time)
        .bind(task.scheduled_day.map(|d| i32::try_from(d).unwrap_or(0)))
        .bind(task_status_to_str(task.status))
        .bind(task.enabled)
        .bind(task.next_execution)
        .bind(i64::try_from(task.execution_count).unwrap_or(i64::MAX))
        .bind(i64::try_from(task.failure_count).unwrap_or(i64::MAX))
        .bind(task.last_execution)
        .bind(&task.last_error)
        .execute(&self.pool)
        .await
        .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn list_scheduled_tasks_by_user(&self, user_id: UserId) -> Result<Vec<ScheduledTask>, StateError> {
        let table = self.config.scheduled_tasks_table();
        let rows = sqlx::query(&format!("SELECT * FROM {table} WHERE user_id = $1"))
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        rows.iter().map(task_from_row).collect()
    }

    async fn delete_scheduled_task(&self, id: TaskId) -> Result<(), StateError> {
        let table = self.config.scheduled_tasks_table();
        sqlx::query(&format!("DELETE FROM {table} WHERE id = $1"))
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn count_active_tasks_for_user(&self, user_id: UserId) -> Result<i64, StateError> {
        let table = self.config.scheduled_tasks_table();
        let row = sqlx::query(&format!(
            "SELECT COUNT(*) AS n FROM {table} WHERE user_id = $1 AND enabled \
             AND status IN ('active', 'pending')"
        ))
        .bind(user_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StateError::Backend(e.to_string()))?;

        row.try_get("n").map_err(|e| StateError::Backend(e.to_string()))
    }

    async fn list_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>, StateError> {
        let table = self.config.scheduled_tasks_table();
        let rows = sqlx::query(&format!(
            "SELECT * FROM {table} WHERE enabled AND status = 'active' \
             AND next_execution IS NOT NULL AND next_execution <= $1 \
             ORDER BY next_execution ASC LIMIT 100"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StateError::Backend(e.to_string()))?;

        rows.iter().map(task_from_row).collect()
    }

    async fn create_task_execution(&self, execution: &TaskExecution) -> Result<(), StateError> {
        let table = self.config.task_executions_table();
        sqlx::query(&format!(
            "INSERT INTO {table} \
             (id, task_id, executed_at, completed_at, status, error_message, chat_id, message_id, duration_ms) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(execution.id.as_uuid())
        .bind(execution.task_id.as_uuid())
        .bind(execution.executed_at)
        .bind(execution.completed_at)
        .bind(execution_status_to_str(execution.status))
        .bind(&execution.error_message)
        .bind(execution.chat_id.map(|c| c.as_uuid()))
        .bind(execution.message_id.map(|m| m.as_uuid()))
        .bind(execution.duration_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn update_task_execution(&self, execution: &TaskExecution) -> Result<(), StateError> {
        let table = self.config.task_executions_table();
        sqlx::query(&format!(
            "UPDATE {table} SET completed_at = $2, status = $3, error_message = $4, \
             chat_id = $5, message_id = $6, duration_ms = $7 WHERE id = $1"
        ))
        .bind(execution.id.as_uuid())
        .bind(execution.completed_at)
        .bind(execution_status_to_str(execution.status))
        .bind(&execution.error_message)
        .bind(execution.chat_id.map(|c| c.as_uuid()))
        .bind(execution.message_id.map(|m| m.as_uuid()))
        .bind(execution.duration_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn find_recent_execution(&self, task_id: TaskId, since: DateTime<Utc>) -> Result<Option<TaskExecution>, StateError> {
        let table = self.config.task_executions_table();
        let row = sqlx::query(&format!(
            "SELECT * FROM {table} WHERE task_id = $1 AND executed_at >= $2 \
             ORDER BY executed_at DESC LIMIT 1"
        ))
        .bind(task_id.as_uuid())
        .bind(since)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StateError::Backend(e.to_string()))?;

        row.as_ref().map(execution_from_row).transpose()
    }

    async fn list_task_executions(
        &self,
        task_id: TaskId,
        offset: u32,
        limit: u32,
    ) -> Result<(Vec<TaskExecution>, i64), StateError> {
        let table = self.config.task_executions_table();

        let count_row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {table} WHERE task_id = $1"))
            .bind(task_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;
        let total: i64 = count_row.try_get("n").map_err(|e| StateError::Backend(e.to_string()))?;

        let rows = sqlx::query(&format!(
            "SELECT * FROM {table} WHERE task_id = $1 ORDER BY executed_at DESC OFFSET $2 LIMIT $3"
        ))
        .bind(task_id.as_uuid())
        .bind(i64::from(offset))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StateError::Backend(e.to_string()))?;

        let items = rows.iter().map(execution_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok((items, total))
    }
}

/// Split a `limit + 1`-sized row fetch into a page plus a next cursor,
/// computed from the last retained row's `(created_at, id)`.
fn paginate<T>(
    rows: Vec<PgRow>,
    limit: u32,
    from_row: impl Fn(&PgRow) -> Result<(T, DateTime<Utc>), StateError>,
) -> Result<Page<T>, StateError>
where
    T: HasId,
{
    let limit = limit as usize;
    let mut decoded = rows.iter().map(from_row).collect::<Result<Vec<_>, _>>()?;
    let next_cursor = if decoded.len() > limit {
        decoded.truncate(limit);
        decoded.last().map(|(item, created_at)| encode_cursor(*created_at, item.id()))
    } else {
        None
    };

    Ok(Page {
        items: decoded.into_iter().map(|(item, _)| item).collect(),
        next_cursor,
    })
}

trait HasId {
    fn id(&self) -> Uuid;
}

impl HasId for Chat {
    fn id(&self) -> Uuid {
        self.id.as_uuid()
    }
}

impl HasId for Message {
    fn id(&self) -> Uuid {
        self.id.as_uuid()
    }
}
