use sqlx::PgPool;

use crate::config::PostgresConfig;

/// Run database migrations, creating the Durable Store Gateway's tables if
/// they do not exist.
///
/// # Errors
///
/// Returns a [`sqlx::Error`] if any DDL statement fails.
pub async fn run_migrations(pool: &PgPool, config: &PostgresConfig) -> Result<(), sqlx::Error> {
    let users = config.users_table();
    let user_settings = config.user_settings_table();
    let chats = config.chats_table();
    let messages = config.messages_table();
    let scheduled_tasks = config.scheduled_tasks_table();
    let task_executions = config.task_executions_table();
    let refresh_tokens = config.refresh_tokens_table();

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {users} (
            id UUID PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            username TEXT NOT NULL
        )"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {user_settings} (
            user_id UUID PRIMARY KEY REFERENCES {users}(id),
            custom_providers TEXT NOT NULL,
            sandbox_provider TEXT,
            feature_toggles TEXT NOT NULL
        )"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {chats} (
            id UUID PRIMARY KEY,
            user_id UUID NOT NULL REFERENCES {users}(id),
            title TEXT NOT NULL,
            sandbox_id TEXT,
            sandbox_provider TEXT,
            session_id TEXT,
            context_token_usage BIGINT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"
    ))
    .execute(pool)
    .await?;
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS {}chats_user_created_idx ON {chats} (user_id, created_at, id)",
        config.table_prefix
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {messages} (
            id UUID PRIMARY KEY,
            chat_id UUID NOT NULL REFERENCES {chats}(id),
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            model_id TEXT,
            stream_status TEXT,
            total_cost_usd DOUBLE PRECISION,
            session_id TEXT,
            checkpoint_id TEXT,
            attachments TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"
    ))
    .execute(pool)
    .await?;
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS {}messages_chat_created_idx ON {messages} (chat_id, created_at, id)",
        config.table_prefix
    ))
    .execute(pool)
    .await?;
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS {}messages_in_progress_idx ON {messages} (chat_id) WHERE stream_status = 'in_progress'",
        config.table_prefix
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {scheduled_tasks} (
            id UUID PRIMARY KEY,
            user_id UUID NOT NULL REFERENCES {users}(id),
            task_name TEXT NOT NULL,
            prompt_message TEXT NOT NULL,
            model_id TEXT NOT NULL,
            recurrence_type TEXT NOT NULL,
            scheduled_time TIME NOT NULL,
            scheduled_day INT,
            status TEXT NOT NULL,
            enabled BOOLEAN NOT NULL,
            next_execution TIMESTAMPTZ,
            execution_count BIGINT NOT NULL DEFAULT 0,
            failure_count BIGINT NOT NULL DEFAULT 0,
            last_execution TIMESTAMPTZ,
            last_error TEXT
        )"
    ))
    .execute(pool)
    .await?;
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS {}tasks_due_idx ON {scheduled_tasks} (next_execution) WHERE enabled",
        config.table_prefix
    ))
    .execute(pool)
    .await?;
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS {}tasks_user_active_idx ON {scheduled_tasks} (user_id) \
         WHERE enabled AND status IN ('active', 'pending')",
        config.table_prefix
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {task_executions} (
            id UUID PRIMARY KEY,
            task_id UUID NOT NULL REFERENCES {scheduled_tasks}(id),
            executed_at TIMESTAMPTZ NOT NULL,
            completed_at TIMESTAMPTZ,
            status TEXT NOT NULL,
            error_message TEXT,
            chat_id UUID,
            message_id UUID,
            duration_ms BIGINT
        )"
    ))
    .execute(pool)
    .await?;
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS {}executions_task_time_idx ON {task_executions} (task_id, executed_at DESC)",
        config.table_prefix
    ))
    .execute(pool)
    .await?;

    // Refresh tokens back the API-key/session auth layer in crates/server; no
    // Repository operations touch this table directly.
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {refresh_tokens} (
            id UUID PRIMARY KEY,
            user_id UUID NOT NULL REFERENCES {users}(id),
            token_hash TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            expires_at TIMESTAMPTZ NOT NULL,
            revoked BOOLEAN NOT NULL DEFAULT FALSE
        )"
    ))
    .execute(pool)
    .await?;

    Ok(())
}
