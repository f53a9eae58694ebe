use async_trait::async_trait;
use tracing::info;

use chatflow_core::{ChatId, MessageId, ScheduledTask};
use chatflow_orchestrator::{DispatchOutcome, ProviderError, ScheduledTaskDispatcher};

/// Logs the fire and reports success without driving an actual chat turn.
///
/// `ScheduledTaskDispatcher` is deliberately abstract: turning a task's
/// prompt into a chat message is outside this crate's scope, the same way
/// `AgentProvider` leaves the concrete model backend unspecified. This
/// mirrors the teacher's `"log"` provider type (`ProviderConfig` with
/// `type = "log"`), which exists for exactly this purpose — a dependency-free
/// stand-in so the runner binary has something concrete to wire up and run.
pub struct LoggingDispatcher;

#[async_trait]
impl ScheduledTaskDispatcher for LoggingDispatcher {
    async fn dispatch(&self, task: &ScheduledTask) -> Result<DispatchOutcome, ProviderError> {
        info!(
            task_id = %task.id,
            task_name = %task.task_name,
            model_id = %task.model_id,
            "scheduled task fired (log dispatcher, no chat turn driven)"
        );
        Ok(DispatchOutcome {
            chat_id: ChatId::new(),
            message_id: MessageId::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use chatflow_core::{RecurrenceType, UserId};

    use super::*;

    #[tokio::test]
    async fn logs_and_reports_success() {
        let task = ScheduledTask::new(
            UserId::new(),
            "digest",
            "summarize",
            "claude-3",
            RecurrenceType::Daily,
            chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            None,
            None,
        );

        let result = LoggingDispatcher.dispatch(&task).await;
        assert!(result.is_ok());
    }
}
