use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChatId, ExecutionId, MessageId, TaskId};

/// Back-scan window for the scheduler's at-most-one-execution dedupe check.
pub const DEDUPE_WINDOW: chrono::Duration = chrono::Duration::minutes(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: ExecutionId,
    pub task_id: TaskId,
    pub executed_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
    pub chat_id: Option<ChatId>,
    pub message_id: Option<MessageId>,
    pub duration_ms: Option<i64>,
}

impl TaskExecution {
    #[must_use]
    pub fn start(task_id: TaskId, executed_at: DateTime<Utc>) -> Self {
        Self {
            id: ExecutionId::new(),
            task_id,
            executed_at,
            completed_at: None,
            status: ExecutionStatus::Running,
            error_message: None,
            chat_id: None,
            message_id: None,
            duration_ms: None,
        }
    }

    #[must_use]
    pub fn with_chat(mut self, chat_id: ChatId, message_id: MessageId) -> Self {
        self.chat_id = Some(chat_id);
        self.message_id = Some(message_id);
        self
    }

    pub fn complete_success(&mut self, completed_at: DateTime<Utc>) {
        self.status = ExecutionStatus::Success;
        self.duration_ms = Some((completed_at - self.executed_at).num_milliseconds());
        self.completed_at = Some(completed_at);
    }

    pub fn complete_failure(&mut self, completed_at: DateTime<Utc>, error_message: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.error_message = Some(error_message.into());
        self.duration_ms = Some((completed_at - self.executed_at).num_milliseconds());
        self.completed_at = Some(completed_at);
    }

    /// `true` if `self` would block a duplicate dispatch at `start_time`:
    /// this execution's `executed_at` falls within the dedupe window before
    /// `start_time` and it is still `RUNNING` or already `SUCCESS`.
    #[must_use]
    pub fn blocks_dispatch_at(&self, start_time: DateTime<Utc>) -> bool {
        matches!(self.status, ExecutionStatus::Running | ExecutionStatus::Success)
            && self.executed_at >= start_time - DEDUPE_WINDOW
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_5_dedupe_window_blocks_recent_running_execution() {
        let task_id = TaskId::new();
        let start = Utc::now();
        let prior = TaskExecution::start(task_id, start - chrono::Duration::minutes(1));
        assert!(prior.blocks_dispatch_at(start));
    }

    #[test]
    fn execution_outside_window_does_not_block() {
        let task_id = TaskId::new();
        let start = Utc::now();
        let prior = TaskExecution::start(task_id, start - chrono::Duration::minutes(3));
        assert!(!prior.blocks_dispatch_at(start));
    }

    #[test]
    fn failed_execution_does_not_block_dispatch() {
        let task_id = TaskId::new();
        let start = Utc::now();
        let mut prior = TaskExecution::start(task_id, start - chrono::Duration::seconds(30));
        prior.complete_failure(start - chrono::Duration::seconds(10), "boom");
        assert!(!prior.blocks_dispatch_at(start));
    }

    #[test]
    fn complete_success_records_duration() {
        let task_id = TaskId::new();
        let started = Utc::now();
        let mut execution = TaskExecution::start(task_id, started);
        let completed = started + chrono::Duration::seconds(5);
        execution.complete_success(completed);
        assert_eq!(execution.duration_ms, Some(5000));
        assert_eq!(execution.status, ExecutionStatus::Success);
    }
}
