use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{TaskId, UserId};
use crate::recurrence::RecurrenceType;

/// Maximum number of `enabled = true` tasks with `status ∈ {ACTIVE, PENDING}`
/// a single user may hold at once.
pub const MAX_ACTIVE_TASKS_PER_USER: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Paused,
    Pending,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub user_id: UserId,
    pub task_name: String,
    pub prompt_message: String,
    pub model_id: String,
    pub recurrence_type: RecurrenceType,
    pub scheduled_time: NaiveTime,
    pub scheduled_day: Option<u32>,
    pub status: TaskStatus,
    pub enabled: bool,
    pub next_execution: Option<DateTime<Utc>>,
    pub execution_count: u64,
    pub failure_count: u64,
    pub last_execution: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl ScheduledTask {
    /// Construct a newly created task. `next_execution` is computed by the
    /// caller (`next_fire(.., allow_once=true)`) since `ScheduledTask` itself
    /// has no access to the clock-dependent recurrence engine.
    #[must_use]
    pub fn new(
        user_id: UserId,
        task_name: impl Into<String>,
        prompt_message: impl Into<String>,
        model_id: impl Into<String>,
        recurrence_type: RecurrenceType,
        scheduled_time: NaiveTime,
        scheduled_day: Option<u32>,
        next_execution: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            user_id,
            task_name: task_name.into(),
            prompt_message: prompt_message.into(),
            model_id: model_id.into(),
            recurrence_type,
            scheduled_time,
            scheduled_day,
            status: TaskStatus::Active,
            enabled: true,
            next_execution,
            execution_count: 0,
            failure_count: 0,
            last_execution: None,
            last_error: None,
        }
    }

    /// `true` if this task counts against the per-user active cap.
    #[must_use]
    pub fn counts_against_cap(&self) -> bool {
        self.enabled && matches!(self.status, TaskStatus::Active | TaskStatus::Pending)
    }

    /// Record a successful fire: advance counters, clear `last_error`, and
    /// apply the recomputed `next_execution`. `None` means the recurrence is
    /// exhausted (ONCE just fired) — the task is disabled and marked
    /// `COMPLETED`.
    pub fn record_success(&mut self, fired_at: DateTime<Utc>, next_execution: Option<DateTime<Utc>>) {
        self.execution_count += 1;
        self.last_execution = Some(fired_at);
        self.last_error = None;
        self.next_execution = next_execution;
        if next_execution.is_none() {
            self.enabled = false;
            self.status = TaskStatus::Completed;
        }
    }

    /// Record a failed fire: failed runs do not skip the schedule, so
    /// `next_execution` is recomputed the same as on success.
    pub fn record_failure(
        &mut self,
        error_message: impl Into<String>,
        next_execution: Option<DateTime<Utc>>,
    ) {
        self.failure_count += 1;
        self.last_error = Some(error_message.into());
        self.next_execution = next_execution;
        if next_execution.is_none() {
            self.enabled = false;
            self.status = TaskStatus::Completed;
        }
    }

    /// Pause: `enabled = false`, `status = PAUSED`, history untouched.
    pub fn pause(&mut self) {
        self.enabled = false;
        self.status = TaskStatus::Paused;
    }

    /// Re-enter `ACTIVE`, clear `last_error`. Caller supplies the recomputed
    /// `next_execution` (or `None` to leave it unchanged) per the rule that
    /// re-enabling only recomputes when it was cleared or a scheduling field
    /// changed.
    pub fn reactivate(&mut self, next_execution: Option<DateTime<Utc>>) {
        self.enabled = true;
        self.status = TaskStatus::Active;
        self.last_error = None;
        if let Some(next) = next_execution {
            self.next_execution = Some(next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noon() -> NaiveTime {
        NaiveTime::from_hms_opt(12, 0, 0).unwrap()
    }

    #[test]
    fn counts_against_cap_excludes_paused_and_completed() {
        let mut task = ScheduledTask::new(
            UserId::new(),
            "daily digest",
            "summarize",
            "claude-3",
            RecurrenceType::Daily,
            noon(),
            None,
            Some(Utc::now()),
        );
        assert!(task.counts_against_cap());
        task.pause();
        assert!(!task.counts_against_cap());
        task.status = TaskStatus::Completed;
        task.enabled = false;
        assert!(!task.counts_against_cap());
    }

    #[test]
    fn record_success_with_none_next_execution_completes_once_task() {
        let mut task = ScheduledTask::new(
            UserId::new(),
            "one-off",
            "run it",
            "claude-3",
            RecurrenceType::Once,
            noon(),
            None,
            Some(Utc::now()),
        );
        task.record_success(Utc::now(), None);
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(!task.enabled);
        assert_eq!(task.execution_count, 1);
    }

    #[test]
    fn record_failure_still_advances_schedule() {
        let mut task = ScheduledTask::new(
            UserId::new(),
            "daily digest",
            "summarize",
            "claude-3",
            RecurrenceType::Daily,
            noon(),
            None,
            Some(Utc::now()),
        );
        let next = Utc::now() + chrono::Duration::days(1);
        task.record_failure("provider timeout", Some(next));
        assert_eq!(task.failure_count, 1);
        assert_eq!(task.last_error.as_deref(), Some("provider timeout"));
        assert_eq!(task.next_execution, Some(next));
        assert_eq!(task.status, TaskStatus::Active);
    }

    #[test]
    fn reactivate_clears_error_and_reenters_active() {
        let mut task = ScheduledTask::new(
            UserId::new(),
            "daily digest",
            "summarize",
            "claude-3",
            RecurrenceType::Daily,
            noon(),
            None,
            Some(Utc::now()),
        );
        task.pause();
        task.last_error = Some("stale".into());
        task.reactivate(None);
        assert!(task.enabled);
        assert_eq!(task.status, TaskStatus::Active);
        assert!(task.last_error.is_none());
    }
}
