use std::sync::Arc;

use chrono::{NaiveTime, Utc};

use chatflow_core::{
    MAX_ACTIVE_TASKS_PER_USER, RecurrenceRule, RecurrenceType, RecurrenceValidationError, ScheduledTask,
    TaskExecution, TaskId, UserId, next_fire,
};
use chatflow_state::{Repository, StateError};

/// CRUD + the per-user active-task cap invariant.
///
/// Grounded on `SchedulerService` in `service.py`: the operation names,
/// ownership-by-`user_id` checks, and the `enabled false→true` revalidation
/// rule (`skip_validation` when the task was already enabled) are carried
/// over; persistence goes through [`Repository`] instead of SQLAlchemy.
pub struct SchedulerService {
    repository: Arc<dyn Repository>,
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Recurrence(#[from] RecurrenceValidationError),
    #[error("scheduled task not found")]
    NotFound,
    #[error("maximum number of active tasks ({0}) reached")]
    CapExceeded(usize),
}

pub struct NewTask {
    pub task_name: String,
    pub prompt_message: String,
    pub model_id: String,
    pub recurrence_type: RecurrenceType,
    pub scheduled_time: NaiveTime,
    pub scheduled_day: Option<u32>,
}

/// Partial update. Every field is "leave unchanged" when `None`, except
/// `scheduled_day`, which is doubly optional so a caller can explicitly
/// clear it (`Some(None)`) versus leave it untouched (`None`).
#[derive(Default)]
pub struct TaskUpdate {
    pub task_name: Option<String>,
    pub prompt_message: Option<String>,
    pub model_id: Option<String>,
    pub recurrence_type: Option<RecurrenceType>,
    pub scheduled_time: Option<NaiveTime>,
    pub scheduled_day: Option<Option<u32>>,
    pub enabled: Option<bool>,
}

pub struct ExecutionHistoryPage {
    pub items: Vec<TaskExecution>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
    pub pages: u32,
}

impl SchedulerService {
    #[must_use]
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository }
    }

    pub async fn create_task(&self, user_id: UserId, new_task: NewTask) -> Result<ScheduledTask, SchedulerError> {
        chatflow_core::validate_recurrence_constraints(new_task.recurrence_type, new_task.scheduled_day)?;

        let active = self.active_task_count(user_id, None).await?;
        if active >= MAX_ACTIVE_TASKS_PER_USER {
            return Err(SchedulerError::CapExceeded(MAX_ACTIVE_TASKS_PER_USER));
        }

        let rule = RecurrenceRule {
            recurrence_type: new_task.recurrence_type,
            scheduled_time: new_task.scheduled_time,
            scheduled_day: new_task.scheduled_day,
        };
        let next_execution = next_fire(&rule, Utc::now(), true);

        let task = ScheduledTask::new(
            user_id,
            new_task.task_name,
            new_task.prompt_message,
            new_task.model_id,
            new_task.recurrence_type,
            new_task.scheduled_time,
            new_task.scheduled_day,
            next_execution,
        );
        self.repository.create_scheduled_task(&task).await?;
        Ok(task)
    }

    /// Ordered by `next_execution` ascending, nulls last.
    pub async fn get_tasks(&self, user_id: UserId) -> Result<Vec<ScheduledTask>, SchedulerError> {
        let mut tasks = self.repository.list_scheduled_tasks_by_user(user_id).await?;
        tasks.sort_by(|a, b| match (a.next_execution, b.next_execution) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        Ok(tasks)
    }

    pub async fn get_task(&self, task_id: TaskId, user_id: UserId) -> Result<ScheduledTask, SchedulerError> {
        self.repository
            .get_scheduled_task(task_id)
            .await?
            .filter(|task| task.user_id == user_id)
            .ok_or(SchedulerError::NotFound)
    }

    pub async fn update_task(
        &self,
        task_id: TaskId,
        user_id: UserId,
        update: TaskUpdate,
    ) -> Result<ScheduledTask, SchedulerError> {
        let mut task = self.get_task(task_id, user_id).await?;
        let was_enabled = task.enabled;

        let mut scheduling_changed = false;
        if let Some(task_name) = update.task_name {
            task.task_name = task_name;
        }
        if let Some(prompt_message) = update.prompt_message {
            task.prompt_message = prompt_message;
        }
        if let Some(model_id) = update.model_id {
            task.model_id = model_id;
        }
        if let Some(recurrence_type) = update.recurrence_type {
            task.recurrence_type = recurrence_type;
            scheduling_changed = true;
        }
        if let Some(scheduled_time) = update.scheduled_time {
            task.scheduled_time = scheduled_time;
            scheduling_changed = true;
        }
        if let Some(scheduled_day) = update.scheduled_day {
            task.scheduled_day = scheduled_day;
            scheduling_changed = true;
        }

        if scheduling_changed {
            chatflow_core::validate_recurrence_constraints(task.recurrence_type, task.scheduled_day)?;
            task.next_execution = next_fire(&recurrence_rule(&task), Utc::now(), true);
        }

        if let Some(enabled) = update.enabled {
            if enabled {
                self.enable_task(&mut task, user_id, scheduling_changed, was_enabled).await?;
            } else {
                task.pause();
            }
        }

        self.repository.update_scheduled_task(&task).await?;
        Ok(task)
    }

    pub async fn delete_task(&self, task_id: TaskId, user_id: UserId) -> Result<(), SchedulerError> {
        self.get_task(task_id, user_id).await?;
        self.repository.delete_scheduled_task(task_id).await?;
        Ok(())
    }

    pub async fn toggle_task(&self, task_id: TaskId, user_id: UserId) -> Result<ScheduledTask, SchedulerError> {
        let mut task = self.get_task(task_id, user_id).await?;
        if task.enabled {
            task.pause();
        } else {
            self.enable_task(&mut task, user_id, true, false).await?;
        }
        self.repository.update_scheduled_task(&task).await?;
        Ok(task)
    }

    pub async fn get_execution_history(
        &self,
        task_id: TaskId,
        user_id: UserId,
        page: u32,
        per_page: u32,
    ) -> Result<ExecutionHistoryPage, SchedulerError> {
        self.get_task(task_id, user_id).await?;
        let offset = page.saturating_sub(1).saturating_mul(per_page);
        let (items, total) = self.repository.list_task_executions(task_id, offset, per_page).await?;
        let pages = if total > 0 {
            u32::try_from(total.div_ceil(i64::from(per_page))).unwrap_or(u32::MAX)
        } else {
            0
        };
        Ok(ExecutionHistoryPage {
            items,
            page,
            per_page,
            total,
            pages,
        })
    }

    /// Re-enable, re-checking the per-user cap unless `skip_validation`
    /// (the task was already enabled, so it's already counted). Recomputes
    /// `next_execution` only when it was cleared or a scheduling field
    /// changed this call.
    async fn enable_task(
        &self,
        task: &mut ScheduledTask,
        user_id: UserId,
        scheduling_changed: bool,
        skip_validation: bool,
    ) -> Result<(), SchedulerError> {
        if !skip_validation {
            chatflow_core::validate_recurrence_constraints(task.recurrence_type, task.scheduled_day)?;
            let active = self.active_task_count(user_id, Some(task.id)).await?;
            if active >= MAX_ACTIVE_TASKS_PER_USER {
                return Err(SchedulerError::CapExceeded(MAX_ACTIVE_TASKS_PER_USER));
            }
        }

        let next_execution = if task.next_execution.is_none() || scheduling_changed {
            next_fire(&recurrence_rule(task), Utc::now(), true)
        } else {
            None
        };
        task.reactivate(next_execution);
        Ok(())
    }

    async fn active_task_count(&self, user_id: UserId, exclude: Option<TaskId>) -> Result<usize, SchedulerError> {
        let tasks = self.repository.list_scheduled_tasks_by_user(user_id).await?;
        Ok(tasks
            .iter()
            .filter(|task| Some(task.id) != exclude && task.counts_against_cap())
            .count())
    }
}

fn recurrence_rule(task: &ScheduledTask) -> RecurrenceRule {
    RecurrenceRule {
        recurrence_type: task.recurrence_type,
        scheduled_time: task.scheduled_time,
        scheduled_day: task.scheduled_day,
    }
}

#[cfg(test)]
mod tests {
    use chatflow_state_memory::MemoryRepository;

    use super::*;

    fn service() -> SchedulerService {
        SchedulerService::new(Arc::new(MemoryRepository::new()))
    }

    fn daily_task(name: &str) -> NewTask {
        NewTask {
            task_name: name.into(),
            prompt_message: "summarize".into(),
            model_id: "claude-3".into(),
            recurrence_type: RecurrenceType::Daily,
            scheduled_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            scheduled_day: None,
        }
    }

    #[tokio::test]
    async fn create_task_fails_past_the_cap() {
        let service = service();
        let user_id = UserId::new();
        for i in 0..MAX_ACTIVE_TASKS_PER_USER {
            service.create_task(user_id, daily_task(&format!("task-{i}"))).await.unwrap();
        }

        let err = service.create_task(user_id, daily_task("overflow")).await.unwrap_err();
        assert!(matches!(err, SchedulerError::CapExceeded(10)));
    }

    #[tokio::test]
    async fn disabling_then_reenabling_a_task_does_not_recheck_the_cap() {
        let service = service();
        let user_id = UserId::new();
        let mut tasks = Vec::new();
        for i in 0..MAX_ACTIVE_TASKS_PER_USER {
            tasks.push(service.create_task(user_id, daily_task(&format!("task-{i}"))).await.unwrap());
        }

        let target = tasks[0].id;
        service.toggle_task(target, user_id).await.unwrap();
        let toggled = service.toggle_task(target, user_id).await.unwrap();
        assert!(toggled.enabled);
    }

    #[tokio::test]
    async fn toggling_a_disabled_task_enabled_fails_when_ten_others_are_enabled() {
        let service = service();
        let user_id = UserId::new();
        let mut tasks = Vec::new();
        for i in 0..MAX_ACTIVE_TASKS_PER_USER {
            tasks.push(service.create_task(user_id, daily_task(&format!("task-{i}"))).await.unwrap());
        }

        // free a slot, then refill it, leaving one disabled task alongside
        // ten enabled ones.
        service.toggle_task(tasks[0].id, user_id).await.unwrap();
        service.create_task(user_id, daily_task("refill")).await.unwrap();

        let err = service.toggle_task(tasks[0].id, user_id).await.unwrap_err();
        assert!(matches!(err, SchedulerError::CapExceeded(10)));
    }

    #[tokio::test]
    async fn get_task_rejects_mismatched_owner() {
        let service = service();
        let owner = UserId::new();
        let task = service.create_task(owner, daily_task("mine")).await.unwrap();

        let other = UserId::new();
        assert!(matches!(
            service.get_task(task.id, other).await.unwrap_err(),
            SchedulerError::NotFound
        ));
    }

    #[tokio::test]
    async fn delete_task_is_unconditional_for_the_owner() {
        let service = service();
        let user_id = UserId::new();
        let task = service.create_task(user_id, daily_task("mine")).await.unwrap();

        service.delete_task(task.id, user_id).await.unwrap();
        assert!(matches!(
            service.get_task(task.id, user_id).await.unwrap_err(),
            SchedulerError::NotFound
        ));
    }

    #[tokio::test]
    async fn update_task_revalidates_recurrence_on_schedule_change() {
        let service = service();
        let user_id = UserId::new();
        let task = service.create_task(user_id, daily_task("mine")).await.unwrap();

        let update = TaskUpdate {
            recurrence_type: Some(RecurrenceType::Weekly),
            scheduled_day: Some(None),
            ..Default::default()
        };
        let err = service.update_task(task.id, user_id, update).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Recurrence(_)));
    }
}
