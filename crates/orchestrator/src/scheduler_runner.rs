use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use chatflow_core::{
    ChatId, DEDUPE_WINDOW, MessageId, RecurrenceRule, ScheduledTask, TaskExecution, TaskStatus, next_fire,
};
use chatflow_state::{Repository, StateError};

use crate::provider::ProviderError;

/// Runs one due task to completion: turns its prompt into a chat message and
/// drives it to a result. Grounded on `run_scheduled_task` in runner.py; left
/// abstract since wiring a prompt into a concrete chat/agent flow is outside
/// this crate's seam.
#[async_trait]
pub trait ScheduledTaskDispatcher: Send + Sync {
    async fn dispatch(&self, task: &ScheduledTask) -> Result<DispatchOutcome, ProviderError>;
}

pub struct DispatchOutcome {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerRunnerConfig {
    pub check_interval: Duration,
}

impl Default for SchedulerRunnerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerRunnerError {
    #[error(transparent)]
    State(#[from] StateError),
}

/// Periodically polls for due tasks and dispatches each one.
///
/// Grounded on `check_due_tasks`/`run_scheduled_task` in
/// `execution.py`, restructured as a `tokio::select!` loop over a check
/// interval and a shutdown channel in the style of the teacher's
/// `BackgroundProcessor`, in place of a Celery beat schedule plus a
/// fire-and-forget worker task per tick.
pub struct SchedulerRunner {
    repository: Arc<dyn Repository>,
    dispatcher: Arc<dyn ScheduledTaskDispatcher>,
    config: SchedulerRunnerConfig,
    shutdown_rx: mpsc::Receiver<()>,
}

impl SchedulerRunner {
    #[must_use]
    pub fn new(
        repository: Arc<dyn Repository>,
        dispatcher: Arc<dyn ScheduledTaskDispatcher>,
        config: SchedulerRunnerConfig,
        shutdown_rx: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            repository,
            dispatcher,
            config,
            shutdown_rx,
        }
    }

    /// Build a runner plus the shutdown sender used to stop it.
    #[must_use]
    pub fn with_shutdown_channel(
        repository: Arc<dyn Repository>,
        dispatcher: Arc<dyn ScheduledTaskDispatcher>,
        config: SchedulerRunnerConfig,
    ) -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self::new(repository, dispatcher, config, rx), tx)
    }

    pub async fn run(&mut self) {
        info!("scheduler runner starting");
        let mut ticker = interval(self.config.check_interval);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("scheduler runner received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.check_due().await {
                        error!(error = %e, "error checking due tasks");
                    }
                }
            }
        }

        info!("scheduler runner stopped");
    }

    /// Advance every due task's schedule up front, then dispatch each one on
    /// its own task. Advancing before dispatch completes means a slow or
    /// failing run never leaves the same fire time eligible for a second
    /// pickup.
    async fn check_due(&self) -> Result<usize, SchedulerRunnerError> {
        let now = Utc::now();
        let due = self.repository.list_due_tasks(now).await?;
        let count = due.len();
        if due.is_empty() {
            return Ok(0);
        }
        debug!(count, "dispatching due scheduled tasks");

        for mut task in due {
            match next_fire(&recurrence_rule(&task), now, false) {
                Some(next) => task.next_execution = Some(next),
                None => {
                    task.next_execution = None;
                    task.status = TaskStatus::Pending;
                }
            }
            self.repository.update_scheduled_task(&task).await?;

            let repository = Arc::clone(&self.repository);
            let dispatcher = Arc::clone(&self.dispatcher);
            tokio::spawn(async move {
                run_scheduled_task(repository, dispatcher, task, now).await;
            });
        }

        Ok(count)
    }
}

/// Dedupe against a recent run, record the execution, dispatch, and persist
/// the outcome on both the [`TaskExecution`] and the owning [`ScheduledTask`].
async fn run_scheduled_task(
    repository: Arc<dyn Repository>,
    dispatcher: Arc<dyn ScheduledTaskDispatcher>,
    mut task: ScheduledTask,
    fired_at: DateTime<Utc>,
) {
    match repository.find_recent_execution(task.id, fired_at - DEDUPE_WINDOW).await {
        Ok(Some(recent)) if recent.blocks_dispatch_at(fired_at) => {
            debug!(task_id = %task.id, "skipping duplicate dispatch within the dedupe window");
            return;
        }
        Ok(_) => {}
        Err(e) => {
            warn!(task_id = %task.id, error = %e, "failed to check for a duplicate execution");
            return;
        }
    }

    let mut execution = TaskExecution::start(task.id, fired_at);
    if let Err(e) = repository.create_task_execution(&execution).await {
        error!(task_id = %task.id, error = %e, "failed to record task execution start");
        return;
    }

    let outcome = dispatcher.dispatch(&task).await;
    let completed_at = Utc::now();
    let next_execution = task.next_execution;

    match outcome {
        Ok(result) => {
            execution.chat_id = Some(result.chat_id);
            execution.message_id = Some(result.message_id);
            execution.complete_success(completed_at);
            task.record_success(fired_at, next_execution);
            info!(task_id = %task.id, "scheduled task dispatched");
        }
        Err(e) => {
            execution.complete_failure(completed_at, e.to_string());
            task.record_failure(e.to_string(), next_execution);
            warn!(task_id = %task.id, error = %e, "scheduled task dispatch failed");
        }
    }

    if let Err(e) = repository.update_task_execution(&execution).await {
        error!(task_id = %task.id, error = %e, "failed to persist task execution result");
    }
    if let Err(e) = repository.update_scheduled_task(&task).await {
        error!(task_id = %task.id, error = %e, "failed to persist scheduled task after execution");
    }
}

fn recurrence_rule(task: &ScheduledTask) -> RecurrenceRule {
    RecurrenceRule {
        recurrence_type: task.recurrence_type,
        scheduled_time: task.scheduled_time,
        scheduled_day: task.scheduled_day,
    }
}
