use thiserror::Error;

use chatflow_orchestrator::SchedulerRunnerError;
use chatflow_state::StateError;

use crate::config::ConfigError;

/// Errors that can occur while starting or running the chatflow runner binary.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("state backend error: {0}")]
    State(#[from] StateError),

    #[error("scheduler runner error: {0}")]
    SchedulerRunner(#[from] SchedulerRunnerError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
