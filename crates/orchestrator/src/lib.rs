pub mod api_key_validation;
pub mod cancellation;
pub mod provider;
pub mod queue_injector;
pub mod queue_service;
pub mod scheduler_runner;
pub mod scheduler_service;
pub mod stream_orchestrator;

pub use api_key_validation::{ApiKeyValidationError, validate_api_key};
pub use cancellation::CancellationWatcher;
pub use provider::{AgentProvider, ProviderError};
pub use queue_injector::{QueueInjector, QueueInjectorError, should_try_injection};
pub use queue_service::{QueueService, QueuedMessageView, new_queued_message};
pub use scheduler_runner::{
    DispatchOutcome, ScheduledTaskDispatcher, SchedulerRunner, SchedulerRunnerConfig, SchedulerRunnerError,
};
pub use scheduler_service::{ExecutionHistoryPage, NewTask, SchedulerError, SchedulerService, TaskUpdate};
pub use stream_orchestrator::{
    CheckpointProvider, ContextUsageRefresher, StreamContext, StreamOrchestrator, StreamOrchestratorConfig,
    StreamOrchestratorError,
};
