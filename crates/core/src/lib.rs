pub mod attachment;
pub mod chat;
pub mod cursor;
pub mod error;
pub mod ids;
pub mod message;
pub mod queue_message;
pub mod recurrence;
pub mod scheduled_task;
pub mod stream_event;
pub mod task_execution;
pub mod user;

pub use attachment::Attachment;
pub use chat::Chat;
pub use cursor::{decode_cursor, encode_cursor};
pub use error::{CoreError, CoreResult};
pub use ids::{ChatId, ExecutionId, MessageId, QueuedMessageId, TaskId, UserId};
pub use message::{Message, MessageRole, StreamStatus};
pub use queue_message::{MAX_QUEUE_SIZE, PermissionMode, QueuedMessage};
pub use recurrence::{
    RecurrenceRule, RecurrenceType, RecurrenceValidationError, next_fire,
    validate_recurrence_constraints,
};
pub use scheduled_task::{MAX_ACTIVE_TASKS_PER_USER, ScheduledTask, TaskStatus};
pub use stream_event::{StreamEvent, ToolRef};
pub use task_execution::{DEDUPE_WINDOW, ExecutionStatus, TaskExecution};
pub use user::{CustomProvider, ProviderModel, ProviderType, User, UserSettings};
