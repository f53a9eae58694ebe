pub mod chat_log;
pub mod error;
pub mod key;
pub mod repository;
pub mod store;
pub mod testing;

pub use chat_log::{ChatLog, LogEntry, LogEntryKind, QueueFullError};
pub use error::StateError;
pub use key::{KeyKind, StateKey};
pub use repository::{Page, Repository};
pub use store::StateStore;
