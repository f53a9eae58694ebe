pub mod chat_log;
pub mod repository;
pub mod store;

pub use chat_log::MemoryChatLog;
pub use repository::MemoryRepository;
pub use store::MemoryStateStore;
