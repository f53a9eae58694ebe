pub mod chat_log;
pub mod config;
pub mod key_render;
pub mod store;

pub use chat_log::RedisChatLog;
pub use config::RedisConfig;
pub use store::RedisStateStore;
