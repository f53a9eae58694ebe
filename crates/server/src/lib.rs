pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod telemetry;

pub use config::{AppConfig, Backend, ConfigError, RunnerConfig};
pub use dispatch::LoggingDispatcher;
pub use error::ServerError;
