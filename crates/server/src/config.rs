use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use chatflow_state_postgres::PostgresConfig;
use chatflow_state_redis::RedisConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
    #[error("{0}")]
    Invalid(String),
}

/// Poll intervals and the other runner-wide knobs spec.md leaves as fixed
/// constants (`MAX_QUEUE_SIZE`, `STREAM_MAX_LEN`, `TASK_TTL_SECONDS`, ...)
/// but a real deployment wants to tune per environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// How often [`chatflow_orchestrator::SchedulerRunner`] checks for due tasks.
    pub scheduler_check_interval_seconds: u64,
    /// How often a `CancellationWatcher` polls a chat's revocation flag.
    pub revocation_poll_interval_seconds: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            scheduler_check_interval_seconds: 60,
            revocation_poll_interval_seconds: 2,
        }
    }
}

impl RunnerConfig {
    #[must_use]
    pub fn scheduler_check_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_check_interval_seconds)
    }

    #[must_use]
    pub fn revocation_poll_interval(&self) -> Duration {
        Duration::from_secs(self.revocation_poll_interval_seconds)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler_check_interval_seconds == 0 {
            return Err(ConfigError::Invalid("scheduler_check_interval_seconds must be > 0".into()));
        }
        if self.revocation_poll_interval_seconds == 0 {
            return Err(ConfigError::Invalid("revocation_poll_interval_seconds must be > 0".into()));
        }
        Ok(())
    }
}

/// Which state backend pair (`Repository` + `StateStore`/`ChatLog`) to wire up.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// In-process test doubles. Good for local development, not durable.
    #[default]
    Memory,
    /// `PostgreSQL` repository paired with the Redis-backed live store.
    Durable,
}

/// Top-level runner configuration, loaded from a TOML file (if present) with
/// defaults filling in everything else.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: Backend,
    pub runner: RunnerConfig,
    pub database: PostgresConfigToml,
    pub redis: RedisConfigToml,
}

/// TOML-deserializable mirror of [`PostgresConfig`]; kept separate since the
/// upstream struct doesn't derive `Deserialize`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostgresConfigToml {
    pub url: String,
    pub pool_size: u32,
    pub schema: String,
    pub table_prefix: String,
    pub ssl_mode: Option<String>,
}

impl Default for PostgresConfigToml {
    fn default() -> Self {
        let defaults = PostgresConfig::default();
        Self {
            url: defaults.url,
            pool_size: defaults.pool_size,
            schema: defaults.schema,
            table_prefix: defaults.table_prefix,
            ssl_mode: defaults.ssl_mode,
        }
    }
}

impl From<PostgresConfigToml> for PostgresConfig {
    fn from(value: PostgresConfigToml) -> Self {
        Self {
            url: value.url,
            pool_size: value.pool_size,
            schema: value.schema,
            table_prefix: value.table_prefix,
            ssl_mode: value.ssl_mode,
            ssl_root_cert: None,
            ssl_cert: None,
            ssl_key: None,
        }
    }
}

/// TOML-deserializable mirror of [`RedisConfig`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfigToml {
    pub url: String,
    pub prefix: String,
    pub pool_size: usize,
    pub tls_enabled: bool,
}

impl Default for RedisConfigToml {
    fn default() -> Self {
        let defaults = RedisConfig::default();
        Self {
            url: defaults.url,
            prefix: defaults.prefix,
            pool_size: defaults.pool_size,
            tls_enabled: defaults.tls_enabled,
        }
    }
}

impl From<RedisConfigToml> for RedisConfig {
    fn from(value: RedisConfigToml) -> Self {
        let defaults = RedisConfig::default();
        Self {
            url: value.url,
            prefix: value.prefix,
            pool_size: value.pool_size,
            tls_enabled: value.tls_enabled,
            ..defaults
        }
    }
}

impl AppConfig {
    /// Load from `path` if it exists, otherwise fall back to defaults.
    /// `CHATFLOW_DATABASE_URL`/`CHATFLOW_REDIS_URL` environment variables
    /// override the file when set, so connection secrets never need to live
    /// in a committed TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?
        } else {
            Self::default()
        };

        if let Ok(url) = std::env::var("CHATFLOW_DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(url) = std::env::var("CHATFLOW_REDIS_URL") {
            config.redis.url = url;
        }

        config.runner.validate()?;
        Ok(config)
    }
}
