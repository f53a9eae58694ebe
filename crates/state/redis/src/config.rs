use std::time::Duration;

/// Configuration for the Redis-backed shared log, queue, and control-flag
/// store.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g. `redis://127.0.0.1:6379`).
    ///
    /// Use `rediss://` scheme for TLS connections. When `tls_enabled` is set,
    /// the URL scheme is automatically upgraded to `rediss://`.
    pub url: String,

    /// Key prefix applied to every Redis key to avoid collisions.
    pub prefix: String,

    /// Number of connections in the `deadpool-redis` pool.
    pub pool_size: usize,

    /// Timeout for acquiring a pooled connection.
    pub connection_timeout: Duration,

    /// Whether TLS is enabled. When `true`, a `redis://` URL is automatically
    /// upgraded to `rediss://`.
    pub tls_enabled: bool,

    /// Maximum approximate length of a per-chat stream log
    /// (`STREAM_MAX_LEN`).
    pub stream_max_len: usize,

    /// Maximum number of entries in a per-chat queue (`MAX_QUEUE_SIZE`).
    pub max_queue_size: usize,

    /// TTL applied to the per-chat task-liveness key (`TASK_TTL_SECONDS`).
    pub task_ttl: Duration,

    /// TTL applied to the per-chat queue key, refreshed on every write
    /// (`QUEUE_MESSAGE_TTL_SECONDS`).
    pub queue_message_ttl: Duration,

    /// TTL applied to the cached context-token-usage entry
    /// (`CONTEXT_USAGE_CACHE_TTL_SECONDS`).
    pub context_usage_cache_ttl: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: String::from("redis://127.0.0.1:6379"),
            prefix: String::from("chatflow"),
            pool_size: 10,
            connection_timeout: Duration::from_secs(5),
            tls_enabled: false,
            stream_max_len: 10_000,
            max_queue_size: chatflow_core::MAX_QUEUE_SIZE,
            task_ttl: Duration::from_secs(3600),
            queue_message_ttl: Duration::from_secs(86_400),
            context_usage_cache_ttl: Duration::from_secs(300),
        }
    }
}

impl RedisConfig {
    /// Return the effective connection URL, upgrading to `rediss://` when TLS
    /// is enabled.
    #[must_use]
    pub fn effective_url(&self) -> String {
        if self.tls_enabled && self.url.starts_with("redis://") {
            self.url.replacen("redis://", "rediss://", 1)
        } else {
            self.url.clone()
        }
    }
}
