use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;

use chatflow_state::error::StateError;
use chatflow_state::key::StateKey;
use chatflow_state::store::StateStore;

use crate::config::RedisConfig;
use crate::key_render::render_key;

/// Redis-backed implementation of [`StateStore`] for the task-liveness,
/// revocation, and context-usage control keys.
pub struct RedisStateStore {
    pool: Pool,
    prefix: String,
}

impl RedisStateStore {
    /// Create a new `RedisStateStore` from the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Connection`] if the pool cannot be created.
    pub fn new(config: &RedisConfig) -> Result<Self, StateError> {
        let cfg = Config::from_url(config.effective_url());
        let pool = cfg
            .builder()
            .map(|b| {
                b.max_size(config.pool_size)
                    .wait_timeout(Some(config.connection_timeout))
                    .runtime(Runtime::Tokio1)
                    .build()
            })
            .map_err(|e| StateError::Connection(e.to_string()))?
            .map_err(|e| StateError::Connection(e.to_string()))?;

        Ok(Self {
            pool,
            prefix: config.prefix.clone(),
        })
    }

    #[must_use]
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, StateError> {
        self.pool
            .get()
            .await
            .map_err(|e| StateError::Connection(e.to_string()))
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn check_and_set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StateError> {
        let redis_key = render_key(&self.prefix, key);
        let mut conn = self.conn().await?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(&redis_key).arg(value).arg("NX");
        if let Some(d) = ttl {
            cmd.arg("PX").arg(i64::try_from(d.as_millis()).unwrap_or(i64::MAX));
        }
        let set: Option<String> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(set.is_some())
    }

    async fn get(&self, key: &StateKey) -> Result<Option<String>, StateError> {
        let redis_key = render_key(&self.prefix, key);
        let mut conn = self.conn().await?;
        conn.get(&redis_key)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))
    }

    async fn set(&self, key: &StateKey, value: &str, ttl: Option<Duration>) -> Result<(), StateError> {
        let redis_key = render_key(&self.prefix, key);
        let mut conn = self.conn().await?;
        match ttl {
            Some(d) => {
                let secs = d.as_secs().max(1);
                let () = conn
                    .set_ex(&redis_key, value, secs)
                    .await
                    .map_err(|e| StateError::Backend(e.to_string()))?;
            }
            None => {
                let () = conn
                    .set(&redis_key, value)
                    .await
                    .map_err(|e| StateError::Backend(e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &StateKey) -> Result<bool, StateError> {
        let redis_key = render_key(&self.prefix, key);
        let mut conn = self.conn().await?;
        let deleted: i64 = conn
            .del(&redis_key)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;
        Ok(deleted > 0)
    }
}

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use super::*;

    fn test_config() -> RedisConfig {
        RedisConfig {
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            prefix: format!("chatflow-test-{}", uuid::Uuid::new_v4()),
            ..RedisConfig::default()
        }
    }

    #[tokio::test]
    async fn store_conformance() {
        let config = test_config();
        let store = RedisStateStore::new(&config).expect("pool creation should succeed");
        chatflow_state::testing::run_store_conformance_tests(&store)
            .await
            .expect("conformance tests should pass");
    }
}
