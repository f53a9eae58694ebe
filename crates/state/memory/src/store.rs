use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use chatflow_state::error::StateError;
use chatflow_state::key::StateKey;
use chatflow_state::store::StateStore;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self) -> bool {
        self.expires_at.is_none_or(|at| at > Instant::now())
    }
}

/// In-process [`StateStore`] test double, for unit tests and local
/// development without a Redis instance.
#[derive(Default)]
pub struct MemoryStateStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn check_and_set(&self, key: &StateKey, value: &str, ttl: Option<Duration>) -> Result<bool, StateError> {
        let canonical = key.canonical();
        if let Some(existing) = self.entries.get(&canonical)
            && existing.is_live()
        {
            return Ok(false);
        }
        self.entries.insert(
            canonical,
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &StateKey) -> Result<Option<String>, StateError> {
        let canonical = key.canonical();
        Ok(self.entries.get(&canonical).filter(|e| e.is_live()).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &StateKey, value: &str, ttl: Option<Duration>) -> Result<(), StateError> {
        self.entries.insert(
            key.canonical(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &StateKey) -> Result<bool, StateError> {
        Ok(self.entries.remove(&key.canonical()).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatflow_core::ChatId;
    use chatflow_state::KeyKind;

    #[tokio::test]
    async fn conformance() {
        let store = MemoryStateStore::new();
        chatflow_state::testing::run_store_conformance_tests(&store)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test]
    async fn expired_entry_is_treated_as_absent() {
        let store = MemoryStateStore::new();
        let key = StateKey::new(ChatId::new(), KeyKind::Revoked);
        store.set(&key, "1", Some(Duration::from_millis(1))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(store.get(&key).await.unwrap(), None);
    }
}
