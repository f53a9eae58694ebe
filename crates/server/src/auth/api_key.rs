use std::collections::HashMap;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use chatflow_core::UserId;

/// One row of the API key table, as loaded from configuration.
///
/// Stores the SHA-256 hash of the raw key rather than the key itself, so the
/// config file (and any logs of it) never carries a usable credential.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyConfig {
    pub key_hash: String,
    pub user_id: UserId,
    pub label: String,
}

/// A resolved entry in the in-memory API key lookup table.
#[derive(Debug, Clone)]
pub struct ApiKeyEntry {
    pub user_id: UserId,
    pub label: String,
}

/// Hash a raw API key to the lookup format (lowercase hex SHA-256).
///
/// Mirrors the teacher's `auth::api_key::hash_api_key`: callers never store
/// or compare raw keys, only their hash.
#[must_use]
pub fn hash_api_key(raw_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Build an in-memory lookup from `sha256_hex(raw_key) -> ApiKeyEntry`.
#[must_use]
pub fn build_api_key_table(configs: &[ApiKeyConfig]) -> HashMap<String, ApiKeyEntry> {
    configs
        .iter()
        .map(|cfg| {
            (
                cfg.key_hash.clone(),
                ApiKeyEntry {
                    user_id: cfg.user_id,
                    label: cfg.label.clone(),
                },
            )
        })
        .collect()
}

/// Look up a raw API key's owning user, if it's present in `table`.
#[must_use]
pub fn authenticate_api_key<'a>(raw_key: &str, table: &'a HashMap<String, ApiKeyEntry>) -> Option<&'a ApiKeyEntry> {
    table.get(&hash_api_key(raw_key))
}
