pub mod api_key;

use std::collections::HashMap;

use self::api_key::{ApiKeyConfig, ApiKeyEntry, authenticate_api_key, build_api_key_table};

/// The ambient API-key auth primitive: a sha256-hex lookup from a raw key to
/// the [`chatflow_core::UserId`] it authenticates as.
///
/// Not part of the model/provider validation in
/// `chatflow_orchestrator::validate_api_key` (that checks a user's own
/// configured providers, not caller identity) — this is the table a runnable
/// server needs to know which user is making a request at all.
pub struct ApiKeyTable {
    entries: HashMap<String, ApiKeyEntry>,
}

impl ApiKeyTable {
    #[must_use]
    pub fn new(configs: &[ApiKeyConfig]) -> Self {
        Self {
            entries: build_api_key_table(configs),
        }
    }

    #[must_use]
    pub fn authenticate(&self, raw_key: &str) -> Option<&ApiKeyEntry> {
        authenticate_api_key(raw_key, &self.entries)
    }
}
