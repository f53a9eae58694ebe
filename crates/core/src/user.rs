use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ids::UserId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub username: String,
}

/// Provider kind for a [`CustomProvider`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Anthropic,
    Openrouter,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderModel {
    pub model_id: String,
    pub name: String,
    pub enabled: bool,
}

/// One entry of `UserSettings.custom_providers`.
///
/// Persisted as envelope-encrypted JSON (see
/// [`chatflow_crypto::PayloadEncryptor`]); this struct is the plaintext
/// shape after decryption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomProvider {
    pub id: String,
    pub name: String,
    pub provider_type: ProviderType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    pub enabled: bool,
    pub models: Vec<ProviderModel>,
}

/// 1-1 with [`User`]. Provider credentials and `custom_providers` are
/// envelope-encrypted at rest; this struct holds the decrypted form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettings {
    pub user_id: UserId,
    pub custom_providers: Vec<CustomProvider>,
    #[serde(default)]
    pub sandbox_provider: Option<String>,
    #[serde(default)]
    pub feature_toggles: HashMap<String, bool>,
}

impl UserSettings {
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            custom_providers: Vec::new(),
            sandbox_provider: None,
            feature_toggles: HashMap::new(),
        }
    }

    /// Find the enabled provider+model pair serving `model_id`, if any.
    #[must_use]
    pub fn provider_for_model(&self, model_id: &str) -> Option<(&CustomProvider, &ProviderModel)> {
        self.custom_providers.iter().find_map(|provider| {
            provider
                .models
                .iter()
                .find(|m| m.model_id == model_id && m.enabled)
                .map(|model| (provider, model))
        })
    }
}
