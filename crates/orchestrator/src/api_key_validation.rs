use chatflow_core::{ProviderType, UserSettings};

/// Validate that `model_id` is dispatchable under `settings.custom_providers`.
///
/// No teacher analog; authored directly from the contract: find the
/// provider whose model list contains `model_id`, then check disabled-ness
/// and the credential the provider type requires.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiKeyValidationError {
    #[error("no provider configured for model {0}")]
    NoProviderConfigured(String),
    #[error("provider {0} is disabled")]
    ProviderDisabled(String),
    #[error("provider {0} requires an auth token")]
    MissingAuthToken(String),
    #[error("provider {0} requires a base url")]
    MissingBaseUrl(String),
}

pub fn validate_api_key(settings: &UserSettings, model_id: &str) -> Result<(), ApiKeyValidationError> {
    let provider = settings
        .custom_providers
        .iter()
        .find(|provider| provider.models.iter().any(|model| model.model_id == model_id))
        .ok_or_else(|| ApiKeyValidationError::NoProviderConfigured(model_id.to_string()))?;

    if !provider.enabled {
        return Err(ApiKeyValidationError::ProviderDisabled(provider.name.clone()));
    }

    match provider.provider_type {
        ProviderType::Anthropic | ProviderType::Openrouter => {
            if provider.auth_token.is_none() {
                return Err(ApiKeyValidationError::MissingAuthToken(provider.name.clone()));
            }
        }
        ProviderType::Custom => {
            if provider.base_url.is_none() {
                return Err(ApiKeyValidationError::MissingBaseUrl(provider.name.clone()));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chatflow_core::{CustomProvider, ProviderModel, UserId};

    use super::*;

    fn settings_with(provider: CustomProvider) -> UserSettings {
        let mut settings = UserSettings::new(UserId::new());
        settings.custom_providers.push(provider);
        settings
    }

    fn model(model_id: &str) -> ProviderModel {
        ProviderModel {
            model_id: model_id.into(),
            name: model_id.into(),
            enabled: true,
        }
    }

    #[test]
    fn no_provider_configured_for_unknown_model() {
        let settings = UserSettings::new(UserId::new());
        assert!(matches!(
            validate_api_key(&settings, "claude-3"),
            Err(ApiKeyValidationError::NoProviderConfigured(_))
        ));
    }

    #[test]
    fn disabled_provider_is_rejected() {
        let settings = settings_with(CustomProvider {
            id: "p1".into(),
            name: "Anthropic".into(),
            provider_type: ProviderType::Anthropic,
            base_url: None,
            auth_token: Some("tok".into()),
            enabled: false,
            models: vec![model("claude-3")],
        });
        assert!(matches!(
            validate_api_key(&settings, "claude-3"),
            Err(ApiKeyValidationError::ProviderDisabled(_))
        ));
    }

    #[test]
    fn anthropic_without_auth_token_is_rejected() {
        let settings = settings_with(CustomProvider {
            id: "p1".into(),
            name: "Anthropic".into(),
            provider_type: ProviderType::Anthropic,
            base_url: None,
            auth_token: None,
            enabled: true,
            models: vec![model("claude-3")],
        });
        assert!(matches!(
            validate_api_key(&settings, "claude-3"),
            Err(ApiKeyValidationError::MissingAuthToken(_))
        ));
    }

    #[test]
    fn custom_provider_without_base_url_is_rejected() {
        let settings = settings_with(CustomProvider {
            id: "p1".into(),
            name: "Local".into(),
            provider_type: ProviderType::Custom,
            base_url: None,
            auth_token: None,
            enabled: true,
            models: vec![model("local-model")],
        });
        assert!(matches!(
            validate_api_key(&settings, "local-model"),
            Err(ApiKeyValidationError::MissingBaseUrl(_))
        ));
    }

    #[test]
    fn fully_configured_provider_passes() {
        let settings = settings_with(CustomProvider {
            id: "p1".into(),
            name: "Anthropic".into(),
            provider_type: ProviderType::Anthropic,
            base_url: None,
            auth_token: Some("tok".into()),
            enabled: true,
            models: vec![model("claude-3")],
        });
        assert!(validate_api_key(&settings, "claude-3").is_ok());
    }
}
