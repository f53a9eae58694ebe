use serde::{Deserialize, Serialize};

use crate::ids::{ChatId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub user_id: UserId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_provider: Option<String>,
    /// Opaque provider-issued session handle. May be rewritten mid-stream
    /// by the orchestrator's `session_update_callback`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_token_usage: Option<i64>,
}

impl Chat {
    #[must_use]
    pub fn new(user_id: UserId, title: impl Into<String>) -> Self {
        Self {
            id: ChatId::new(),
            user_id,
            title: title.into(),
            sandbox_id: None,
            sandbox_provider: None,
            session_id: None,
            context_token_usage: None,
        }
    }

    #[must_use]
    pub fn with_sandbox(mut self, sandbox_id: impl Into<String>, provider: impl Into<String>) -> Self {
        self.sandbox_id = Some(sandbox_id.into());
        self.sandbox_provider = Some(provider.into());
        self
    }

    /// Applied by the orchestrator when the provider issues a fresh session
    /// id mid-stream.
    pub fn set_session_id(&mut self, session_id: impl Into<String>) {
        self.session_id = Some(session_id.into());
    }
}
