use chatflow_core::ChatId;

/// The control flag addressed by a [`StateKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// `chat:{id}:task` — task-liveness handle, set for the duration of an
    /// active stream with a TTL.
    Task,
    /// `chat:{id}:revoked` — set to `"1"` to request cooperative
    /// cancellation of the active stream.
    Revoked,
    /// `chat:{id}:context_usage` — cached context-token-usage JSON.
    ContextUsage,
}

impl KeyKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Revoked => "revoked",
            Self::ContextUsage => "context_usage",
        }
    }
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A control-flag key scoped to a single chat: `chat:{chat_id}:{kind}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey {
    pub chat_id: ChatId,
    pub kind: KeyKind,
}

impl StateKey {
    #[must_use]
    pub fn new(chat_id: ChatId, kind: KeyKind) -> Self {
        Self { chat_id, kind }
    }

    #[must_use]
    pub fn canonical(&self) -> String {
        format!("chat:{}:{}", self.chat_id, self.kind)
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_matches_external_interface_shape() {
        let chat_id = ChatId::new();
        let key = StateKey::new(chat_id, KeyKind::Revoked);
        assert_eq!(key.canonical(), format!("chat:{chat_id}:revoked"));
    }
}
