use chatflow_state::StateKey;

/// Render a [`StateKey`] into a Redis key string with the given prefix.
///
/// The format is `prefix:chat:{chat_id}:{kind}`.
#[must_use]
pub fn render_key(prefix: &str, key: &StateKey) -> String {
    format!("{}:{}", prefix, key.canonical())
}

#[cfg(test)]
mod tests {
    use chatflow_core::ChatId;
    use chatflow_state::KeyKind;

    use super::*;

    #[test]
    fn renders_with_prefix() {
        let chat_id = ChatId::new();
        let key = StateKey::new(chat_id, KeyKind::Revoked);
        assert_eq!(
            render_key("chatflow", &key),
            format!("chatflow:chat:{chat_id}:revoked")
        );
    }
}
