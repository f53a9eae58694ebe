use std::sync::Arc;

use chatflow_core::{Attachment, ChatId, Message, StreamEvent};
use chatflow_state::{ChatLog, LogEntry, Repository, StateError};

use crate::provider::{AgentProvider, ProviderError};
use crate::queue_service::QueueService;

/// Injects the next queued message into an active stream at a safe
/// boundary.
///
/// Grounded on `QueueInjector` in `queue_injector.py`: `check_and_inject`
/// mirrors its pop-then-persist-then-publish-then-write sequence exactly,
/// `should_try_injection` is `StreamEvent::is_injection_safe` (already on
/// the event type itself), and `prepare_user_prompt` keeps the same
/// `<user_attachments>`/`<user_prompt>` wrapping.
pub struct QueueInjector {
    chat_id: ChatId,
    log: Arc<dyn ChatLog>,
    repository: Arc<dyn Repository>,
    queue: QueueService,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueInjectorError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl QueueInjector {
    #[must_use]
    pub fn new(chat_id: ChatId, log: Arc<dyn ChatLog>, repository: Arc<dyn Repository>) -> Self {
        Self {
            chat_id,
            log: log.clone(),
            repository,
            queue: QueueService::new(log),
        }
    }

    /// `true` if a queued message was popped and written to the provider
    /// transport, `false` if the queue was empty.
    pub async fn check_and_inject(
        &self,
        provider: &mut dyn AgentProvider,
    ) -> Result<bool, QueueInjectorError> {
        if !self.queue.has_messages(self.chat_id).await? {
            return Ok(false);
        }

        let Some(queued) = self.queue.pop_next_message(self.chat_id).await? else {
            return Ok(false);
        };

        let user_message = Message::user(self.chat_id, &queued.content).with_attachments(queued.attachments.clone());
        self.repository.create_message(&user_message).await?;

        let assistant_message = Message::assistant_in_progress(self.chat_id, &queued.model_id);
        self.repository.create_message(&assistant_message).await?;

        self.publish_injection_event(&queued.id.to_string(), &user_message, &assistant_message, &queued.content, &queued.model_id)
            .await?;

        let session_id = self
            .repository
            .get_chat(self.chat_id)
            .await?
            .and_then(|chat| chat.session_id);

        let prompt = prepare_user_prompt(&queued.content, &user_message.attachments);
        let frame = serde_json::json!({
            "type": "user",
            "message": { "role": "user", "content": prompt },
            "parent_tool_use_id": serde_json::Value::Null,
            "session_id": session_id,
        });
        provider.write_injection(&frame).await?;

        Ok(true)
    }

    async fn publish_injection_event(
        &self,
        queued_message_id: &str,
        user_message: &Message,
        assistant_message: &Message,
        content: &str,
        model_id: &str,
    ) -> Result<(), StateError> {
        let attachments = (!user_message.attachments.is_empty()).then(|| {
            user_message
                .attachments
                .iter()
                .map(attachment_json)
                .collect::<Vec<_>>()
        });

        let payload = serde_json::json!({
            "queued_message_id": queued_message_id,
            "user_message_id": user_message.id.to_string(),
            "assistant_message_id": assistant_message.id.to_string(),
            "content": content,
            "model_id": model_id,
            "attachments": attachments,
        });

        self.log
            .append_stream_entry(self.chat_id, LogEntry::queue_injected(payload))
            .await
    }
}

fn attachment_json(attachment: &Attachment) -> serde_json::Value {
    serde_json::json!({
        "id": attachment.id.to_string(),
        "message_id": attachment.message_id.map(|id| id.to_string()),
        "file_url": attachment.file_url,
        "file_type": attachment.file_type,
        "filename": attachment.filename,
        "created_at": attachment.created_at.to_rfc3339(),
    })
}

fn prepare_user_prompt(content: &str, attachments: &[Attachment]) -> String {
    if attachments.is_empty() {
        return format!("<user_prompt>{content}</user_prompt>");
    }

    let files_list = attachments
        .iter()
        .map(|att| format!("- /home/user/{}", att.filename))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "<user_attachments>\nUser uploaded the following files\n{files_list}\n</user_attachments>\n\n<user_prompt>{content}</user_prompt>"
    )
}

/// Whether a just-emitted event is a safe boundary to attempt an injection
/// after. Re-exported here for call-site readability; the real logic lives
/// on the event type.
#[must_use]
pub fn should_try_injection(event: &StreamEvent) -> bool {
    event.is_injection_safe()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chatflow_core::{PermissionMode, QueuedMessage};
    use chatflow_state_memory::{MemoryChatLog, MemoryRepository};

    use super::*;

    struct FakeProvider {
        written: Vec<serde_json::Value>,
    }

    #[async_trait]
    impl AgentProvider for FakeProvider {
        async fn next_event(&mut self) -> Result<Option<StreamEvent>, ProviderError> {
            Ok(None)
        }

        async fn cancel_active_stream(&mut self) -> Result<(), ProviderError> {
            Ok(())
        }

        fn total_cost_usd(&self) -> f64 {
            0.0
        }

        async fn write_injection(&mut self, frame: &serde_json::Value) -> Result<(), ProviderError> {
            self.written.push(frame.clone());
            Ok(())
        }

        fn session_id(&self) -> Option<&str> {
            None
        }
    }

    #[tokio::test]
    async fn check_and_inject_returns_false_when_queue_empty() {
        let chat_log: Arc<dyn ChatLog> = Arc::new(MemoryChatLog::default());
        let repository: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
        let injector = QueueInjector::new(ChatId::new(), chat_log, repository);
        let mut provider = FakeProvider { written: vec![] };

        assert!(!injector.check_and_inject(&mut provider).await.unwrap());
        assert!(provider.written.is_empty());
    }

    #[tokio::test]
    async fn check_and_inject_writes_wrapped_prompt_and_persists_messages() {
        let chat_id = ChatId::new();
        let chat_log: Arc<dyn ChatLog> = Arc::new(MemoryChatLog::default());
        let repository: Arc<dyn Repository> = Arc::new(MemoryRepository::new());

        let queue = QueueService::new(chat_log.clone());
        queue
            .add_message(chat_id, QueuedMessage::new("hello", "claude-3", PermissionMode::Auto))
            .await
            .unwrap();

        let injector = QueueInjector::new(chat_id, chat_log.clone(), repository);
        let mut provider = FakeProvider { written: vec![] };

        assert!(injector.check_and_inject(&mut provider).await.unwrap());
        assert_eq!(provider.written.len(), 1);
        let content = provider.written[0]["message"]["content"].as_str().unwrap();
        assert_eq!(content, "<user_prompt>hello</user_prompt>");

        let log = chat_log.read_stream(chat_id).await.unwrap();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn wraps_attachments_as_a_file_list() {
        let attachment = Attachment::new("url", "image/png", "photo.png");
        let wrapped = prepare_user_prompt("hi", std::slice::from_ref(&attachment));
        assert!(wrapped.contains("- /home/user/photo.png"));
        assert!(wrapped.ends_with("<user_prompt>hi</user_prompt>"));
    }
}
