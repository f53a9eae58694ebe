use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use chatflow_core::{Attachment, Chat, ChatId, CoreError, Message, MessageId, PermissionMode, StreamEvent, StreamStatus};
use chatflow_state::{ChatLog, KeyKind, LogEntry, Repository, StateError, StateKey, StateStore};

use crate::cancellation::CancellationWatcher;
use crate::provider::{AgentProvider, ProviderError};
use crate::queue_injector::QueueInjector;

/// Everything the Stream Orchestrator needs to run one stream, per the
/// component's documented inputs. `provider` is constructed by the caller —
/// sandbox/session setup is out of scope here.
pub struct StreamContext {
    pub chat: Chat,
    pub prompt: String,
    pub system_prompt: String,
    pub custom_instructions: Option<String>,
    pub model_id: String,
    pub permission_mode: PermissionMode,
    pub assistant_message_id: Option<MessageId>,
    pub thinking_mode: Option<String>,
    pub attachments: Vec<Attachment>,
    pub is_custom_prompt: bool,
}

/// Notified once the provider issues a fresh session id mid-stream, so a
/// sandbox-backed caller can refresh its cached context-token-usage. Out of
/// scope here beyond the seam; a no-op implementation is used when absent.
#[async_trait]
pub trait ContextUsageRefresher: Send + Sync {
    async fn refresh(&self, chat_id: ChatId);
}

/// Requests a sandbox checkpoint after a successful stream. Out of scope
/// beyond the seam — checkpoint failures are warnings, never stream
/// failures.
#[async_trait]
pub trait CheckpointProvider: Send + Sync {
    async fn checkpoint(&self, chat: &Chat) -> Result<Option<String>, ProviderError>;
}

#[derive(Debug, Clone, Copy)]
pub struct StreamOrchestratorConfig {
    pub task_ttl: Duration,
    pub revocation_poll_interval: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum StreamOrchestratorError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error("assistant message {0} not found")]
    MessageNotFound(MessageId),
    #[error("failed to serialize stream events: {0}")]
    Serialize(#[from] serde_json::Error),
    /// An empty-stream completion or cooperative cancellation, raised only
    /// after finalization has already persisted the terminal message.
    #[error(transparent)]
    Core(#[from] CoreError),
}

pub struct StreamOrchestrator {
    state: Arc<dyn StateStore>,
    log: Arc<dyn ChatLog>,
    repository: Arc<dyn Repository>,
    config: StreamOrchestratorConfig,
    context_usage_refresher: Option<Arc<dyn ContextUsageRefresher>>,
    checkpoint_provider: Option<Arc<dyn CheckpointProvider>>,
}

impl StreamOrchestrator {
    #[must_use]
    pub fn new(
        state: Arc<dyn StateStore>,
        log: Arc<dyn ChatLog>,
        repository: Arc<dyn Repository>,
        config: StreamOrchestratorConfig,
    ) -> Self {
        Self {
            state,
            log,
            repository,
            config,
            context_usage_refresher: None,
            checkpoint_provider: None,
        }
    }

    #[must_use]
    pub fn with_context_usage_refresher(mut self, refresher: Arc<dyn ContextUsageRefresher>) -> Self {
        self.context_usage_refresher = Some(refresher);
        self
    }

    #[must_use]
    pub fn with_checkpoint_provider(mut self, provider: Arc<dyn CheckpointProvider>) -> Self {
        self.checkpoint_provider = Some(provider);
        self
    }

    /// Runs one stream end to end. Finalization — persisting the assistant
    /// `Message` with its terminal `stream_status` and publishing the
    /// terminal log entry — always runs first. Only then does the outcome
    /// surface: `Ok` for a completed stream, `Err(CoreError::StreamCancelled)`
    /// carrying the emitted events for a cooperative cancellation, and
    /// `Err(CoreError::Agent)` for a provider failure or a completed stream
    /// that emitted no events. `Err` of any other variant means
    /// infrastructure failure (state/repository I/O) that left nothing to
    /// finalize.
    pub async fn process_stream(
        &self,
        ctx: StreamContext,
        provider: &mut dyn AgentProvider,
    ) -> Result<Message, StreamOrchestratorError> {
        let chat_id = ctx.chat.id;

        tracing::info!(
            chat_id = %chat_id,
            model_id = %ctx.model_id,
            is_custom_prompt = ctx.is_custom_prompt,
            "starting stream"
        );

        let mut message = self.load_or_create_assistant_message(&ctx).await?;

        let task_key = StateKey::new(chat_id, KeyKind::Task);
        let task_handle = Uuid::new_v4().to_string();
        self.state.set(&task_key, &task_handle, Some(self.config.task_ttl)).await?;

        let watcher = CancellationWatcher::new(self.state.clone(), chat_id, self.config.revocation_poll_interval);
        watcher.clear_stale_flag().await?;

        let queue_injector = QueueInjector::new(chat_id, self.log.clone(), self.repository.clone());

        let mut chat = ctx.chat;
        let mut events: Vec<StreamEvent> = Vec::new();
        let mut last_session_id = chat.session_id.clone();
        let mut failure: Option<String> = None;
        let mut cancelled = false;

        loop {
            tokio::select! {
                revoked = watcher.wait_for_revocation() => {
                    revoked?;
                    if watcher.should_request_cancel() {
                        if let Err(err) = provider.cancel_active_stream().await {
                            tracing::warn!(chat_id = %chat_id, error = %err, "provider cancellation failed");
                        }
                    }
                    cancelled = true;
                    break;
                }
                next = provider.next_event() => {
                    match next {
                        Ok(Some(event)) => {
                            self.handle_event(chat_id, &mut chat, &mut last_session_id, provider.session_id(), &event).await;
                            events.push(event.clone());

                            if event.is_injection_safe() {
                                if let Err(err) = queue_injector.check_and_inject(provider).await {
                                    tracing::warn!(chat_id = %chat_id, error = %err, "queue injection failed");
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            failure = Some(err.to_string());
                            break;
                        }
                    }
                }
            }
        }

        let (status, agent_failure_reason) = if cancelled {
            (StreamStatus::Interrupted, None)
        } else if let Some(err) = failure {
            tracing::warn!(chat_id = %chat_id, error = %err, "stream failed");
            (StreamStatus::Failed, Some(err))
        } else if events.is_empty() {
            tracing::warn!(chat_id = %chat_id, "stream completed without emitting any events");
            (StreamStatus::Failed, Some("stream completed without emitting any events".to_string()))
        } else {
            (StreamStatus::Completed, None)
        };

        let content = serde_json::to_string(&events)?;
        message.finalize(status, content, Some(provider.total_cost_usd()));

        if status == StreamStatus::Completed {
            if let Some(checkpoint_provider) = &self.checkpoint_provider {
                match checkpoint_provider.checkpoint(&chat).await {
                    Ok(Some(checkpoint_id)) => message.checkpoint_id = Some(checkpoint_id),
                    Ok(None) => {}
                    Err(err) => tracing::warn!(chat_id = %chat_id, error = %err, "checkpoint request failed"),
                }
            }
        }

        self.repository.update_message(&message).await?;

        let terminal_entry = match &agent_failure_reason {
            Some(reason) => LogEntry::error(reason.clone()),
            None => LogEntry::complete(),
        };
        if let Err(err) = self.log.append_stream_entry(chat_id, terminal_entry).await {
            tracing::warn!(chat_id = %chat_id, error = %err, "failed to publish terminal log entry");
        }

        self.state.delete(&task_key).await?;
        watcher.clear_stale_flag().await?;

        match status {
            StreamStatus::Interrupted => Err(CoreError::StreamCancelled { final_content: events }.into()),
            StreamStatus::Failed => Err(CoreError::Agent(agent_failure_reason.unwrap_or_default()).into()),
            _ => Ok(message),
        }
    }

    async fn load_or_create_assistant_message(
        &self,
        ctx: &StreamContext,
    ) -> Result<Message, StreamOrchestratorError> {
        if let Some(id) = ctx.assistant_message_id {
            return self
                .repository
                .get_message(id)
                .await?
                .ok_or(StreamOrchestratorError::MessageNotFound(id));
        }

        let message = Message::assistant_in_progress(ctx.chat.id, &ctx.model_id);
        self.repository.create_message(&message).await?;
        Ok(message)
    }

    async fn handle_event(
        &self,
        chat_id: ChatId,
        chat: &mut Chat,
        last_session_id: &mut Option<String>,
        provider_session_id: Option<&str>,
        event: &StreamEvent,
    ) {
        if let Err(err) = self
            .log
            .append_stream_entry(chat_id, LogEntry::content(serde_json::json!(event)))
            .await
        {
            tracing::warn!(chat_id = %chat_id, error = %err, "failed to publish stream event");
        }

        let Some(new_session_id) = provider_session_id else {
            return;
        };
        if last_session_id.as_deref() == Some(new_session_id) {
            return;
        }

        *last_session_id = Some(new_session_id.to_string());
        chat.set_session_id(new_session_id);
        if let Err(err) = self.repository.update_chat(chat).await {
            tracing::warn!(chat_id = %chat_id, error = %err, "failed to persist updated session id");
        }

        if let Some(refresher) = &self.context_usage_refresher {
            refresher.refresh(chat_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chatflow_core::{StreamEvent, UserId};
    use chatflow_state_memory::{MemoryChatLog, MemoryRepository, MemoryStateStore};

    use super::*;

    struct ScriptedProvider {
        events: std::vec::IntoIter<StreamEvent>,
        session_id: Option<String>,
        cancel_calls: Mutex<u32>,
    }

    impl ScriptedProvider {
        fn new(events: Vec<StreamEvent>) -> Self {
            Self {
                events: events.into_iter(),
                session_id: None,
                cancel_calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl AgentProvider for ScriptedProvider {
        async fn next_event(&mut self) -> Result<Option<StreamEvent>, ProviderError> {
            Ok(self.events.next())
        }

        async fn cancel_active_stream(&mut self) -> Result<(), ProviderError> {
            *self.cancel_calls.lock().unwrap() += 1;
            Ok(())
        }

        fn total_cost_usd(&self) -> f64 {
            0.02
        }

        async fn write_injection(&mut self, _frame: &serde_json::Value) -> Result<(), ProviderError> {
            Ok(())
        }

        fn session_id(&self) -> Option<&str> {
            self.session_id.as_deref()
        }
    }

    fn orchestrator() -> (StreamOrchestrator, Arc<dyn Repository>) {
        let state: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let log: Arc<dyn ChatLog> = Arc::new(MemoryChatLog::default());
        let repository: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
        let config = StreamOrchestratorConfig {
            task_ttl: Duration::from_secs(30),
            revocation_poll_interval: Duration::from_millis(5),
        };
        (
            StreamOrchestrator::new(state, log, repository.clone(), config),
            repository,
        )
    }

    fn context(chat: Chat) -> StreamContext {
        StreamContext {
            chat,
            prompt: "hi".into(),
            system_prompt: String::new(),
            custom_instructions: None,
            model_id: "claude-3".into(),
            permission_mode: PermissionMode::Auto,
            assistant_message_id: None,
            thinking_mode: None,
            attachments: vec![],
            is_custom_prompt: false,
        }
    }

    #[tokio::test]
    async fn completes_with_events_marks_completed() {
        let (orchestrator, _repo) = orchestrator();
        let chat = Chat::new(UserId::new(), "untitled");
        let mut provider = ScriptedProvider::new(vec![StreamEvent::TextDelta {
            text: "hi".into(),
            extra: Default::default(),
        }]);

        let message = orchestrator.process_stream(context(chat), &mut provider).await.unwrap();
        assert_eq!(message.stream_status, Some(StreamStatus::Completed));
        assert_eq!(message.total_cost_usd, Some(0.02));
    }

    #[tokio::test]
    async fn completes_with_no_events_is_marked_failed() {
        let (orchestrator, repo) = orchestrator();
        let chat = Chat::new(UserId::new(), "untitled");
        let chat_id = chat.id;
        let mut provider = ScriptedProvider::new(vec![]);

        let err = orchestrator.process_stream(context(chat), &mut provider).await.unwrap_err();
        assert!(matches!(err, StreamOrchestratorError::Core(CoreError::Agent(_))));

        let messages = repo.list_messages_by_chat(chat_id, None, 10).await.unwrap();
        assert_eq!(messages.items[0].stream_status, Some(StreamStatus::Failed));
    }

    #[tokio::test]
    async fn failure_preserves_exactly_the_events_emitted_before_it() {
        let (orchestrator, repo) = orchestrator();
        let chat = Chat::new(UserId::new(), "untitled");
        let chat_id = chat.id;

        struct FailsAfterTwo {
            events: std::vec::IntoIter<StreamEvent>,
        }
        #[async_trait]
        impl AgentProvider for FailsAfterTwo {
            async fn next_event(&mut self) -> Result<Option<StreamEvent>, ProviderError> {
                match self.events.next() {
                    Some(event) => Ok(Some(event)),
                    None => Err(ProviderError("provider stream broke".into())),
                }
            }
            async fn cancel_active_stream(&mut self) -> Result<(), ProviderError> {
                Ok(())
            }
            fn total_cost_usd(&self) -> f64 {
                0.0
            }
            async fn write_injection(&mut self, _frame: &serde_json::Value) -> Result<(), ProviderError> {
                Ok(())
            }
            fn session_id(&self) -> Option<&str> {
                None
            }
        }

        let emitted = vec![
            StreamEvent::TextDelta { text: "a".into(), extra: Default::default() },
            StreamEvent::TextDelta { text: "b".into(), extra: Default::default() },
        ];
        let mut provider = FailsAfterTwo {
            events: emitted.clone().into_iter(),
        };

        let err = orchestrator.process_stream(context(chat), &mut provider).await.unwrap_err();
        assert!(matches!(err, StreamOrchestratorError::Core(CoreError::Agent(_))));

        let messages = repo.list_messages_by_chat(chat_id, None, 10).await.unwrap();
        let message = &messages.items[0];
        assert_eq!(message.stream_status, Some(StreamStatus::Failed));
        let persisted: Vec<StreamEvent> = serde_json::from_str(&message.content).unwrap();
        assert_eq!(persisted, emitted);
    }

    #[tokio::test]
    async fn terminal_log_entry_is_last_and_matches_status() {
        let state: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let log: Arc<dyn ChatLog> = Arc::new(MemoryChatLog::default());
        let repository: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
        let config = StreamOrchestratorConfig {
            task_ttl: Duration::from_secs(30),
            revocation_poll_interval: Duration::from_millis(5),
        };
        let chat = Chat::new(UserId::new(), "untitled");
        let chat_id = chat.id;
        let orchestrator = StreamOrchestrator::new(state, log.clone(), repository, config);

        let mut provider = ScriptedProvider::new(vec![
            StreamEvent::TextDelta { text: "a".into(), extra: Default::default() },
            StreamEvent::TextDelta { text: "b".into(), extra: Default::default() },
        ]);
        orchestrator.process_stream(context(chat), &mut provider).await.unwrap();

        let entries = log.read_stream(chat_id).await.unwrap();
        assert_eq!(entries.len(), 3); // two content entries plus the terminal entry
        assert!(matches!(entries[0].kind, chatflow_state::LogEntryKind::Content));
        assert!(matches!(entries[1].kind, chatflow_state::LogEntryKind::Content));
        assert!(matches!(entries[2].kind, chatflow_state::LogEntryKind::Complete));
    }

    #[tokio::test]
    async fn s3_three_events_then_revoked_interrupts_with_exactly_those_events() {
        let state: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let log: Arc<dyn ChatLog> = Arc::new(MemoryChatLog::default());
        let repository: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
        let config = StreamOrchestratorConfig {
            task_ttl: Duration::from_secs(30),
            revocation_poll_interval: Duration::from_millis(5),
        };
        let chat = Chat::new(UserId::new(), "untitled");
        let chat_id = chat.id;
        let orchestrator = StreamOrchestrator::new(state.clone(), log.clone(), repository, config);

        struct ThreeThenHang {
            events: std::vec::IntoIter<StreamEvent>,
        }
        #[async_trait]
        impl AgentProvider for ThreeThenHang {
            async fn next_event(&mut self) -> Result<Option<StreamEvent>, ProviderError> {
                match self.events.next() {
                    Some(event) => Ok(Some(event)),
                    None => std::future::pending().await,
                }
            }
            async fn cancel_active_stream(&mut self) -> Result<(), ProviderError> {
                Ok(())
            }
            fn total_cost_usd(&self) -> f64 {
                0.0
            }
            async fn write_injection(&mut self, _frame: &serde_json::Value) -> Result<(), ProviderError> {
                Ok(())
            }
            fn session_id(&self) -> Option<&str> {
                None
            }
        }

        let emitted = vec![
            StreamEvent::TextDelta { text: "a".into(), extra: Default::default() },
            StreamEvent::TextDelta { text: "b".into(), extra: Default::default() },
            StreamEvent::TextDelta { text: "c".into(), extra: Default::default() },
        ];
        let mut provider = ThreeThenHang {
            events: emitted.clone().into_iter(),
        };

        let key = StateKey::new(chat_id, KeyKind::Revoked);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(15)).await;
            state.set(&key, "1", None).await.unwrap();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(2),
            orchestrator.process_stream(context(chat), &mut provider),
        )
        .await
        .expect("stream should have been interrupted")
        .unwrap_err();

        let StreamOrchestratorError::Core(CoreError::StreamCancelled { final_content }) = err else {
            panic!("expected a StreamCancelled error, got {err}");
        };
        assert_eq!(final_content, emitted);

        let entries = log.read_stream(chat_id).await.unwrap();
        assert!(matches!(entries.last().unwrap().kind, chatflow_state::LogEntryKind::Complete));
    }

    #[tokio::test]
    async fn revoked_flag_interrupts_the_stream() {
        let state: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let log: Arc<dyn ChatLog> = Arc::new(MemoryChatLog::default());
        let repository: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
        let config = StreamOrchestratorConfig {
            task_ttl: Duration::from_secs(30),
            revocation_poll_interval: Duration::from_millis(5),
        };
        let chat = Chat::new(UserId::new(), "untitled");
        let chat_id = chat.id;

        let orchestrator = StreamOrchestrator::new(state.clone(), log, repository, config);

        struct NeverEndingProvider;
        #[async_trait]
        impl AgentProvider for NeverEndingProvider {
            async fn next_event(&mut self) -> Result<Option<StreamEvent>, ProviderError> {
                std::future::pending::<Result<Option<StreamEvent>, ProviderError>>().await
            }
            async fn cancel_active_stream(&mut self) -> Result<(), ProviderError> {
                Ok(())
            }
            fn total_cost_usd(&self) -> f64 {
                0.0
            }
            async fn write_injection(&mut self, _frame: &serde_json::Value) -> Result<(), ProviderError> {
                Ok(())
            }
            fn session_id(&self) -> Option<&str> {
                None
            }
        }

        let key = StateKey::new(chat_id, KeyKind::Revoked);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(15)).await;
            state.set(&key, "1", None).await.unwrap();
        });

        let mut provider = NeverEndingProvider;
        let err = tokio::time::timeout(
            Duration::from_secs(2),
            orchestrator.process_stream(context(chat), &mut provider),
        )
        .await
        .expect("stream should have been interrupted")
        .unwrap_err();
        assert!(matches!(err, StreamOrchestratorError::Core(CoreError::StreamCancelled { .. })));
    }
}
