use async_trait::async_trait;

use chatflow_core::StreamEvent;

/// The boundary between the orchestrator and an AI agent backend.
///
/// Grounded on `ClaudeAgentService`'s role in `orchestrator.py`: an
/// asynchronous event source plus `cancel_active_stream`/
/// `get_total_cost_usd`, and the sandbox transport's line-delimited
/// `write`. What backs this trait (subprocess, sandbox RPC, HTTP) is
/// deliberately out of scope here.
#[async_trait]
pub trait AgentProvider: Send {
    /// Advance the stream by one event. `Ok(None)` marks natural end
    /// (`StopAsyncIteration` in the original).
    async fn next_event(&mut self) -> Result<Option<StreamEvent>, ProviderError>;

    /// Idempotent: a second call after the first must be a no-op.
    async fn cancel_active_stream(&mut self) -> Result<(), ProviderError>;

    fn total_cost_usd(&self) -> f64;

    /// Write a line-delimited injection frame into the provider transport.
    async fn write_injection(&mut self, frame: &serde_json::Value) -> Result<(), ProviderError>;

    /// The session id assigned by the provider so far, if any.
    fn session_id(&self) -> Option<&str>;
}

#[derive(Debug, thiserror::Error)]
#[error("agent provider error: {0}")]
pub struct ProviderError(pub String);

impl ProviderError {
    #[must_use]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
