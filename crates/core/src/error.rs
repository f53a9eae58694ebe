use chrono::{DateTime, Utc};

use crate::stream_event::StreamEvent;

/// Domain error kinds shared across the chat streaming and scheduled-task
/// core. Scheduler and API-key-validation failures keep their own richer
/// per-module enums (`SchedulerError`, `ApiKeyValidationError`) rather than
/// flattening into this type — this enum only covers the kinds that cross
/// module boundaries as a plain domain error: a provider-side stream
/// failure, cooperative cancellation, or a malformed pagination cursor.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Provider failure, empty stream, or an event shape the orchestrator
    /// does not recognize.
    #[error("agent error: {0}")]
    Agent(String),

    /// Cooperative interruption of an active stream. Carries the events
    /// already emitted so the dispatch layer can still persist them.
    #[error("stream cancelled")]
    StreamCancelled { final_content: Vec<StreamEvent> },

    /// A pagination cursor could not be decoded.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    #[must_use]
    pub fn agent(msg: impl Into<String>) -> Self {
        Self::Agent(msg.into())
    }

    #[must_use]
    pub fn invalid_cursor(msg: impl Into<String>) -> Self {
        Self::InvalidCursor(msg.into())
    }

    /// `true` for the cooperative-cancellation variant, which the dispatch
    /// layer must translate into a non-retry terminal state rather than a
    /// failure.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::StreamCancelled { .. })
    }
}

/// Timestamp helper shared by error contexts that need to stamp a
/// `TaskExecution` at the moment an error is raised.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_cancelled_carries_partial_content() {
        let events = vec![];
        let err = CoreError::StreamCancelled {
            final_content: events,
        };
        assert!(err.is_cancellation());
    }

    #[test]
    fn other_variants_are_not_cancellation() {
        assert!(!CoreError::agent("provider timed out").is_cancellation());
        assert!(!CoreError::invalid_cursor("bad").is_cancellation());
    }

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(
            CoreError::invalid_cursor("bad").to_string(),
            "invalid cursor: bad"
        );
    }
}
