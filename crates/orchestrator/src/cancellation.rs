use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chatflow_core::ChatId;
use chatflow_state::{KeyKind, StateError, StateKey, StateStore};

/// Cooperative cancellation for one chat's active stream.
///
/// Grounded on `CancellationHandler` in `cancellation.py`: the same
/// `was_cancelled`/`cancel_requested` pair of latches, and the same
/// `chat:{id}:revoked` flag polled on an interval. The original spawns a
/// separate asyncio task that cancels the main task on detection; here the
/// poll is just another arm of the stream orchestrator's `tokio::select!`,
/// which gets the same effect without a second task racing the provider
/// for ownership of the stream.
pub struct CancellationWatcher {
    state: Arc<dyn StateStore>,
    key: StateKey,
    poll_interval: Duration,
    was_cancelled: AtomicBool,
    cancel_requested: AtomicBool,
}

impl CancellationWatcher {
    #[must_use]
    pub fn new(state: Arc<dyn StateStore>, chat_id: ChatId, poll_interval: Duration) -> Self {
        Self {
            state,
            key: StateKey::new(chat_id, KeyKind::Revoked),
            poll_interval,
            was_cancelled: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Clears a stale revocation flag left over from a previous run of this
    /// chat, before the stream starts consuming events.
    pub async fn clear_stale_flag(&self) -> Result<(), StateError> {
        self.state.delete(&self.key).await.map(|_| ())
    }

    /// `true` once `chat:{id}:revoked` is set to `"1"`.
    pub async fn check_revoked(&self) -> Result<bool, StateError> {
        Ok(self.state.get(&self.key).await?.as_deref() == Some("1"))
    }

    /// Blocks until revocation is observed, polling at `poll_interval`.
    /// Intended as one arm of the orchestrator's `tokio::select!`.
    pub async fn wait_for_revocation(&self) -> Result<(), StateError> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            if self.check_revoked().await? {
                self.was_cancelled.store(true, Ordering::SeqCst);
                return Ok(());
            }
        }
    }

    /// Distinguishes "stream ended because it was cancelled" from
    /// "stream ended because the provider failed or ran to completion".
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.was_cancelled.load(Ordering::SeqCst)
    }

    /// Marks cancellation observed outside of `wait_for_revocation` (e.g. a
    /// caller-initiated stop request rather than a polled flag).
    pub fn mark_cancelled(&self) {
        self.was_cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns `true` the first time it's called and `false` on every call
    /// after, so the caller can drive `AgentProvider::cancel_active_stream`
    /// exactly once.
    pub fn should_request_cancel(&self) -> bool {
        !self.cancel_requested.swap(true, Ordering::SeqCst)
    }
}
