/// Errors from a [`crate::store::StateStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state backend connection error: {0}")]
    Connection(String),
    #[error("state backend error: {0}")]
    Backend(String),
}
