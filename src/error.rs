use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors returned by store mutations.
///
/// A failed mutation never installs a snapshot and never notifies handlers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("store mutated while notifying handlers")]
    ReentrantUpdate,

    #[error("nested store updates exceeded depth limit of {limit}")]
    UpdateDepthExceeded { limit: usize },
}

impl StoreError {
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}
