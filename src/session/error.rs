//! Session (data-access layer) error types.

use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors raised by a data-access session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Pending changes could not be written.
    #[error("flush failed: {0}")]
    Flush(String),

    /// An entity with the same key is already stored or staged.
    #[error("entity already exists: {collection}/{key}")]
    AlreadyExists { collection: String, key: String },

    /// The entity does not exist.
    #[error("entity not found: {collection}/{key}")]
    NotFound { collection: String, key: String },

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The session was closed by its transaction.
    #[error("session is closed")]
    Closed,
}

impl SessionError {
    pub(crate) fn already_exists(collection: &str, key: &str) -> Self {
        Self::AlreadyExists {
            collection: collection.to_string(),
            key: key.to_string(),
        }
    }

    pub(crate) fn not_found(collection: &str, key: &str) -> Self {
        Self::NotFound {
            collection: collection.to_string(),
            key: key.to_string(),
        }
    }
}
