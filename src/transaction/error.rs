//! Transaction error types.

use thiserror::Error;

use crate::session::SessionError;

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors raised by scopes, transactions and transaction managers.
///
/// None of these are retried. Any failure is terminal for the transaction
/// it occurred in.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The manager was asked to start a transaction without the pieces it
    /// needs (e.g. no session factory configured).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Protocol violation, e.g. committing a doomed scope or signalling a
    /// transaction the scope is not enlisted in.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The scope or transaction has already been disposed.
    #[error("{0} has been disposed")]
    ObjectDisposed(String),

    /// The data-access session failed, typically while flushing.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// The ambient transaction primitive refused an operation.
    #[error("ambient transaction error: {0}")]
    Ambient(String),
}

impl TransactionError {
    /// Check if this error is a programmer error in how scopes were used.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            TransactionError::InvalidOperation(_) | TransactionError::ObjectDisposed(_)
        )
    }

    /// Check if this error comes from missing or invalid configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(self, TransactionError::Configuration(_))
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    pub(crate) fn disposed(what: impl Into<String>) -> Self {
        Self::ObjectDisposed(what.into())
    }
}
