//! Identifiers and small value types shared by scopes and transactions.

use std::fmt;

use ulid::Ulid;

/// Opaque identity of a [`Scope`](super::Scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(Ulid);

impl ScopeId {
    pub(crate) fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_string().to_lowercase())
    }
}

/// Opaque identity of a [`Transaction`](super::Transaction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(Ulid);

impl TransactionId {
    pub(crate) fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_string().to_lowercase())
    }
}

/// Opaque identity of a [`TransactionManager`](super::TransactionManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManagerId(Ulid);

impl ManagerId {
    pub(crate) fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for ManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_string().to_lowercase())
    }
}

/// How a scope left its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeCompletion {
    /// The transaction accepted the scope's commit.
    Committed,
    /// The transaction was rolled back, either by a sibling scope or
    /// because the final flush failed. The scope can no longer commit.
    Aborted,
}

impl fmt::Display for ScopeCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeCompletion::Committed => write!(f, "committed"),
            ScopeCompletion::Aborted => write!(f, "aborted"),
        }
    }
}
