//! Isolation levels, transaction modes and the options handed to the
//! ambient transaction provider.
//!
//! A [`TransactionMode`] is what application code asks for when it opens a
//! scope. The manager turns it into a [`TransactionScopeOption`] plus
//! [`TransactionOptions`] (isolation and timeout) when a fresh ambient
//! transaction has to be started.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Transaction isolation level requested from the ambient transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Volatile data can be read but not modified.
    Serializable,
    /// Volatile data can be read but not modified, new data may be added.
    RepeatableRead,
    /// Volatile data cannot be read, but can be modified.
    #[default]
    ReadCommitted,
    /// Volatile data can be read and modified.
    ReadUncommitted,
    /// Reads see a snapshot taken when the transaction started.
    Snapshot,
    /// Pending changes from more highly isolated transactions cannot be
    /// overwritten.
    Chaos,
    /// Left to the underlying provider.
    Unspecified,
}

impl IsolationLevel {
    /// Check if this isolation level uses snapshot reads.
    pub fn uses_snapshot(&self) -> bool {
        matches!(self, IsolationLevel::Snapshot)
    }

    /// Check if reads may observe uncommitted writes of other transactions.
    pub fn allows_dirty_reads(&self) -> bool {
        matches!(self, IsolationLevel::ReadUncommitted | IsolationLevel::Chaos)
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IsolationLevel::Serializable => "SERIALIZABLE",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::Snapshot => "SNAPSHOT",
            IsolationLevel::Chaos => "CHAOS",
            IsolationLevel::Unspecified => "UNSPECIFIED",
        };
        f.write_str(s)
    }
}

/// Parse isolation level from string (SQL syntax).
impl std::str::FromStr for IsolationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_uppercase()
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .collect();

        match normalized.as_str() {
            "SERIALIZABLE" => Ok(IsolationLevel::Serializable),
            "REPEATABLEREAD" => Ok(IsolationLevel::RepeatableRead),
            "READCOMMITTED" => Ok(IsolationLevel::ReadCommitted),
            "READUNCOMMITTED" => Ok(IsolationLevel::ReadUncommitted),
            "SNAPSHOT" => Ok(IsolationLevel::Snapshot),
            "CHAOS" => Ok(IsolationLevel::Chaos),
            "UNSPECIFIED" => Ok(IsolationLevel::Unspecified),
            _ => Err(format!("unknown isolation level: {}", s)),
        }
    }
}

/// How a newly opened scope relates to the current transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    /// Join the current transaction, or start one if there is none.
    #[default]
    Default,
    /// Always start a new transaction.
    New,
    /// Start a new transaction that does not take part in any ambient
    /// transaction.
    Suppressed,
}

impl TransactionMode {
    /// Whether a scope opened with this mode always gets a fresh transaction.
    pub fn requires_new_transaction(&self) -> bool {
        matches!(self, TransactionMode::New | TransactionMode::Suppressed)
    }

    /// The ambient scope option used when this mode starts a transaction.
    pub fn scope_option(&self) -> TransactionScopeOption {
        match self {
            TransactionMode::Default => TransactionScopeOption::Required,
            TransactionMode::New => TransactionScopeOption::RequiresNew,
            TransactionMode::Suppressed => TransactionScopeOption::Suppress,
        }
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionMode::Default => write!(f, "default"),
            TransactionMode::New => write!(f, "new"),
            TransactionMode::Suppressed => write!(f, "suppressed"),
        }
    }
}

/// Option passed to the ambient transaction provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionScopeOption {
    /// Use the ambient transaction if present, create one otherwise.
    Required,
    /// Always create a new ambient transaction.
    RequiresNew,
    /// Run without an ambient transaction.
    Suppress,
}

impl TransactionScopeOption {
    /// Whether work under this option is transactional at all.
    pub fn is_transactional(&self) -> bool {
        !matches!(self, TransactionScopeOption::Suppress)
    }
}

/// Isolation and timeout for a new ambient transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionOptions {
    pub isolation: IsolationLevel,
    /// `None` leaves the timeout to the provider.
    pub timeout: Option<Duration>,
}

impl TransactionOptions {
    pub fn new(isolation: IsolationLevel) -> Self {
        Self {
            isolation,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_isolation() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
    }

    #[test]
    fn test_uses_snapshot() {
        assert!(!IsolationLevel::ReadCommitted.uses_snapshot());
        assert!(IsolationLevel::Snapshot.uses_snapshot());
    }

    #[test]
    fn test_parse_isolation() {
        assert_eq!(
            "READ COMMITTED".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::ReadCommitted
        );
        assert_eq!(
            "repeatable_read".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::RepeatableRead
        );
        assert_eq!(
            "ReadUncommitted".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::ReadUncommitted
        );
        assert!("eventually".parse::<IsolationLevel>().is_err());
    }

    #[test]
    fn test_display_roundtrips_through_parse() {
        let level = IsolationLevel::Serializable;
        assert_eq!(level.to_string().parse::<IsolationLevel>().unwrap(), level);
    }

    #[test]
    fn test_mode_mapping() {
        assert_eq!(
            TransactionMode::Default.scope_option(),
            TransactionScopeOption::Required
        );
        assert_eq!(
            TransactionMode::New.scope_option(),
            TransactionScopeOption::RequiresNew
        );
        assert_eq!(
            TransactionMode::Suppressed.scope_option(),
            TransactionScopeOption::Suppress
        );
        assert!(!TransactionMode::Default.requires_new_transaction());
        assert!(TransactionMode::New.requires_new_transaction());
        assert!(TransactionMode::Suppressed.requires_new_transaction());
        assert!(!TransactionScopeOption::Suppress.is_transactional());
    }

    #[test]
    fn test_isolation_deserializes_snake_case() {
        let level: IsolationLevel = serde_json::from_str("\"read_uncommitted\"").unwrap();
        assert_eq!(level, IsolationLevel::ReadUncommitted);
    }
}
