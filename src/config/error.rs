//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for loading configuration.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading [`UnitOfWorkSettings`](super::UnitOfWorkSettings).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The settings document is not valid JSON or has unknown fields.
    #[error("invalid settings document: {0}")]
    Parse(#[from] serde_json::Error),

    /// An override carried a value that does not parse.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}
