//! Process-wide unit-of-work settings.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::error::{ConfigError, ConfigResult};
use crate::transaction::{IsolationLevel, TransactionOptions};

/// Prefix of the environment variables read by [`UnitOfWorkSettings::from_env`].
pub const ENV_PREFIX: &str = "SCOPETX_";

/// Settings applied to every transaction a manager starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UnitOfWorkSettings {
    /// Isolation level of new ambient transactions.
    pub default_isolation: IsolationLevel,
    /// Commit scopes that are disposed without an explicit commit.
    pub auto_complete_scope: bool,
    /// Timeout of new ambient transactions, in milliseconds.
    pub default_timeout_ms: Option<u64>,
}

impl Default for UnitOfWorkSettings {
    fn default() -> Self {
        Self {
            default_isolation: IsolationLevel::ReadCommitted,
            auto_complete_scope: false,
            default_timeout_ms: None,
        }
    }
}

impl UnitOfWorkSettings {
    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.default_isolation = isolation;
        self
    }

    pub fn with_auto_complete(mut self, enabled: bool) -> Self {
        self.auto_complete_scope = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Options for a new ambient transaction.
    pub fn transaction_options(&self) -> TransactionOptions {
        let options = TransactionOptions::new(self.default_isolation);
        match self.default_timeout_ms {
            Some(ms) => options.with_timeout(Duration::from_millis(ms)),
            None => options,
        }
    }

    /// Parse settings from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load settings from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// Defaults overridden by `SCOPETX_DEFAULT_ISOLATION`,
    /// `SCOPETX_AUTO_COMPLETE_SCOPE` and `SCOPETX_DEFAULT_TIMEOUT_MS`.
    pub fn from_env() -> ConfigResult<Self> {
        Self::default().merge_vars(|key| std::env::var(key).ok())
    }

    /// Override fields from a variable lookup (keys carry [`ENV_PREFIX`]).
    pub fn merge_vars<F>(mut self, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key).map(|value| (key, value))
        };

        if let Some((key, value)) = var("DEFAULT_ISOLATION") {
            self.default_isolation = value
                .parse()
                .map_err(|reason| ConfigError::invalid(&key, &value, reason))?;
        }

        if let Some((key, value)) = var("AUTO_COMPLETE_SCOPE") {
            self.auto_complete_scope = match value.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(ConfigError::invalid(&key, &value, "expected a boolean")),
            };
        }

        if let Some((key, value)) = var("DEFAULT_TIMEOUT_MS") {
            let ms = value
                .trim()
                .parse::<u64>()
                .map_err(|e| ConfigError::invalid(&key, &value, e.to_string()))?;
            self.default_timeout_ms = (ms > 0).then_some(ms);
        }

        Ok(self)
    }
}
