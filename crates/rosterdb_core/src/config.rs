//! Store configuration.
//!
//! # Responsibility
//! - Carry the knobs a `Store` is opened with: database location, SQLite
//!   busy timeout, row-lock wait timeout and the auditing principal.
//! - Read overrides from `ROSTERDB_*` environment variables.
//!
//! # Invariants
//! - Every timeout is finite; a zero lock timeout fails fast instead of
//!   waiting.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const ENV_DB_PATH: &str = "ROSTERDB_DB_PATH";
pub const ENV_LOCK_TIMEOUT_MS: &str = "ROSTERDB_LOCK_TIMEOUT_MS";
pub const ENV_AUDITOR: &str = "ROSTERDB_AUDITOR";

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 3_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable `{name}` has invalid value `{value}`: {message}")]
    InvalidEnv {
        name: &'static str,
        value: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file; `None` opens a private in-memory database.
    pub db_path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
    /// How long a session waits for another session's row lock.
    pub lock_timeout_ms: u64,
    /// Principal stamped into `created_by` / `last_modified_by`.
    pub auditor: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            auditor: None,
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_auditor(mut self, auditor: impl Into<String>) -> Self {
        self.auditor = Some(auditor.into());
        self
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Defaults overridden by `ROSTERDB_DB_PATH`, `ROSTERDB_LOCK_TIMEOUT_MS`
    /// and `ROSTERDB_AUDITOR`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = non_empty(lookup(ENV_DB_PATH)) {
            config.db_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = non_empty(lookup(ENV_LOCK_TIMEOUT_MS)) {
            config.lock_timeout_ms = raw.parse().map_err(|err: std::num::ParseIntError| {
                ConfigError::InvalidEnv {
                    name: ENV_LOCK_TIMEOUT_MS,
                    value: raw.clone(),
                    message: err.to_string(),
                }
            })?;
        }
        config.auditor = non_empty(lookup(ENV_AUDITOR));
        Ok(config)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, StoreConfig, ENV_AUDITOR, ENV_LOCK_TIMEOUT_MS};
    use std::collections::HashMap;
    use std::time::Duration;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_are_in_memory_with_finite_timeouts() {
        let config = StoreConfig::default();
        assert!(config.db_path.is_none());
        assert_eq!(config.busy_timeout(), Duration::from_secs(5));
        assert_eq!(config.lock_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn env_overrides_apply_and_blank_values_are_ignored() {
        let config = StoreConfig::from_lookup(lookup(&[
            (ENV_LOCK_TIMEOUT_MS, "250"),
            (ENV_AUDITOR, "  "),
        ]))
        .unwrap();
        assert_eq!(config.lock_timeout_ms, 250);
        assert!(config.auditor.is_none());

        let err = StoreConfig::from_lookup(lookup(&[(ENV_LOCK_TIMEOUT_MS, "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { name, .. } if name == ENV_LOCK_TIMEOUT_MS));
    }

    #[test]
    fn deserializes_partial_documents() {
        let config: StoreConfig =
            serde_json::from_str(r#"{ "lock_timeout_ms": 10, "auditor": "admin" }"#).unwrap();
        assert_eq!(config.lock_timeout_ms, 10);
        assert_eq!(config.busy_timeout_ms, 5_000);
        assert_eq!(config.auditor.as_deref(), Some("admin"));
    }
}
