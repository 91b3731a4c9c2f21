//! Store and logging configuration.
//!
//! # Responsibility
//! - Describe how the store connection and log sink are set up.
//! - Load configuration from JSON with defaults for every omitted field.
//!
//! # Invariants
//! - Unknown keys are rejected instead of silently ignored.
//! - A configured database path is never empty.

use crate::logging::default_log_level;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_LOG_DIR_NAME: &str = "roster-logs";

/// Errors raised while loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid configuration document: {err}"),
            Self::Invalid(message) => write!(f, "invalid configuration: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Connection settings for the backing SQLite store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Database file. `None` opens a private in-memory database.
    pub database_path: Option<PathBuf>,
    /// How long the driver waits on a locked database before failing.
    pub busy_timeout_ms: u64,
    /// Maps to `PRAGMA foreign_keys`.
    pub enforce_foreign_keys: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            enforce_foreign_keys: true,
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            database_path: Some(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Parses and validates a JSON document such as
    /// `{"database_path": "/var/lib/roster.db", "busy_timeout_ms": 1000}`.
    pub fn from_json_str(document: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(path) = self.database_path.as_deref() {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(
                    "database_path cannot be empty; omit it for an in-memory store".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// File logging settings consumed by [`crate::logging::init_logging`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// One of `trace|debug|info|warn|error`.
    pub level: String,
    /// Absolute directory receiving rotated log files.
    pub log_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            log_dir: std::env::temp_dir().join(DEFAULT_LOG_DIR_NAME),
        }
    }
}

impl LoggingConfig {
    pub fn new(level: impl Into<String>, log_dir: impl AsRef<Path>) -> Self {
        Self {
            level: level.into(),
            log_dir: log_dir.as_ref().to_path_buf(),
        }
    }

    pub fn from_json_str(document: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(document)?)
    }
}
