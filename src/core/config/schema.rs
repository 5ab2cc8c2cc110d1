//! core::config::schema
//!
//! Configuration schema types.
//!
//! # Example
//!
//! ```toml
//! [lock]
//! backend = "database"
//! database = "/var/lib/hippo/locks.db"
//! statement_timeout_secs = 10
//! verify_on_startup = true
//!
//! [journal]
//! database = "/var/lib/hippo/journal.db"
//! cleanup_batch = 1000
//!
//! [sync]
//! soft_limit = 1000
//! squash_events = true
//! scopes = ["/content"]
//! ignored_property_names = ["hippo:lastModified"]
//!
//! [logging]
//! filter = "hippolock=info"
//! format = "human"
//! ```
//!
//! # Validation
//!
//! Values are validated after parsing, see [`Config::validate`].

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::journal::DEFAULT_CLEANUP_BATCH;
use crate::logging::LogFormat;

/// Complete hippolock configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Lock manager settings
    pub lock: LockConfig,

    /// Revision journal settings
    pub journal: JournalConfig,

    /// Change-log defaults for external sync consumers
    pub sync: SyncConfig,

    /// Log output settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.lock.validate()?;
        self.journal.validate()?;
        self.sync.validate()?;
        Ok(())
    }
}

/// Which lock manager to run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LockBackendKind {
    /// Process-local locks
    #[default]
    Memory,
    /// Cross-process locks through the lock database
    Database,
}

/// Lock manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
    /// Backend kind
    pub backend: LockBackendKind,

    /// Lock database file (required for the database backend)
    pub database: Option<PathBuf>,

    /// Upper bound for a single lock statement, in seconds
    pub statement_timeout_secs: u64,

    /// Lock and unlock a probe key when the database manager starts
    pub verify_on_startup: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backend: LockBackendKind::Memory,
            database: None,
            statement_timeout_secs: 10,
            verify_on_startup: true,
        }
    }
}

impl LockConfig {
    /// The statement timeout as a duration.
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.statement_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "lock.statement_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.backend == LockBackendKind::Database && self.database.is_none() {
            return Err(ConfigError::InvalidValue(
                "lock.database is required when lock.backend = \"database\"".into(),
            ));
        }
        Ok(())
    }
}

/// Revision journal configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct JournalConfig {
    /// Journal database file
    pub database: Option<PathBuf>,

    /// Entries deleted per statement by `journal cleanup`
    pub cleanup_batch: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            database: None,
            cleanup_batch: DEFAULT_CLEANUP_BATCH,
        }
    }
}

impl JournalConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.cleanup_batch == 0 {
            return Err(ConfigError::InvalidValue(
                "journal.cleanup_batch must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Defaults for change-log queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Soft cap on records returned by one change-log query
    pub soft_limit: Option<usize>,

    /// Collapse property events into one "node modified" record per node
    pub squash_events: bool,

    /// Absolute paths whose subtrees are reported; empty means everything
    pub scopes: Vec<String>,

    /// Property names whose changes are never reported
    pub ignored_property_names: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            soft_limit: Some(1000),
            squash_events: true,
            scopes: Vec::new(),
            ignored_property_names: Vec::new(),
        }
    }
}

impl SyncConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.soft_limit == Some(0) {
            return Err(ConfigError::InvalidValue(
                "sync.soft_limit must be greater than zero".into(),
            ));
        }
        if let Some(scope) = self.scopes.iter().find(|s| !s.starts_with('/')) {
            return Err(ConfigError::InvalidValue(format!(
                "sync scope '{}' must be an absolute path",
                scope
            )));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `hippolock=debug`
    pub filter: Option<String>,

    /// Output format
    pub format: LogFormat,
}
