//! core::config
//!
//! Configuration schema and loading.
//!
//! # Locations
//!
//! Searched in order, first existing file wins:
//! 1. An explicit path (the `--config` flag)
//! 2. `$HIPPOLOCK_CONFIG` if set
//! 3. `$XDG_CONFIG_HOME/hippolock/config.toml`
//! 4. `~/.hippolock/config.toml` (canonical write location)
//!
//! A missing file is not an error; defaults are used. An explicit path or
//! `$HIPPOLOCK_CONFIG` that does not exist is an error.
//!
//! # Example
//!
//! ```no_run
//! use hippolock::core::config::Config;
//!
//! let loaded = Config::load(None).unwrap();
//! println!("lock backend: {:?}", loaded.config.lock.backend);
//! ```

pub mod schema;

pub use schema::{Config, JournalConfig, LockBackendKind, LockConfig, LoggingConfig, SyncConfig};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "HIPPOLOCK_CONFIG";

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("failed to write config file '{path}': {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid config value: {0}")]
    InvalidValue(String),

    #[error("home directory not found")]
    NoHomeDir,
}

/// Result of loading configuration.
#[derive(Debug)]
pub struct ConfigLoadResult {
    /// The loaded configuration.
    pub config: Config,
    /// The file it came from, if any.
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `explicit` or the default locations.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read, parsed
    /// or validated, or if an explicitly named file is missing.
    pub fn load(explicit: Option<&Path>) -> Result<ConfigLoadResult, ConfigError> {
        let path = match explicit {
            Some(path) => Some(Self::require(path.to_path_buf())?),
            None => Self::locate()?,
        };

        let config = match &path {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };
        config.validate()?;

        Ok(ConfigLoadResult { config, path })
    }

    /// Find the config file in the default locations.
    fn locate() -> Result<Option<PathBuf>, ConfigError> {
        // 1. $HIPPOLOCK_CONFIG
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::require(PathBuf::from(path)).map(Some);
        }

        // 2. $XDG_CONFIG_HOME/hippolock/config.toml
        if let Ok(xdg_home) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_home).join("hippolock/config.toml");
            if path.exists() {
                return Ok(Some(path));
            }
        }

        // 3. ~/.hippolock/config.toml
        if let Some(home) = dirs::home_dir() {
            let path = home.join(".hippolock/config.toml");
            if path.exists() {
                return Ok(Some(path));
            }
        }

        Ok(None)
    }

    fn require(path: PathBuf) -> Result<PathBuf, ConfigError> {
        if path.exists() {
            Ok(path)
        } else {
            Err(ConfigError::NotFound(path))
        }
    }

    /// Read and parse a config file without validating it.
    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Get the canonical path for the config file.
    ///
    /// Returns `~/.hippolock/config.toml`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".hippolock/config.toml"))
    }

    /// Write this config to `path` atomically.
    ///
    /// Creates parent directories if needed. Writes to a temp file and
    /// renames it into place to prevent corruption.
    pub fn write(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidValue(e.to_string()))?;

        let temp_path = path.with_extension("toml.tmp");
        let mut file = fs::File::create(&temp_path).map_err(|e| ConfigError::WriteError {
            path: temp_path.clone(),
            source: e,
        })?;

        file.write_all(contents.as_bytes())
            .map_err(|e| ConfigError::WriteError {
                path: temp_path.clone(),
                source: e,
            })?;

        file.sync_all().map_err(|e| ConfigError::WriteError {
            path: temp_path.clone(),
            source: e,
        })?;

        fs::rename(&temp_path, path).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_missing_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let result = Config::load(Some(&temp.path().join("nope.toml")));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn explicit_file_is_loaded() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[sync]\nsoft_limit = 7\n").unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.path.as_deref(), Some(path.as_path()));
        assert_eq!(loaded.config.sync.soft_limit, Some(7));
    }

    #[test]
    fn invalid_file_reports_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[lock\n").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn invalid_values_fail_validation() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[lock]\nbackend = \"database\"\n").unwrap();

        assert!(matches!(
            Config::load(Some(&path)),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn write_then_read_back() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/config.toml");
        let mut config = Config::default();
        config.lock.backend = LockBackendKind::Database;
        config.lock.database = Some(temp.path().join("locks.db"));
        config.sync.scopes = vec!["/content".into()];

        config.write(&path).unwrap();
        assert!(!path.with_extension("toml.tmp").exists());
        assert_eq!(Config::from_file(&path).unwrap(), config);
    }
}
