//! Queue configuration and the on-disk state directory.
//!
//! The state directory holds everything the queue persists: the database,
//! the JSON config file, and the supervisor pidfile. It defaults to
//! `~/.jobq` and can be relocated with the `JOBQ_HOME` environment variable.
//!
//! Configuration is read from disk when a supervisor starts and handed to
//! workers at spawn time; changes take effect on the next `worker start`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Environment variable overriding the state directory location.
pub const STATE_DIR_ENV: &str = "JOBQ_HOME";

const STATE_DIR_NAME: &str = ".jobq";
const DB_FILE: &str = "queue.db";
const CONFIG_FILE: &str = "config.json";
const PID_FILE: &str = "worker.pid";

/// Retry configuration, persisted as `config.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Maximum number of retries after the first attempt. A job is given up
    /// once its post-failure attempt count exceeds this value.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base of the exponential backoff: the delay before retry `n` is
    /// `backoff_base ^ n` seconds.
    #[serde(default = "default_backoff_base")]
    pub backoff_base: u32,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_backoff_base() -> u32 {
    2
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base: default_backoff_base(),
        }
    }
}

impl Config {
    /// Loads the configuration from `path`.
    ///
    /// A missing file yields the defaults. An unreadable or unparseable file
    /// also yields the defaults, with a warning, so a corrupt config never
    /// blocks queue operations.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read config; using defaults");
                return Self::default();
            },
        };

        match serde_json::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "invalid config file; using defaults");
                Self::default()
            },
        }
    }

    /// Writes the configuration to `path` as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Sets one of the recognized keys to an integer value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownKey`] for an unrecognized key, or
    /// [`ConfigError::InvalidValue`] when the value is out of range for the
    /// key (`backoff_base` must be positive).
    pub fn set(&mut self, key: &str, value: u32) -> Result<(), ConfigError> {
        match key {
            "max_retries" => self.max_retries = value,
            "backoff_base" => {
                if value == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: key.to_string(),
                        reason: "must be a positive integer".to_string(),
                    });
                }
                self.backoff_base = value;
            },
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }
}

/// Errors from configuration handling.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The key is not one of the recognized configuration keys.
    #[error("unrecognized config key: {0} (expected max_retries or backoff_base)")]
    UnknownKey(String),

    /// The value is out of range for the key.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// The key being set.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The home directory could not be determined.
    #[error("cannot resolve state directory: HOME is not set (or set {STATE_DIR_ENV})")]
    NoHome,

    /// I/O error reading or writing configuration files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error writing the config file.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The per-user directory holding the queue's durable state.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    /// Resolves the state directory: `$JOBQ_HOME` if set, else `~/.jobq`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoHome`] when neither variable is available.
    pub fn resolve() -> Result<Self, ConfigError> {
        if let Some(root) = std::env::var_os(STATE_DIR_ENV) {
            return Ok(Self { root: root.into() });
        }
        let home = std::env::var_os("HOME").ok_or(ConfigError::NoHome)?;
        Ok(Self {
            root: PathBuf::from(home).join(STATE_DIR_NAME),
        })
    }

    /// Uses an explicit directory instead of the resolved default.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the directory if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    /// The directory itself.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the queue database.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.root.join(DB_FILE)
    }

    /// Path of the JSON config file.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Path of the supervisor pidfile.
    #[must_use]
    pub fn pid_path(&self) -> PathBuf {
        self.root.join(PID_FILE)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff_base, 2);
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("config.json"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_corrupt_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(Config::load(&path), Config::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"max_retries": 7}"#).unwrap();
        let config = Config::load(&path);
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.backoff_base, 2);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let config = Config {
            max_retries: 5,
            backoff_base: 3,
        };
        config.save(&path).unwrap();
        assert_eq!(Config::load(&path), config);
    }

    #[test]
    fn test_set_validates_keys_and_values() {
        let mut config = Config::default();
        config.set("max_retries", 0).unwrap();
        assert_eq!(config.max_retries, 0);
        config.set("backoff_base", 4).unwrap();
        assert_eq!(config.backoff_base, 4);

        assert!(matches!(
            config.set("poll_interval", 1),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            config.set("backoff_base", 0),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_state_dir_layout() {
        let dir = StateDir::at("/tmp/jobq-test");
        assert_eq!(dir.db_path(), PathBuf::from("/tmp/jobq-test/queue.db"));
        assert_eq!(
            dir.config_path(),
            PathBuf::from("/tmp/jobq-test/config.json")
        );
        assert_eq!(dir.pid_path(), PathBuf::from("/tmp/jobq-test/worker.pid"));
    }
}
