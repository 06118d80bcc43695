//! Relay configuration
//!
//! Layered: built-in defaults, then a TOML file, then `RELAY_*` environment
//! variables. Callers apply command-line overrides last.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "relay.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Ledger storage
    pub store: StoreConfig,
    /// Completion verifier
    pub verifier: VerifierConfig,
    /// Log output
    pub logging: LoggingConfig,
}

/// Ledger storage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one document per task
    pub data_dir: PathBuf,
    /// Bounded wait for reads, in milliseconds
    pub lock_timeout_ms: u64,
}

impl StoreConfig {
    /// Bounded read wait
    #[inline]
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".relay"),
            lock_timeout_ms: 5_000,
        }
    }
}

/// Completion verifier settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Per-check timeout, in seconds
    pub check_timeout_secs: u64,
    /// Checks allowed in flight at once
    pub max_concurrency: usize,
    /// Working directory for command checks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
}

impl VerifierConfig {
    /// Per-check timeout
    #[inline]
    #[must_use]
    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            check_timeout_secs: 30,
            max_concurrency: 4,
            workdir: None,
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive
    pub filter: String,
    /// Emit JSON lines instead of text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl RelayConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from an explicit file, or `relay.toml` if present, then apply
    /// environment overrides
    ///
    /// # Errors
    /// `ConfigError` if a file cannot be read or parsed, or a value is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };

        let config = config.with_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file
    ///
    /// # Errors
    /// `ConfigError::Read` or `ConfigError::Parse`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `RELAY_DATA_DIR`, `RELAY_CHECK_TIMEOUT_SECS` and `RELAY_LOG`
    ///
    /// `lookup` is injected so tests do not touch the process environment.
    ///
    /// # Errors
    /// `ConfigError::Invalid` if a numeric variable does not parse.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("RELAY_DATA_DIR") {
            self.store.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = lookup("RELAY_CHECK_TIMEOUT_SECS") {
            self.verifier.check_timeout_secs =
                secs.trim().parse().map_err(|_| ConfigError::Invalid {
                    field: "verifier.check_timeout_secs",
                    reason: format!("not an integer: {secs}"),
                })?;
        }
        if let Some(filter) = lookup("RELAY_LOG") {
            self.logging.filter = filter;
        }
        Ok(self)
    }

    /// Reject values the runtime cannot work with
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "store.lock_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.verifier.check_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "verifier.check_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.verifier.max_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "verifier.max_concurrency",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
