//! Store configuration
//!
//! Configuration can be built in code (see [`crate::ContentStoreBuilder`]) or
//! loaded from TOML:
//!
//! ```toml
//! path = "content.db"
//! busy_timeout_ms = 5000
//! journal_mode = "wal"
//! synchronous = "full"
//!
//! [history]
//! enabled = true
//! max_versions = 10
//! prune_on_publish = false
//! ```

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default busy timeout (ms)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Default number of backups retained per resource
pub const DEFAULT_MAX_VERSIONS: i64 = 10;

/// `max_versions` value meaning "never prune"
pub const UNLIMITED_VERSIONS: i64 = -1;

/// SQLite journal mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JournalMode {
    /// Write-ahead log (readers never block the writer)
    #[default]
    Wal,
    /// Rollback journal
    Delete,
}

impl JournalMode {
    pub const fn pragma_value(self) -> &'static str {
        match self {
            JournalMode::Wal => "wal",
            JournalMode::Delete => "delete",
        }
    }
}

/// SQLite synchronous mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Full,
    Normal,
}

impl SyncMode {
    pub const fn pragma_value(self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Normal => "normal",
        }
    }
}

/// How many backups to keep per resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Never prune
    Unlimited,
    /// Keep at most this many backups (0 keeps none)
    Keep(usize),
}

impl Retention {
    /// Interpret a `max_versions` value (-1 = unlimited)
    pub fn from_max_versions(max_versions: i64) -> Result<Self> {
        match max_versions {
            UNLIMITED_VERSIONS => Ok(Retention::Unlimited),
            n if n >= 0 => usize::try_from(n).map(Retention::Keep).map_err(|_| {
                StoreError::ConfigurationError(format!("max_versions out of range: {}", n))
            }),
            n => Err(StoreError::ConfigurationError(format!(
                "max_versions must be -1 (unlimited) or >= 0, got {}",
                n
            ))),
        }
    }
}

/// History (backup log) settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Archive superseded online content on publish
    pub enabled: bool,

    /// Backups retained per resource; -1 means unlimited
    pub max_versions: i64,

    /// Prune a resource's backups inside the publish that archived into them
    pub prune_on_publish: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        HistoryConfig {
            enabled: true,
            max_versions: DEFAULT_MAX_VERSIONS,
            prune_on_publish: false,
        }
    }
}

/// Configuration for a [`crate::ContentStore`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    pub path: PathBuf,

    /// How long a connection waits on a locked database before failing
    pub busy_timeout_ms: u64,

    pub journal_mode: JournalMode,

    pub synchronous: SyncMode,

    pub history: HistoryConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: PathBuf::from("content.db"),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: JournalMode::default(),
            synchronous: SyncMode::default(),
            history: HistoryConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Default configuration for a database at `path`
    pub fn at<P: AsRef<Path>>(path: P) -> Self {
        StoreConfig {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(s)
            .map_err(|e| StoreError::ConfigurationError(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            StoreError::ConfigurationError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Serialize configuration to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| StoreError::ConfigurationError(format!("Failed to serialize: {}", e)))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(StoreError::ConfigurationError(
                "path cannot be empty".to_string(),
            ));
        }

        if self.busy_timeout_ms == 0 {
            return Err(StoreError::ConfigurationError(
                "busy_timeout_ms must be greater than zero".to_string(),
            ));
        }

        Retention::from_max_versions(self.history.max_versions)?;

        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Retention policy derived from `history.max_versions`
    pub fn retention(&self) -> Result<Retention> {
        Retention::from_max_versions(self.history.max_versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retention().unwrap(), Retention::Keep(10));
        assert_eq!(config.busy_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_from_toml() {
        let config = StoreConfig::from_toml_str(
            r#"
            path = "/var/lib/vfs/content.db"
            busy_timeout_ms = 250
            journal_mode = "delete"

            [history]
            max_versions = -1
            prune_on_publish = true
            "#,
        )
        .unwrap();

        assert_eq!(config.path, PathBuf::from("/var/lib/vfs/content.db"));
        assert_eq!(config.busy_timeout_ms, 250);
        assert_eq!(config.journal_mode, JournalMode::Delete);
        assert_eq!(config.synchronous, SyncMode::Full);
        assert!(config.history.enabled);
        assert!(config.history.prune_on_publish);
        assert_eq!(config.retention().unwrap(), Retention::Unlimited);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = StoreConfig::at("store.db");
        let text = config.to_toml_string().unwrap();
        let parsed = StoreConfig::from_toml_str(&text).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = StoreConfig::default();
        config.busy_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(StoreError::ConfigurationError(_))
        ));

        let mut config = StoreConfig::default();
        config.history.max_versions = -2;
        assert!(config.validate().is_err());

        assert!(StoreConfig::from_toml_str("busy_timeout_ms = \"soon\"").is_err());
    }

    #[test]
    fn test_retention_zero_keeps_nothing() {
        assert_eq!(Retention::from_max_versions(0).unwrap(), Retention::Keep(0));
    }

    #[test]
    fn test_load_missing_file() {
        let err = StoreConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, StoreError::ConfigurationError(_)));
    }
}
