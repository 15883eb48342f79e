//! Process configuration loaded once at startup.
//!
//! # Responsibility
//! - Deserialize pool, audit and logging settings from a JSON document.
//! - Apply defaults for every optional key.
//!
//! # Invariants
//! - A validated `PoolConfig` has a non-empty connection string and capacity >= 1.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read config: {err}"),
            Self::Parse(err) => write!(f, "malformed config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub db: PoolConfig,
    pub audit: AuditConfig,
    pub log: LogConfig,
}

impl AppConfig {
    /// Reads and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.db.validate()?;
        Ok(config)
    }
}

/// Storage pool settings, read at startup and on every refresh.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// SQLite path, `:memory:` or `file:` URI.
    pub connection: String,
    /// Idle connections kept for reuse.
    pub pool_size: usize,
    /// Connections older than this are closed instead of reused; 0 disables recycling.
    pub pool_recycle_secs: u64,
    /// How long `acquire` waits before failing with a storage-unavailable error.
    /// Must be at least one second.
    pub pool_timeout_secs: u64,
    /// Extra connections allowed above `pool_size` under load.
    pub max_overflow: usize,
    /// Re-attempts for a failed connection open.
    pub connect_retries: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connection: String::new(),
            pool_size: 10,
            pool_recycle_secs: 600,
            pool_timeout_secs: 15,
            max_overflow: 10,
            connect_retries: 1,
        }
    }
}

impl PoolConfig {
    pub fn new(connection: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "db.connection cannot be empty".to_string(),
            ));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid(
                "db.pool_size must be at least 1".to_string(),
            ));
        }
        if self.pool_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "db.pool_timeout_secs must be at least 1".to_string(),
            ));
        }
        if u32::try_from(self.capacity()).is_err() {
            return Err(ConfigError::Invalid(
                "db.pool_size + db.max_overflow is too large".to_string(),
            ));
        }
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.pool_size.saturating_add(self.max_overflow)
    }

    pub fn recycle_interval(&self) -> Option<Duration> {
        (self.pool_recycle_secs > 0).then(|| Duration::from_secs(self.pool_recycle_secs))
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_timeout_secs)
    }
}

/// Change-log and message publication switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Master switch for writing `sys_operation_log` rows.
    pub change_log: bool,
    /// Resources whose changes are logged; empty means every resource.
    pub log_resources: Vec<String>,
    /// Per-resource fields excluded when deciding whether an update changed anything.
    pub ignore_fields: BTreeMap<String, Vec<String>>,
    pub message: MessageConfig,
}

impl AuditConfig {
    pub fn logs(&self, resource: &str) -> bool {
        self.change_log
            && (self.log_resources.is_empty() || self.log_resources.iter().any(|r| r == resource))
    }

    pub fn ignored_fields(&self, resource: &str) -> &[String] {
        self.ignore_fields
            .get(resource)
            .map_or(&[], |fields| fields.as_slice())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MessageConfig {
    pub enabled: bool,
    /// Resource names whose changes are published.
    pub resources: Vec<String>,
}

impl MessageConfig {
    pub fn publishes(&self, resource: &str) -> bool {
        self.enabled && self.resources.iter().any(|name| name == resource)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub dir: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: crate::logging::default_log_level().to_string(),
            dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AppConfig, ConfigError, PoolConfig};

    #[test]
    fn defaults_fill_missing_keys() {
        let config = AppConfig::from_json_str(r#"{"db": {"connection": "/tmp/ork.db"}}"#).unwrap();
        assert_eq!(config.db.pool_size, 10);
        assert_eq!(config.db.pool_recycle_secs, 600);
        assert_eq!(config.db.pool_timeout_secs, 15);
        assert_eq!(config.db.max_overflow, 10);
        assert_eq!(config.db.capacity(), 20);
        assert!(!config.audit.logs("line"));
        assert!(!config.audit.message.publishes("traffic.line"));
    }

    #[test]
    fn empty_connection_is_rejected() {
        let err = AppConfig::from_json_str(r#"{"db": {"pool_size": 2}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let config = PoolConfig {
            pool_size: 0,
            ..PoolConfig::new("/tmp/ork.db")
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_acquire_timeout_is_rejected_and_zero_recycle_disables_it() {
        let config = PoolConfig {
            pool_timeout_secs: 0,
            ..PoolConfig::new("/tmp/ork.db")
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = PoolConfig {
            pool_recycle_secs: 0,
            ..PoolConfig::new("/tmp/ork.db")
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.recycle_interval(), None);
        assert_eq!(
            PoolConfig::new("/tmp/ork.db").recycle_interval(),
            Some(std::time::Duration::from_secs(600))
        );
    }

    #[test]
    fn message_publication_requires_enabled_and_listed() {
        let config = AppConfig::from_json_str(
            r#"{
                "db": {"connection": ":memory:"},
                "audit": {
                    "change_log": true,
                    "ignore_fields": {"line": ["removed"]},
                    "message": {"enabled": true, "resources": ["line"]}
                }
            }"#,
        )
        .unwrap();
        assert!(config.audit.logs("city"));
        assert!(config.audit.message.publishes("line"));
        assert!(!config.audit.message.publishes("city"));
        assert_eq!(config.audit.ignored_fields("line"), ["removed".to_string()]);
        assert!(config.audit.ignored_fields("city").is_empty());
    }
}
