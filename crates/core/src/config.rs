// Storage engine configuration
//
// `NotevaultConfig` is the flat, environment-shaped surface (one field per
// NOTEVAULT_* variable). The pool and backup layers consume the typed views
// produced by `pool_config()` / `backup_config()`.

use crate::application::constants::{
    DEFAULT_BACKUP_INTERVAL, DEFAULT_MAINTENANCE_INTERVAL, DEFAULT_REAP_INTERVAL,
};
use crate::domain::RetentionPolicy;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "~/.notevault/notevault.db";
pub const DEFAULT_BACKUP_DIR: &str = "~/.notevault/backups";
pub const ENV_PREFIX: &str = "NOTEVAULT";

/// Flat configuration as read from the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotevaultConfig {
    pub db_path: String,
    pub max_connections: u32,
    pub initial_connections: u32,
    pub min_idle: u32,
    pub acquire_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub busy_timeout_ms: u64,
    pub slow_query_ms: u64,
    pub reap_interval_secs: u64,
    pub maintenance_interval_secs: u64,

    pub backup_dir: String,
    pub backup_keep_last: Option<usize>,
    pub backup_max_age_days: Option<u64>,
    pub backup_schedule_enabled: bool,
    pub backup_interval_secs: u64,
    pub backup_compress: bool,
    /// Base64-encoded 32-byte key; encryption is unavailable without it
    pub backup_encryption_key: Option<String>,

    pub log_format: String,
    pub log_dir: Option<String>,
}

impl Default for NotevaultConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            max_connections: 10,
            initial_connections: 3,
            min_idle: 0,
            acquire_timeout_ms: 30_000,
            idle_timeout_ms: 5 * 60 * 1000,
            busy_timeout_ms: 5_000,
            slow_query_ms: 10_000,
            reap_interval_secs: 5 * 60,
            maintenance_interval_secs: 60 * 60,
            backup_dir: DEFAULT_BACKUP_DIR.to_string(),
            backup_keep_last: Some(10),
            backup_max_age_days: Some(30),
            backup_schedule_enabled: false,
            backup_interval_secs: 24 * 60 * 60,
            backup_compress: true,
            backup_encryption_key: None,
            log_format: "pretty".to_string(),
            log_dir: None,
        }
    }
}

impl NotevaultConfig {
    /// Read NOTEVAULT_* variables over the defaults, expand `~` in paths and
    /// validate
    pub fn from_env() -> Result<Self> {
        Self::from_environment(config::Environment::with_prefix(ENV_PREFIX))
    }

    fn from_environment(source: config::Environment) -> Result<Self> {
        let mut loaded: NotevaultConfig = config::Config::builder()
            .add_source(source.try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| AppError::Config(e.to_string()))?;

        loaded.db_path = shellexpand::tilde(&loaded.db_path).into_owned();
        loaded.backup_dir = shellexpand::tilde(&loaded.backup_dir).into_owned();
        loaded.log_dir = loaded
            .log_dir
            .map(|dir| shellexpand::tilde(&dir).into_owned());

        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject values that would make the pool or scheduler misbehave
    pub fn validate(&self) -> Result<()> {
        if self.db_path.trim().is_empty() {
            return Err(AppError::Config("db_path must not be empty".into()));
        }
        if self.max_connections == 0 {
            return Err(AppError::Config(
                "max_connections must be greater than zero".into(),
            ));
        }
        if self.acquire_timeout_ms == 0 {
            return Err(AppError::Config(
                "acquire_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.backup_schedule_enabled && self.backup_interval_secs == 0 {
            return Err(AppError::Config(
                "backup_interval_secs must be greater than zero when scheduling is enabled".into(),
            ));
        }
        if self.backup_keep_last == Some(0) {
            return Err(AppError::Config(
                "backup_keep_last must keep at least one backup".into(),
            ));
        }
        Ok(())
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            db_path: PathBuf::from(&self.db_path),
            max_connections: self.max_connections,
            initial_connections: self.initial_connections.min(self.max_connections),
            min_idle: self.min_idle,
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            slow_query_threshold: Duration::from_millis(self.slow_query_ms),
            reap_interval: Duration::from_secs(self.reap_interval_secs),
            maintenance_interval: Duration::from_secs(self.maintenance_interval_secs),
            ..PoolConfig::default()
        }
    }

    /// Backup settings; the encryption key is decoded by the caller because
    /// core does not depend on an encoding crate.
    pub fn backup_config(&self) -> BackupConfig {
        BackupConfig {
            backup_dir: PathBuf::from(&self.backup_dir),
            retention: RetentionPolicy {
                keep_last: self.backup_keep_last,
                max_age: self
                    .backup_max_age_days
                    .map(|days| Duration::from_secs(days * 24 * 60 * 60)),
            },
            compress_by_default: self.backup_compress,
            encryption_key: None,
            schedule_enabled: self.backup_schedule_enabled,
            schedule_interval: Duration::from_secs(self.backup_interval_secs),
            drain_timeout: BackupConfig::default().drain_timeout,
        }
    }
}

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub db_path: PathBuf,
    /// Hard upper bound on open connections (idle + in use)
    pub max_connections: u32,
    /// Connections opened eagerly by `initialize()`
    pub initial_connections: u32,
    /// Idle connections the reaper never closes
    pub min_idle: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    /// SQLite busy handler timeout
    pub busy_timeout: Duration,
    pub slow_query_threshold: Duration,
    pub reap_interval: Duration,
    pub maintenance_interval: Duration,
    /// PRAGMA cache_size (negative = KiB)
    pub cache_size: i64,
    /// PRAGMA mmap_size in bytes
    pub mmap_size: i64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("notevault.db"),
            max_connections: 10,
            initial_connections: 3,
            min_idle: 0,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(5 * 60),
            busy_timeout: Duration::from_secs(5),
            slow_query_threshold: Duration::from_secs(10),
            reap_interval: DEFAULT_REAP_INTERVAL,
            maintenance_interval: DEFAULT_MAINTENANCE_INTERVAL,
            cache_size: -64_000,
            mmap_size: 256 * 1024 * 1024,
        }
    }
}

impl PoolConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Default::default()
        }
    }
}

/// Backup manager configuration
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub backup_dir: PathBuf,
    pub retention: RetentionPolicy,
    pub compress_by_default: bool,
    pub encryption_key: Option<[u8; 32]>,
    pub schedule_enabled: bool,
    pub schedule_interval: Duration,
    /// How long a restore waits for in-flight operations before aborting
    pub drain_timeout: Duration,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("backups"),
            retention: RetentionPolicy::default(),
            compress_by_default: true,
            encryption_key: None,
            schedule_enabled: false,
            schedule_interval: DEFAULT_BACKUP_INTERVAL,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl BackupConfig {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = NotevaultConfig::default();
        assert!(config.validate().is_ok());

        let pool = config.pool_config();
        assert_eq!(pool.max_connections, 10);
        assert_eq!(pool.initial_connections, 3);
        assert_eq!(pool.slow_query_threshold, Duration::from_secs(10));
        assert_eq!(pool.reap_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_initial_connections_capped_by_max() {
        let config = NotevaultConfig {
            max_connections: 2,
            initial_connections: 5,
            ..Default::default()
        };
        assert_eq!(config.pool_config().initial_connections, 2);
    }

    #[test]
    fn test_validate_rejects_zero_pool() {
        let config = NotevaultConfig {
            max_connections: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::with_prefix(ENV_PREFIX).source(Some(map))
    }

    #[test]
    fn test_environment_overrides_defaults() {
        let config = NotevaultConfig::from_environment(env(&[
            ("NOTEVAULT_DB_PATH", "/var/lib/notevault/vault.db"),
            ("NOTEVAULT_MAX_CONNECTIONS", "4"),
            ("NOTEVAULT_ACQUIRE_TIMEOUT_MS", "250"),
            ("NOTEVAULT_BACKUP_SCHEDULE_ENABLED", "true"),
            ("NOTEVAULT_BACKUP_KEEP_LAST", "5"),
        ]))
        .unwrap();

        assert_eq!(config.db_path, "/var/lib/notevault/vault.db");
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.acquire_timeout_ms, 250);
        assert!(config.backup_schedule_enabled);
        assert_eq!(config.backup_keep_last, Some(5));
        // Untouched values keep their defaults
        assert_eq!(config.initial_connections, 3);
    }

    #[test]
    fn test_environment_validation_applies() {
        let result = NotevaultConfig::from_environment(env(&[("NOTEVAULT_MAX_CONNECTIONS", "0")]));
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_backup_config_retention() {
        let config = NotevaultConfig {
            backup_keep_last: Some(3),
            backup_max_age_days: Some(2),
            ..Default::default()
        };
        let backup = config.backup_config();
        assert_eq!(backup.retention.keep_last, Some(3));
        assert_eq!(
            backup.retention.max_age,
            Some(Duration::from_secs(2 * 24 * 60 * 60))
        );
        assert!(backup.encryption_key.is_none());
    }
}
