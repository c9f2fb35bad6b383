use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::types::error::{Result, VaultError};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub retention: RetentionConfig,
}

/// Where and how records are persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the four record files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Delay between the first dirty signal and the resulting flush
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Backup directory, relative to `data_dir`
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,

    /// Snapshots to keep when exporting (0 keeps all)
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
}

/// Bounds on per-conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Hard cap applied on every append
    #[serde(default = "default_thread_cap")]
    pub thread_cap: usize,

    /// Length threads are trimmed to by the periodic sweep
    #[serde(default = "default_sweep_length")]
    pub sweep_length: usize,

    /// Period of the maintenance timer (sweep + full flush)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chatvault")
}

fn default_debounce_ms() -> u64 {
    2_000
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("backups")
}

fn default_max_backups() -> usize {
    5
}

fn default_thread_cap() -> usize {
    200
}

fn default_sweep_length() -> usize {
    100
}

fn default_interval_secs() -> u64 {
    300
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            debounce_ms: default_debounce_ms(),
            backup_dir: default_backup_dir(),
            max_backups: default_max_backups(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            thread_cap: default_thread_cap(),
            sweep_length: default_sweep_length(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl StorageConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Absolute backup directory
    pub fn backup_root(&self) -> PathBuf {
        self.data_dir.join(&self.backup_dir)
    }
}

impl RetentionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl AppConfig {
    /// Defaults with a specific data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.storage.data_dir = data_dir.into();
        config
    }

    /// Reject values the store cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.storage.debounce_ms == 0 {
            return Err(VaultError::Config("storage.debounce_ms must be positive".into()));
        }
        if self.retention.thread_cap == 0 {
            return Err(VaultError::Config("retention.thread_cap must be positive".into()));
        }
        if self.retention.sweep_length == 0 {
            return Err(VaultError::Config("retention.sweep_length must be positive".into()));
        }
        if self.retention.sweep_length > self.retention.thread_cap {
            return Err(VaultError::Config(format!(
                "retention.sweep_length ({}) exceeds retention.thread_cap ({})",
                self.retention.sweep_length, self.retention.thread_cap
            )));
        }
        if self.retention.interval_secs == 0 {
            return Err(VaultError::Config("retention.interval_secs must be positive".into()));
        }
        Ok(())
    }
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // XDG config path
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("chatvault").join("config.toml"));
    }

    // Home directory fallback
    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".config").join("chatvault").join("config.toml"));
        paths.push(home_dir.join(".chatvault.rc"));
    }

    paths
}

/// Load configuration from `path`, or from the first default path that exists
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = path {
        return load_config_from_path(path);
    }

    for path in default_config_paths() {
        if path.exists() {
            info!("Found config at: {:?}", path);
            return load_config_from_path(&path);
        }
    }

    info!("No config file found, using defaults");
    let config = AppConfig::default();
    config.validate()?;
    Ok(config)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<AppConfig> {
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .map_err(|e| VaultError::Config(format!("Failed to read config: {}", e)))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| VaultError::Config(format!("Failed to parse config: {}", e)))?;

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.storage.debounce(), Duration::from_secs(2));
        assert_eq!(config.retention.thread_cap, 200);
        assert_eq!(config.retention.sweep_length, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [storage]
            data_dir = "/var/lib/chatvault"
            debounce_ms = 500

            [retention]
            sweep_length = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/chatvault"));
        assert_eq!(config.storage.debounce_ms, 500);
        assert_eq!(config.storage.max_backups, 5);
        assert_eq!(config.retention.thread_cap, 200);
        assert_eq!(config.retention.sweep_length, 50);
        assert_eq!(
            config.storage.backup_root(),
            PathBuf::from("/var/lib/chatvault/backups")
        );
    }

    #[test]
    fn test_validate_rejects_sweep_above_cap() {
        let mut config = AppConfig::default();
        config.retention.sweep_length = 300;
        assert!(matches!(config.validate(), Err(VaultError::Config(_))));

        let mut config = AppConfig::default();
        config.storage.debounce_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[retention]\nthread_cap = 20\nsweep_length = 10\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.retention.thread_cap, 20);

        fs::write(&path, "[retention]\nthread_cap = \"many\"\n").unwrap();
        assert!(matches!(load_config(Some(&path)), Err(VaultError::Config(_))));
    }
}
