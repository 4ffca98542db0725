//! Code-intelligence service configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bundle storage configuration
    pub storage: StorageConfig,

    /// Query limits
    pub query: QueryConfig,

    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.storage.reader_cache_size == 0 {
            return Err(eyre::eyre!("storage.reader-cache-size must be at least 1"));
        }
        if self.query.timeout_ms == 0 {
            return Err(eyre::eyre!("query.timeout-ms must be greater than 0"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Project-local: .codeintel.yml
        let local_config = PathBuf::from(".codeintel.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // User: ~/.config/codeintel/codeintel.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("codeintel").join("codeintel.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    ///
    /// Errors are swallowed; the full `load` reports them later.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|config| config.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Bundle storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `<id>.lsif.db` bundle files
    #[serde(rename = "bundle-dir")]
    pub bundle_dir: PathBuf,

    /// Open bundle databases kept in memory
    #[serde(rename = "reader-cache-size")]
    pub reader_cache_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bundle_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("codeintel")
                .join("bundles"),
            reader_cache_size: 16,
        }
    }
}

impl StorageConfig {
    /// File path of the bundle for `id`
    pub fn bundle_path(&self, id: i64) -> PathBuf {
        self.bundle_dir.join(format!("{id}.lsif.db"))
    }
}

/// Query limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Per-request deadline in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Page size used when a connection request gives none
    #[serde(rename = "default-page-size")]
    pub default_page_size: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            default_page_size: 100,
        }
    }
}

impl QueryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.storage.bundle_dir.ends_with("codeintel/bundles"));
        assert_eq!(config.storage.reader_cache_size, 16);
        assert_eq!(config.query.timeout_ms, 30_000);
        assert_eq!(config.query.default_page_size, 100);
        assert!(config.log_level.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
storage:
  bundle-dir: /var/lib/codeintel
  reader-cache-size: 4

query:
  timeout-ms: 500
  default-page-size: 25

log-level: debug
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.storage.bundle_dir, PathBuf::from("/var/lib/codeintel"));
        assert_eq!(config.storage.reader_cache_size, 4);
        assert_eq!(config.query.timeout(), Duration::from_millis(500));
        assert_eq!(config.query.default_page_size, 25);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
query:
  timeout-ms: 1000
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.query.timeout_ms, 1000);
        assert_eq!(config.query.default_page_size, 100);
        assert_eq!(config.storage.reader_cache_size, 16);
    }

    #[test]
    fn test_bundle_path() {
        let storage = StorageConfig {
            bundle_dir: PathBuf::from("/bundles"),
            reader_cache_size: 1,
        };
        assert_eq!(storage.bundle_path(42), PathBuf::from("/bundles/42.lsif.db"));
    }

    #[test]
    fn test_validate_rejects_zero_cache() {
        let mut config = Config::default();
        config.storage.reader_cache_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("codeintel.yml");
        fs::write(&path, "log-level: warn\nstorage:\n  reader-cache-size: 2\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.storage.reader_cache_size, 2);
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("warn"));
    }

    #[test]
    fn test_load_explicit_missing_path_fails() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.yml");
        assert!(Config::load(Some(&missing)).is_err());
    }
}
