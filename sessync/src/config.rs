//! Configuration management for sessync
//!
//! Default config location: ~/.sessync/config.toml

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sessync_storage::OriginPaths;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::options::SyncOptions;
use crate::policy::{DenyRule, Denylist};

/// Main configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root holding one directory per origin under `origins/`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sessync")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Bound on each storage call in milliseconds, 0 disables it
    #[serde(default)]
    pub operation_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub import_key_values: bool,
    #[serde(default = "default_true")]
    pub import_structured: bool,
    /// Databases never overwritten by an import
    #[serde(default)]
    pub denylist: Vec<DenyRule>,
}

fn default_true() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 0,
            import_key_values: default_true(),
            import_structured: default_true(),
            denylist: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Build runtime options, compiling the denylist rules.
    pub fn to_options(&self) -> Result<SyncOptions> {
        let denylist = Denylist::from_rules(&self.denylist).map_err(|e| anyhow!("{}", e))?;
        Ok(SyncOptions {
            operation_timeout: (self.operation_timeout_ms > 0)
                .then(|| Duration::from_millis(self.operation_timeout_ms)),
            import_key_values: self.import_key_values,
            import_structured: self.import_structured,
            denylist,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// `pretty` or `json`; `LOG_FORMAT` takes precedence
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// `EnvFilter` directives; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_log_level() -> String {
    "info,sessync=debug".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}

/// Expand a leading `~` component to the home directory.
pub fn expand_tilde(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = dirs::home_dir().ok_or_else(|| anyhow!("No home directory to expand ~"))?;
            Ok(if rest.as_os_str().is_empty() { home } else { home.join(rest) })
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}

impl Config {
    /// Load config from default location (~/.sessync/config.toml)
    pub fn load() -> Result<Self> {
        Self::load_from(&default_data_dir())
    }

    /// Load `config.toml` from a data directory, falling back to defaults.
    pub fn load_from(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join("config.toml");

        let mut config = if config_path.exists() {
            Self::parse(&config_path)?
        } else {
            Config::default()
        };

        config.storage.data_dir = data_dir.to_path_buf();
        config.expand_paths()?;
        Ok(config)
    }

    /// Load an explicit config file, writing the defaults there if it is missing.
    pub fn load_or_create(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let mut config = Self::parse(config_path)?;
            config.expand_paths()?;
            Ok(config)
        } else {
            let config = Config::default();
            if let Some(parent) = config_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            let _ = config.save(config_path);
            Ok(config)
        }
    }

    fn parse(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    fn expand_paths(&mut self) -> Result<()> {
        self.storage.data_dir = expand_tilde(&self.storage.data_dir)?;
        Ok(())
    }

    /// Directory layout of one origin under the data directory.
    pub fn origin_paths(&self, origin: &str) -> OriginPaths {
        OriginPaths::for_origin(&self.storage.data_dir, origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.storage.data_dir.ends_with(".sessync"));
        assert_eq!(config.sync.operation_timeout_ms, 0);
        assert!(config.sync.denylist.is_empty());
        assert_eq!(config.observability.log_format, "pretty");

        let options = config.sync.to_options().unwrap();
        assert!(options.operation_timeout.is_none());
        assert!(options.import_key_values && options.import_structured);
        assert!(options.denylist.is_empty());
    }

    #[test]
    fn test_load_from_reads_sync_section() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config.toml"),
            r#"
[sync]
operation_timeout_ms = 2500
import_key_values = false

[[sync.denylist]]
contains = "firebase"

[[sync.denylist]]
pattern = "^_ga"
"#,
        )
        .unwrap();

        let config = Config::load_from(dir.path()).unwrap();
        assert_eq!(config.storage.data_dir, dir.path());

        let options = config.sync.to_options().unwrap();
        assert_eq!(options.operation_timeout, Some(Duration::from_millis(2500)));
        assert!(!options.import_key_values);
        assert!(options.import_structured);
        assert!(options.denylist.is_denied("firebaseLocalStorageDb"));
        assert!(options.denylist.is_denied("_ga_tracker"));
        assert!(!options.denylist.is_denied("notes"));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let sync = SyncConfig {
            denylist: vec![DenyRule::Pattern("[".to_string())],
            ..SyncConfig::default()
        };
        let err = sync.to_options().unwrap_err();
        assert!(err.to_string().contains("denylist"));
    }

    #[test]
    fn test_load_or_create_writes_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let created = Config::load_or_create(&path).unwrap();
        assert!(path.exists());

        let loaded = Config::load_or_create(&path).unwrap();
        assert_eq!(loaded.sync.import_structured, created.sync.import_structured);
        assert_eq!(loaded.observability.log_level, "info,sessync=debug");
    }

    #[test]
    fn test_expand_tilde() {
        let plain = expand_tilde(Path::new("/tmp/x")).unwrap();
        assert_eq!(plain, PathBuf::from("/tmp/x"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/a")).unwrap(), home.join("a"));
        }
    }

    #[test]
    fn test_origin_paths() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(dir.path()).unwrap();
        let paths = config.origin_paths("https://app.example");
        assert!(paths.root().starts_with(dir.path().join("origins")));
    }
}
