//! Store configuration.
//!
//! Loaded from `{data_dir}/tagrepl.json` when present, otherwise defaults.
//! Environment variables override both:
//! - `TAGREPL_DB_PATH`: SQLite database path
//! - `TAGREPL_BUSY_TIMEOUT_MS`: how long to wait on a locked database

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::impls::sqlite::DEFAULT_BUSY_TIMEOUT;

pub const CONFIG_FILE_NAME: &str = "tagrepl.json";
pub const ENV_DB_PATH: &str = "TAGREPL_DB_PATH";
pub const ENV_BUSY_TIMEOUT_MS: &str = "TAGREPL_BUSY_TIMEOUT_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file. `None` keeps tasks in memory only.
    pub path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT.as_millis() as u64,
        }
    }
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `{data_dir}/tagrepl.json`, falling back to defaults when it is
    /// missing or unreadable, then apply environment overrides.
    pub fn load_or_default(data_dir: &Path) -> Self {
        let file = data_dir.join(CONFIG_FILE_NAME);
        let config = if file.exists() {
            match Self::load(&file) {
                Ok(config) => {
                    info!(path = %file.display(), "loaded store config");
                    config
                }
                Err(e) => {
                    warn!(error = %e, "using default store config");
                    Self::default()
                }
            }
        } else {
            Self::default()
        };
        config.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides looked up by variable name.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(path) = lookup(ENV_DB_PATH).filter(|p| !p.is_empty()) {
            self.path = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup(ENV_BUSY_TIMEOUT_MS) {
            match raw.parse() {
                Ok(ms) => self.busy_timeout_ms = ms,
                Err(_) => warn!(value = %raw, "ignoring invalid {ENV_BUSY_TIMEOUT_MS}"),
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_keep_tasks_in_memory() {
        let config = StoreConfig::default();
        assert_eq!(config.path, None);
        assert_eq!(config.busy_timeout(), DEFAULT_BUSY_TIMEOUT);
    }

    #[test]
    fn load_or_default_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::load_or_default(dir.path());
        assert_eq!(config.busy_timeout_ms, StoreConfig::default().busy_timeout_ms);
    }

    #[test]
    fn load_reads_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&file, r#"{ "path": "/var/lib/tagrepl/tasks.db" }"#).unwrap();

        let config = StoreConfig::load(&file).unwrap();
        assert_eq!(config.path, Some(PathBuf::from("/var/lib/tagrepl/tasks.db")));
        assert_eq!(config.busy_timeout_ms, StoreConfig::default().busy_timeout_ms);
    }

    #[test]
    fn load_reports_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&file, "invalid json").unwrap();

        assert!(matches!(StoreConfig::load(&file), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            StoreConfig::load(&dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn overrides_replace_file_values() {
        let env: HashMap<&str, &str> =
            HashMap::from([(ENV_DB_PATH, "/tmp/override.db"), (ENV_BUSY_TIMEOUT_MS, "250")]);
        let config = StoreConfig::default()
            .with_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.path, Some(PathBuf::from("/tmp/override.db")));
        assert_eq!(config.busy_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn invalid_timeout_override_is_ignored() {
        let config = StoreConfig::default().with_overrides(|name| {
            (name == ENV_BUSY_TIMEOUT_MS).then(|| "soon".to_string())
        });
        assert_eq!(config, StoreConfig::default());
    }
}
