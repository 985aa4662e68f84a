/// Configuration
///
/// Settings live in `~/.aria/config.toml`. A missing file means defaults;
/// enable/disable changes made at the prompt are written back.

use crate::error::{AriaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Directory under the home directory holding config and tracker data
pub const ARIA_DIR: &str = ".aria";

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AriaConfig {
    /// Where tracker files are kept
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Let plugin failures end the loop instead of being suppressed
    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_context_refresh_secs")]
    pub context_refresh_secs: u64,

    /// Poll interval of file watchers
    #[serde(default = "default_watch_interval_secs")]
    pub watch_interval_secs: u64,

    /// Plugin id → enabled; ids not listed are enabled
    #[serde(default)]
    pub plugins: BTreeMap<String, bool>,
}

fn default_data_dir() -> PathBuf {
    aria_home().join("data")
}

fn default_context_refresh_secs() -> u64 {
    5
}

fn default_watch_interval_secs() -> u64 {
    2
}

impl Default for AriaConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            debug: false,
            context_refresh_secs: default_context_refresh_secs(),
            watch_interval_secs: default_watch_interval_secs(),
            plugins: BTreeMap::new(),
        }
    }
}

impl AriaConfig {
    /// Parse a config file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: AriaConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn is_plugin_enabled(&self, id: &str) -> bool {
        self.plugins.get(id).copied().unwrap_or(true)
    }
}

/// `~/.aria`, or `./.aria` when there is no home directory
pub fn aria_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(ARIA_DIR)
}

pub fn default_config_path() -> PathBuf {
    aria_home().join(CONFIG_FILE)
}

/// The loaded config plus the file it came from
///
/// Shared between the resolver, which records enable/disable, and the
/// config watcher, which reloads it.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    config: Mutex<AriaConfig>,
}

impl ConfigStore {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = AriaConfig::load(&path)?;
        Ok(Self {
            path,
            config: Mutex::new(config),
        })
    }

    /// Store that is never read from disk, still saved to `path` on change
    pub fn with_config(path: impl Into<PathBuf>, config: AriaConfig) -> Self {
        Self {
            path: path.into(),
            config: Mutex::new(config),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current settings
    pub fn snapshot(&self) -> AriaConfig {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record a plugin's enabled flag and write the file
    pub fn set_plugin_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let mut config = self.config.lock().unwrap_or_else(PoisonError::into_inner);
        config.plugins.insert(id.to_string(), enabled);
        config.save(&self.path)?;
        info!(plugin = id, enabled, path = %self.path.display(), "saved plugin state");
        Ok(())
    }

    /// Re-read the file, returning the new settings
    ///
    /// A file that fails to parse leaves the current settings in place.
    pub fn reload(&self) -> Result<AriaConfig> {
        let fresh = AriaConfig::load(&self.path).map_err(|e| match e {
            AriaError::Config(detail) => {
                AriaError::Config(format!("{}: {}", self.path.display(), detail))
            }
            other => other,
        })?;

        let mut config = self.config.lock().unwrap_or_else(PoisonError::into_inner);
        *config = fresh.clone();
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = AriaConfig::load(&temp.path().join("config.toml")).unwrap();
        assert_eq!(config, AriaConfig::default());
        assert!(config.is_plugin_enabled("anything"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "debug = true\n\n[plugins]\ntimer = false\n").unwrap();

        let config = AriaConfig::load(&path).unwrap();
        assert!(config.debug);
        assert_eq!(config.context_refresh_secs, 5);
        assert!(!config.is_plugin_enabled("timer"));
        assert!(config.is_plugin_enabled("jump"));
    }

    #[test]
    fn test_invalid_toml_is_a_config_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "debug = [unterminated").unwrap();

        assert!(matches!(AriaConfig::load(&path), Err(AriaError::Config(_))));
    }

    #[test]
    fn test_store_persists_plugin_flags() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        let store = ConfigStore::load(&path).unwrap();
        store.set_plugin_enabled("timer", false).unwrap();

        let reloaded = AriaConfig::load(&path).unwrap();
        assert_eq!(reloaded.plugins.get("timer"), Some(&false));
    }

    #[test]
    fn test_reload_keeps_old_settings_on_parse_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[plugins]\njump = false\n").unwrap();

        let store = ConfigStore::load(&path).unwrap();
        fs::write(&path, "[plugins\n").unwrap();

        assert!(store.reload().is_err());
        assert!(!store.snapshot().is_plugin_enabled("jump"));
    }
}
