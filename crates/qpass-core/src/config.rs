//! Configuration management for qpass

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths::Paths;

/// Environment variable `pass` uses for the clipboard timeout
pub const CLIP_TIME_VARIABLE: &str = "PASSWORD_STORE_CLIP_TIME";

/// One configured password store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSpec {
    /// Root directory of the store
    pub path: PathBuf,

    /// Label shown when entries of several stores collide
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl StoreSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// qpass configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Password stores, in display tie-break order
    #[serde(default)]
    pub stores: Vec<StoreSpec>,

    /// Seconds a copied secret stays on the clipboard
    #[serde(default = "default_clipboard_timeout")]
    pub clipboard_timeout_secs: u64,

    /// Decryption program and its leading arguments; the entry path is appended
    #[serde(default = "default_decrypt_command")]
    pub decrypt_command: Vec<String>,

    /// Seconds to wait for the decryption program
    #[serde(default = "default_decrypt_timeout")]
    pub decrypt_timeout_secs: u64,

    /// Case-insensitive patterns of detail lines never shown on the terminal
    #[serde(default)]
    pub filters: Vec<String>,
}

fn default_clipboard_timeout() -> u64 {
    45
}

fn default_decrypt_command() -> Vec<String> {
    ["gpg", "--quiet", "--yes", "--decrypt"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_decrypt_timeout() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stores: Vec::new(),
            clipboard_timeout_secs: default_clipboard_timeout(),
            decrypt_command: default_decrypt_command(),
            decrypt_timeout_secs: default_decrypt_timeout(),
            filters: Vec::new(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let config = serde_json::from_str(&content)
                .with_context(|| format!("Invalid config: {}", path.display()))?;
            tracing::debug!(path = %path.display(), "loaded configuration");
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `pass` environment conventions on top of the file values
    pub fn apply_env(&mut self) {
        self.apply_clip_time(std::env::var(CLIP_TIME_VARIABLE).ok().as_deref());
    }

    fn apply_clip_time(&mut self, value: Option<&str>) {
        if let Some(value) = value {
            match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.clipboard_timeout_secs = secs,
                _ => tracing::warn!("ignoring invalid {}: {:?}", CLIP_TIME_VARIABLE, value),
            }
        }
    }

    /// Resolve the stores to search
    ///
    /// Directories given on the command line win, then the configured stores,
    /// then `$PASSWORD_STORE_DIR` or `~/.password-store`.
    pub fn store_specs(&self, cli_dirs: &[PathBuf], paths: &Paths) -> Vec<StoreSpec> {
        if !cli_dirs.is_empty() {
            return cli_dirs.iter().map(StoreSpec::new).collect();
        }
        if !self.stores.is_empty() {
            return self.stores.clone();
        }
        vec![StoreSpec::new(&paths.default_store)]
    }

    pub fn clipboard_timeout(&self) -> Duration {
        Duration::from_secs(self.clipboard_timeout_secs)
    }

    pub fn decrypt_timeout(&self) -> Duration {
        Duration::from_secs(self.decrypt_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() -> Result<()> {
        let tmp = TempDir::new()?;
        let config = Config::load(&tmp.path().join("nope.json"))?;
        assert_eq!(config, Config::default());
        assert_eq!(config.clipboard_timeout_secs, 45);
        assert_eq!(config.decrypt_command[0], "gpg");
        Ok(())
    }

    #[test]
    fn test_partial_file() -> Result<()> {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"stores": [{"path": "/a", "label": "work"}, {"path": "/b"}], "clipboard_timeout_secs": 10}"#,
        )?;

        let config = Config::load(&path)?;
        assert_eq!(config.stores.len(), 2);
        assert_eq!(config.stores[0].label.as_deref(), Some("work"));
        assert_eq!(config.stores[1].label, None);
        assert_eq!(config.clipboard_timeout(), Duration::from_secs(10));
        assert_eq!(config.decrypt_timeout_secs, 60);
        Ok(())
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("nested/config.json");
        let mut config = Config::default();
        config.stores.push(StoreSpec::new("/srv/pass").with_label("shared"));
        config.filters.push("^pin:".to_string());
        config.save(&path)?;

        assert_eq!(Config::load(&path)?, config);
        Ok(())
    }

    #[test]
    fn test_invalid_file_is_an_error() -> Result<()> {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "{ not json")?;
        assert!(Config::load(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_clip_time() {
        let mut config = Config::default();
        config.apply_clip_time(Some("12"));
        assert_eq!(config.clipboard_timeout_secs, 12);

        config.apply_clip_time(Some("soon"));
        assert_eq!(config.clipboard_timeout_secs, 12);

        config.apply_clip_time(Some("0"));
        assert_eq!(config.clipboard_timeout_secs, 12);
    }

    #[test]
    fn test_store_resolution_order() {
        let paths = Paths::with_store_dir(Some(OsString::from("/env/store")));
        let mut config = Config::default();

        let specs = config.store_specs(&[], &paths);
        assert_eq!(specs, vec![StoreSpec::new("/env/store")]);

        config.stores.push(StoreSpec::new("/configured").with_label("cfg"));
        let specs = config.store_specs(&[], &paths);
        assert_eq!(specs[0].label.as_deref(), Some("cfg"));

        let specs = config.store_specs(&[PathBuf::from("/cli/one"), PathBuf::from("/cli/two")], &paths);
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].path, PathBuf::from("/cli/two"));
    }
}
