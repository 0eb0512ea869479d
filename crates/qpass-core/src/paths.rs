//! Standard paths used by qpass

use std::ffi::OsString;
use std::path::PathBuf;

/// Environment variable `pass` uses to locate the password store
pub const STORE_DIR_VARIABLE: &str = "PASSWORD_STORE_DIR";

/// Standard qpass paths
pub struct Paths {
    /// Config directory (~/.config/qpass)
    pub config: PathBuf,
    /// Store used when nothing else is configured ($PASSWORD_STORE_DIR or ~/.password-store)
    pub default_store: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    pub fn new() -> Self {
        Self::with_store_dir(std::env::var_os(STORE_DIR_VARIABLE))
    }

    /// Build paths from an explicit `$PASSWORD_STORE_DIR` value
    pub fn with_store_dir(store_dir: Option<OsString>) -> Self {
        let config = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("qpass");

        let default_store = match store_dir {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join(".password-store"),
        };

        Self {
            config,
            default_store,
        }
    }

    /// Path of the configuration file
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_dir_override() {
        let paths = Paths::with_store_dir(Some(OsString::from("/srv/passwords")));
        assert_eq!(paths.default_store, PathBuf::from("/srv/passwords"));
    }

    #[test]
    fn test_default_store_location() {
        let paths = Paths::with_store_dir(None);
        assert!(paths.default_store.ends_with(".password-store"));

        // An empty variable counts as unset
        let paths = Paths::with_store_dir(Some(OsString::new()));
        assert!(paths.default_store.ends_with(".password-store"));
    }

    #[test]
    fn test_config_file() {
        let paths = Paths::with_store_dir(None);
        assert!(paths.config_file().ends_with("qpass/config.json"));
    }
}
