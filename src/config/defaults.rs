//! Built-in defaults (layer 1)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Name of the user config file inside [`config_root`]
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// `$HOME/.buildpack-packager`, or under `/tmp` when `HOME` is unset
pub fn config_root() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    Path::new(&home).join(".buildpack-packager")
}

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Dependency cache root (default: `<config_root>/cache`)
    pub cache_dir: PathBuf,

    /// Seconds to wait for the cache lock (default: 300)
    pub lock_timeout_seconds: u64,

    /// Extra stager exclusion globs (default: none)
    pub stage_exclude: Vec<String>,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self::under(&config_root())
    }
}

impl BuiltinDefaults {
    /// Defaults rooted at an explicit config directory
    pub fn under(root: &Path) -> Self {
        Self {
            cache_dir: root.join("cache"),
            lock_timeout_seconds: 300,
            stage_exclude: Vec::new(),
        }
    }

    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "cache_dir": self.cache_dir.to_string_lossy(),
            "lock_timeout_seconds": self.lock_timeout_seconds,
            "stage": {
                "exclude": self.stage_exclude
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_under_root() {
        let defaults = BuiltinDefaults::under(Path::new("/home/me/.buildpack-packager"));
        assert_eq!(
            defaults.cache_dir,
            PathBuf::from("/home/me/.buildpack-packager/cache")
        );
        assert_eq!(defaults.lock_timeout_seconds, 300);
        assert!(defaults.stage_exclude.is_empty());
    }

    #[test]
    fn test_to_value() {
        let value = BuiltinDefaults::under(Path::new("/root")).to_value();

        assert_eq!(value["cache_dir"], "/root/cache");
        assert_eq!(value["lock_timeout_seconds"], 300);
        assert_eq!(value["stage"]["exclude"], serde_json::json!([]));
    }
}
