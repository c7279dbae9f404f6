//! Effective configuration with provenance
//!
//! The merged configuration plus the list of layers that contributed to it,
//! file layers carrying the SHA-256 of their raw bytes.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::defaults::{config_root, BuiltinDefaults, CONFIG_FILE_NAME};
use super::merge::merge_layers;

/// Upper bound for `lock_timeout_seconds` (one day)
const MAX_LOCK_TIMEOUT_SECONDS: u64 = 86_400;

/// Origin of a configuration layer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    User,
    Cli,
}

/// A contributing layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path, for file layers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 of the raw file bytes, for file layers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Typed settings read from the merged configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagerConfig {
    pub cache_dir: PathBuf,
    pub lock_timeout: Duration,
    pub stage_exclude: Vec<String>,
}

#[derive(Deserialize)]
struct RawConfig {
    cache_dir: PathBuf,
    lock_timeout_seconds: u64,
    #[serde(default)]
    stage: RawStage,
}

#[derive(Default, Deserialize)]
struct RawStage {
    #[serde(default)]
    exclude: Vec<String>,
}

/// Merged configuration with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    /// When this config was computed
    pub created_at: DateTime<Utc>,

    /// The merged configuration object
    pub config: Value,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,
}

impl EffectiveConfig {
    /// Load the configuration the CLI uses.
    ///
    /// An explicit `config_path` must exist; otherwise the default user
    /// config is read when present.
    pub fn load(config_path: Option<&Path>, cli_overrides: Option<Value>) -> Result<Self, ConfigError> {
        let root = config_root();
        let user_config = match config_path {
            Some(path) => {
                if !path.is_file() {
                    return Err(ConfigError::Missing(path.to_path_buf()));
                }
                Some(path.to_path_buf())
            }
            None => Some(root.join(CONFIG_FILE_NAME)).filter(|path| path.is_file()),
        };
        Self::build(
            BuiltinDefaults::under(&root),
            user_config.as_deref(),
            cli_overrides,
        )
    }

    /// Build from explicit layers. A missing user config file is skipped.
    pub fn build(
        defaults: BuiltinDefaults,
        user_config: Option<&Path>,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let mut layers = vec![defaults.to_value()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        if let Some(path) = user_config.filter(|path| path.exists()) {
            let (value, digest) = load_toml_file(path)?;
            debug!(path = %path.display(), digest = %digest, "loaded user config");
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::User,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let effective = Self {
            created_at: Utc::now(),
            config: merge_layers(layers),
            sources,
        };
        effective.packager()?;
        Ok(effective)
    }

    /// Typed, validated view of the merged values
    pub fn packager(&self) -> Result<PackagerConfig, ConfigError> {
        let raw: RawConfig = serde_json::from_value(self.config.clone())
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if raw.lock_timeout_seconds == 0 || raw.lock_timeout_seconds > MAX_LOCK_TIMEOUT_SECONDS {
            return Err(ConfigError::Validation(format!(
                "lock_timeout_seconds must be in (0, {}]",
                MAX_LOCK_TIMEOUT_SECONDS
            )));
        }
        if raw.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation("cache_dir must not be empty".to_string()));
        }

        Ok(PackagerConfig {
            cache_dir: raw.cache_dir,
            lock_timeout: Duration::from_secs(raw.lock_timeout_seconds),
            stage_exclude: raw.stage.exclude,
        })
    }
}

/// Read a TOML file, returning it as JSON plus the digest of its bytes
fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
    let bytes = fs::read(path).map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
    let digest = hex::encode(Sha256::digest(&bytes));

    let contents = String::from_utf8(bytes)
        .map_err(|e| ConfigError::Parse(format!("{}: invalid UTF-8: {}", path.display(), e)))?;
    let table: toml::Value = toml::from_str(&contents)
        .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;

    Ok((toml_to_json(table), digest))
}

fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(key, value)| (key, toml_to_json(value)))
                .collect(),
        ),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),
}
