//! Packager configuration
//!
//! Three layers, later ones winning:
//! 1. Built-in defaults
//! 2. User config (`~/.buildpack-packager/config.toml`, or `--config`)
//! 3. CLI flags

mod defaults;
mod effective;
mod merge;

pub use defaults::{config_root, BuiltinDefaults, CONFIG_FILE_NAME};
pub use effective::{ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig, PackagerConfig};
pub use merge::{deep_merge, merge_layers};
