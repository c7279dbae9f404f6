//! Typed projection of `manifest.yml`.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

use crate::{ManifestDocument, ManifestResult};

/// A binary dependency declared in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    #[serde(default)]
    pub name: String,

    #[serde(default, deserialize_with = "string_or_number")]
    pub version: String,

    pub uri: String,

    /// Lowercase hex SHA-256 of the artifact at `uri`.
    pub sha256: String,

    /// Stacks this artifact was built for.
    #[serde(default)]
    pub cf_stacks: Vec<String>,
}

impl Dependency {
    /// Whether this dependency was built for `stack`.
    pub fn supports_stack(&self, stack: &str) -> bool {
        self.cf_stacks.iter().any(|s| s == stack)
    }
}

/// A `default_versions` entry: the version pattern installed when an app
/// does not ask for a specific one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultVersion {
    pub name: String,

    #[serde(deserialize_with = "string_or_number")]
    pub version: String,
}

/// Read-only typed view of a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub language: String,

    /// Executable run inside the staged directory before archiving.
    #[serde(default)]
    pub pre_package: Option<String>,

    /// Files copied into the archive, relative to the buildpack root.
    #[serde(default, alias = "included_files")]
    pub include_files: Vec<String>,

    #[serde(default)]
    pub dependencies: Vec<Dependency>,

    #[serde(default)]
    pub default_versions: Vec<DefaultVersion>,

    /// Present only in manifests that were already packaged for one stack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl Manifest {
    /// Load `manifest.yml` from a buildpack directory.
    pub fn load(buildpack_dir: &Path) -> ManifestResult<Self> {
        ManifestDocument::load(buildpack_dir)?.view()
    }

    /// The pre-package hook, if one is declared and non-empty.
    pub fn pre_package_command(&self) -> Option<&str> {
        self.pre_package.as_deref().filter(|cmd| !cmd.trim().is_empty())
    }
}

/// Version fields are often written unquoted (`version: 1.10`), which YAML
/// reads as a number.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Null => Ok(String::new()),
        other => Err(D::Error::custom(format!(
            "expected a version string, found {:?}",
            other
        ))),
    }
}
