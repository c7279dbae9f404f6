//! Round-trip view of `manifest.yml`.
//!
//! The document keeps the YAML mapping as parsed, in key order, so fields the
//! typed [`Manifest`] does not know about are written back untouched.

use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};

use crate::{Manifest, ManifestError, ManifestResult, MANIFEST_FILE_NAME};

const DEPENDENCIES_KEY: &str = "dependencies";
const STACK_KEY: &str = "stack";
const FILE_KEY: &str = "file";

/// Key-ordered manifest document bound to the file it was read from.
#[derive(Debug, Clone)]
pub struct ManifestDocument {
    path: PathBuf,
    root: Mapping,
}

impl ManifestDocument {
    /// Load `manifest.yml` from a buildpack directory.
    pub fn load(buildpack_dir: &Path) -> ManifestResult<Self> {
        Self::load_file(&buildpack_dir.join(MANIFEST_FILE_NAME))
    }

    /// Load a manifest document from an explicit path.
    pub fn load_file(path: &Path) -> ManifestResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let value: Value = serde_yaml::from_str(&text).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let root = match value {
            Value::Mapping(map) => map,
            _ => return Err(ManifestError::cast("<root>", "a mapping")),
        };

        Ok(Self {
            path: path.to_path_buf(),
            root,
        })
    }

    /// Typed projection of the same document.
    ///
    /// A `dependencies` value that is not a sequence of mappings fails as a
    /// [`ManifestError::Cast`] naming the offending field.
    pub fn view(&self) -> ManifestResult<Manifest> {
        self.check_dependency_shapes()?;
        serde_yaml::from_value(Value::Mapping(self.root.clone())).map_err(|source| {
            ManifestError::Parse {
                path: self.path.clone(),
                source,
            }
        })
    }

    /// Path this document was loaded from and will be written to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw access to a top-level key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    /// Top-level keys in document order.
    pub fn keys(&self) -> Vec<String> {
        self.root
            .keys()
            .filter_map(|k| k.as_str().map(str::to_string))
            .collect()
    }

    /// Pin the document to a single stack.
    pub fn set_stack(&mut self, stack: &str) {
        self.root
            .insert(Value::from(STACK_KEY), Value::from(stack.to_string()));
    }

    /// The raw `dependencies` sequence.
    pub fn dependency_entries(&self) -> ManifestResult<&Vec<Value>> {
        match self.root.get(DEPENDENCIES_KEY) {
            Some(Value::Sequence(seq)) => Ok(seq),
            _ => Err(ManifestError::cast(DEPENDENCIES_KEY, "a sequence")),
        }
    }

    /// Every present `dependencies` element must be a mapping. A missing
    /// key passes here and is left to [`Self::dependency_entries`].
    fn check_dependency_shapes(&self) -> ManifestResult<()> {
        if self.root.get(DEPENDENCIES_KEY).is_none() {
            return Ok(());
        }
        let entries = self.dependency_entries()?;
        match entries.iter().position(|entry| !entry.is_mapping()) {
            Some(index) => Err(ManifestError::cast(
                format!("{}[{}]", DEPENDENCIES_KEY, index),
                "a mapping",
            )),
            None => Ok(()),
        }
    }

    /// Clone the raw dependency entry at `index` as an open mapping.
    pub fn dependency_entry(&self, index: usize) -> ManifestResult<Mapping> {
        let field = format!("{}[{}]", DEPENDENCIES_KEY, index);
        match self.dependency_entries()?.get(index) {
            Some(Value::Mapping(map)) => Ok(map.clone()),
            _ => Err(ManifestError::cast(field, "a mapping")),
        }
    }

    /// Replace the whole `dependencies` sequence, keeping its key position.
    pub fn replace_dependencies(&mut self, entries: Vec<Mapping>) {
        let seq = entries.into_iter().map(Value::Mapping).collect();
        self.root
            .insert(Value::from(DEPENDENCIES_KEY), Value::Sequence(seq));
    }

    /// Serialize the document to YAML text.
    pub fn to_yaml(&self) -> ManifestResult<String> {
        serde_yaml::to_string(&self.root).map_err(ManifestError::Serialize)
    }

    /// Write the document back to the file it was loaded from.
    pub fn write(&self) -> ManifestResult<()> {
        let text = self.to_yaml()?;
        fs::write(&self.path, text).map_err(|source| ManifestError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Record the archive-relative location of a bundled dependency.
pub fn set_dependency_file(entry: &mut Mapping, file_name: &str) {
    entry.insert(Value::from(FILE_KEY), Value::from(file_name.to_string()));
}
