//! Buildpack manifest model.
//!
//! A buildpack's `manifest.yml` is read two ways: as a typed [`Manifest`]
//! used for iteration and validation, and as a [`ManifestDocument`] that
//! keeps every key (known or not) in its original order so the document can
//! be rewritten without losing fields this crate does not model.

mod document;
mod model;
mod stack;

pub use document::{set_dependency_file, ManifestDocument};
pub use model::{DefaultVersion, Dependency, Manifest};
pub use stack::version_matches;

use std::io;
use std::path::PathBuf;

/// File name of the manifest inside a buildpack directory.
pub const MANIFEST_FILE_NAME: &str = "manifest.yml";

/// Result type for manifest operations.
pub type ManifestResult<T> = Result<T, ManifestError>;

/// Errors from loading, validating or rewriting a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse manifest {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to serialize manifest: {0}")]
    Serialize(#[source] serde_yaml::Error),

    /// A document field does not have the shape the packager relies on.
    #[error("could not cast `{field}` to {expected}")]
    Cast {
        field: String,
        expected: &'static str,
    },

    #[error("Stack `{0}` not found in manifest")]
    StackNotFound(String),

    #[error("No matching default dependency `{name}` for stack `{stack}`")]
    NoDefaultVersion { name: String, stack: String },
}

impl ManifestError {
    pub(crate) fn cast(field: impl Into<String>, expected: &'static str) -> Self {
        ManifestError::Cast {
            field: field.into(),
            expected,
        }
    }
}
