//! Buildpack packager
//!
//! Turns a buildpack source directory into a distributable zip archive:
//! the tree is staged into a scratch copy, the manifest is narrowed to one
//! target stack, dependencies are optionally fetched into a verified cache
//! and bundled, and the result is written as a deflate-compressed archive.

pub mod archive;
pub mod config;
pub mod extension;
pub mod fetch;
pub mod pipeline;
pub mod stage;
pub mod transform;

pub use archive::{ArchiveError, FileEntry};
pub use buildpack_manifest::{Dependency, Manifest, ManifestDocument, ManifestError};
pub use extension::compile_extension_package;
pub use fetch::{DependencyCache, FetchError};
pub use pipeline::{
    archive_file_name, package, package_with, PackageOptions, PackageReport, PipelineError,
};
pub use stage::{Stager, StagingDir};
pub use transform::{transform, TransformError};
