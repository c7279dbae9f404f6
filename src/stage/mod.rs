//! Buildpack staging
//!
//! Copies a buildpack source tree into an isolated temporary directory so
//! later steps (version stamp, pre-package hook, manifest rewrite) never
//! touch the caller's checkout. Symlinks are reproduced as links, file and
//! directory permission bits are preserved, and excluded entries are skipped
//! together with their whole subtree.

mod exclude;

pub use exclude::{ExcludeError, ExcludeRules};

use std::fs::{self, Permissions};
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;
use walkdir::WalkDir;

/// Prefix of staging directory names under the system temp dir
const STAGING_PREFIX: &str = "buildpack-packager";

/// Errors for staging operations
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Walk error: {0}")]
    WalkError(#[from] walkdir::Error),

    #[error("Exclude rules error: {0}")]
    ExcludeError(#[from] ExcludeError),

    #[error("Path is not within source root: {0}")]
    PathNotInSource(PathBuf),

    #[error("Error while creating '{}' as symlink to '{}': {source}", link.display(), target.display())]
    Symlink {
        link: PathBuf,
        target: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StageError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> StageError + '_ {
        move |source| StageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Counts of staged entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageStats {
    pub files: usize,
    pub directories: usize,
    pub symlinks: usize,
}

/// A staged copy of a buildpack, removed from disk when dropped
#[derive(Debug)]
pub struct StagingDir {
    dir: TempDir,
    stats: StageStats,
}

impl StagingDir {
    /// Root of the staged copy
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// What was copied
    pub fn stats(&self) -> StageStats {
        self.stats
    }

    /// Remove the staged copy now, reporting any failure
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

/// Copies a buildpack tree into a staging directory
pub struct Stager {
    /// Root directory to stage
    source: PathBuf,
    /// Exclusion rules
    exclude: ExcludeRules,
}

impl Stager {
    /// Create a stager with the default exclusions
    pub fn new(source: PathBuf) -> Result<Self, StageError> {
        Ok(Self {
            source,
            exclude: ExcludeRules::new()?,
        })
    }

    /// Replace the exclusion rules
    pub fn with_excludes(mut self, exclude: ExcludeRules) -> Self {
        self.exclude = exclude;
        self
    }

    /// Stage into a fresh temporary directory
    pub fn stage(&self) -> Result<StagingDir, StageError> {
        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir()
            .map_err(StageError::io(&std::env::temp_dir()))?;

        let stats = self.copy_into(dir.path())?;
        debug!(
            source = %self.source.display(),
            staged = %dir.path().display(),
            files = stats.files,
            directories = stats.directories,
            symlinks = stats.symlinks,
            "staged buildpack"
        );

        Ok(StagingDir { dir, stats })
    }

    /// Copy the source tree into an existing directory
    pub fn copy_into(&self, dest_root: &Path) -> Result<StageStats, StageError> {
        let mut stats = StageStats::default();
        // Applied after the walk so read-only directories can still be filled
        let mut dir_permissions: Vec<(PathBuf, Permissions)> = Vec::new();

        let walker = WalkDir::new(&self.source)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.skip(entry.path()));

        for entry in walker {
            let entry = entry?;
            let path = entry.path();

            let rel_path = path
                .strip_prefix(&self.source)
                .map_err(|_| StageError::PathNotInSource(path.to_path_buf()))?;

            // Root itself already exists
            if rel_path.as_os_str().is_empty() {
                continue;
            }

            let dest = dest_root.join(rel_path);
            let file_type = entry.file_type();

            if file_type.is_symlink() {
                let target = fs::read_link(path).map_err(StageError::io(path))?;
                create_symlink(&target, &dest)?;
                stats.symlinks += 1;
            } else if file_type.is_dir() {
                fs::create_dir_all(&dest).map_err(StageError::io(&dest))?;
                let metadata = entry.metadata()?;
                dir_permissions.push((dest, metadata.permissions()));
                stats.directories += 1;
            } else {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent).map_err(StageError::io(parent))?;
                }
                fs::copy(path, &dest).map_err(StageError::io(path))?;
                let metadata = entry.metadata()?;
                fs::set_permissions(&dest, metadata.permissions())
                    .map_err(StageError::io(&dest))?;
                stats.files += 1;
            }
        }

        // Deepest first
        for (dir, permissions) in dir_permissions.into_iter().rev() {
            fs::set_permissions(&dir, permissions).map_err(StageError::io(&dir))?;
        }

        Ok(stats)
    }

    fn skip(&self, path: &Path) -> bool {
        match path.strip_prefix(&self.source) {
            Ok(rel) if !rel.as_os_str().is_empty() => self.exclude.is_excluded(rel),
            _ => false,
        }
    }
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> Result<(), StageError> {
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent).map_err(StageError::io(parent))?;
    }
    std::os::unix::fs::symlink(target, link).map_err(|source| StageError::Symlink {
        link: link.to_path_buf(),
        target: target.to_path_buf(),
        source,
    })
}

#[cfg(not(unix))]
fn create_symlink(target: &Path, link: &Path) -> Result<(), StageError> {
    Err(StageError::Symlink {
        link: link.to_path_buf(),
        target: target.to_path_buf(),
        source: io::Error::new(io::ErrorKind::Unsupported, "symlinks require a unix host"),
    })
}
