//! Exclusion rules for staging
//!
//! Version-control metadata and test suites never reach a packaged
//! buildpack. Extra patterns come from configuration.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

/// Patterns excluded from every staged copy, at any depth.
const DEFAULT_EXCLUDES: &[&str] = &["**/.git", "**/tests"];

/// Errors for exclusion rules
#[derive(Debug, thiserror::Error)]
pub enum ExcludeError {
    #[error("invalid exclude pattern: {0}")]
    GlobError(#[from] globset::Error),
}

/// Exclusion rules matched against paths relative to the staging source
#[derive(Debug, Clone)]
pub struct ExcludeRules {
    glob_set: GlobSet,
}

impl ExcludeRules {
    /// Create new exclusion rules with defaults
    pub fn new() -> Result<Self, ExcludeError> {
        Self::with_patterns::<&str>(&[])
    }

    /// Defaults plus additional patterns
    pub fn with_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ExcludeError> {
        let mut builder = GlobSetBuilder::new();

        for pattern in DEFAULT_EXCLUDES {
            builder.add(Glob::new(pattern)?);
        }

        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if !pattern.is_empty() {
                builder.add(Glob::new(pattern)?);
            }
        }

        Ok(Self {
            glob_set: builder.build()?,
        })
    }

    /// Check if a relative path should be skipped along with its subtree
    pub fn is_excluded(&self, rel_path: &Path) -> bool {
        self.glob_set.is_match(rel_path)
    }
}
