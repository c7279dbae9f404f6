//! Stack-specific manifest rewrite
//!
//! Filters the staged manifest's dependency list down to one stack and,
//! for cached packages, fetches every retained dependency and records its
//! archive location in the entry's `file` key. The typed view drives the
//! walk; the raw document is what gets rewritten, entry `i` of one always
//! being entry `i` of the other.

use std::path::Path;

use buildpack_manifest::{set_dependency_file, Manifest, ManifestDocument, ManifestError};
use thiserror::Error;
use tracing::{debug, info};

use crate::archive::FileEntry;
use crate::fetch::{DependencyCache, FetchError};

/// Errors from the manifest rewrite
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("dependency {name} {version}: {source}")]
    Fetch {
        name: String,
        version: String,
        #[source]
        source: FetchError,
    },
}

/// Result type for the manifest rewrite
pub type TransformResult<T> = Result<T, TransformError>;

/// What the rewrite produced
#[derive(Debug, Clone)]
pub struct Transformed {
    /// Typed view of the manifest as it was before the rewrite
    pub manifest: Manifest,
    /// Include files followed by fetched dependency files, in archive order
    pub files: Vec<FileEntry>,
    /// Number of dependencies kept for the target stack
    pub retained: usize,
    /// Number of dependencies dropped
    pub dropped: usize,
}

/// Rewrite `<staged_dir>/manifest.yml` for `stack`.
///
/// An empty `stack` keeps every dependency. When `cache` is given each
/// retained dependency is fetched through it and appended to the file list.
pub fn transform(
    staged_dir: &Path,
    stack: &str,
    cache: Option<&DependencyCache>,
) -> TransformResult<Transformed> {
    let mut document = ManifestDocument::load(staged_dir)?;
    let manifest = document.view()?;

    let mut files: Vec<FileEntry> = manifest
        .include_files
        .iter()
        .map(|name| FileEntry::new(name.as_str(), staged_dir.join(name)))
        .collect();

    if !stack.is_empty() {
        document.set_stack(stack);
    }

    // `view` accepts a missing list; the rewrite needs one
    document.dependency_entries()?;

    let mut retained = Vec::new();
    for (index, dependency) in manifest.dependencies.iter().enumerate() {
        if !stack.is_empty() && !dependency.supports_stack(stack) {
            debug!(
                name = %dependency.name,
                version = %dependency.version,
                stack,
                "dropping dependency for other stacks"
            );
            continue;
        }

        let mut entry = document.dependency_entry(index)?;
        if let Some(cache) = cache {
            let file = cache
                .fetch(dependency)
                .map_err(|source| TransformError::Fetch {
                    name: dependency.name.clone(),
                    version: dependency.version.clone(),
                    source,
                })?;
            set_dependency_file(&mut entry, &file.name);
            files.push(file);
        }
        retained.push(entry);
    }

    let kept = retained.len();
    let dropped = manifest.dependencies.len() - kept;
    document.replace_dependencies(retained);
    document.write()?;

    info!(
        stack = if stack.is_empty() { "any" } else { stack },
        retained = kept,
        dropped,
        cached = cache.is_some(),
        "rewrote manifest"
    );

    Ok(Transformed {
        manifest,
        files,
        retained: kept,
        dropped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildpack_manifest::MANIFEST_FILE_NAME;
    use serde_yaml::Value;
    use sha2::{Digest, Sha256};
    use std::fs;
    use tempfile::TempDir;
    use url::Url;

    fn sha256_hex(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    /// Buildpack dir with three dependencies: fs3-only, fs4-only, both.
    fn setup() -> (TempDir, TempDir) {
        let bp = TempDir::new().unwrap();
        let artifacts = TempDir::new().unwrap();

        let mut deps = String::new();
        for (name, stacks) in [
            ("one", "[cflinuxfs3]"),
            ("two", "[cflinuxfs4]"),
            ("three", "[cflinuxfs4, cflinuxfs3]"),
        ] {
            let path = artifacts.path().join(format!("{}.tgz", name));
            let body = format!("{} bytes", name);
            fs::write(&path, &body).unwrap();
            deps.push_str(&format!(
                "  - name: {name}\n    version: 1.0.0\n    uri: {uri}\n    sha256: {sha}\n    cf_stacks: {stacks}\n    custom: keep-{name}\n",
                uri = Url::from_file_path(&path).unwrap(),
                sha = sha256_hex(body.as_bytes()),
            ));
        }

        let manifest = format!(
            "language: ruby\ninclude_files:\n  - README.md\n  - manifest.yml\nextra_top: 42\ndependencies:\n{}",
            deps
        );
        fs::write(bp.path().join(MANIFEST_FILE_NAME), manifest).unwrap();
        fs::write(bp.path().join("README.md"), "readme").unwrap();

        (bp, artifacts)
    }

    fn dependency_names(dir: &Path) -> Vec<String> {
        ManifestDocument::load(dir)
            .unwrap()
            .dependency_entries()
            .unwrap()
            .iter()
            .map(|d| d.get("name").and_then(Value::as_str).unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_filter_keeps_matching_in_order() {
        let (bp, _artifacts) = setup();

        let out = transform(bp.path(), "cflinuxfs3", None).unwrap();

        assert_eq!(out.retained, 2);
        assert_eq!(out.dropped, 1);
        assert_eq!(dependency_names(bp.path()), vec!["one", "three"]);
    }

    #[test]
    fn test_filter_removes_other_stacks() {
        let (bp, _artifacts) = setup();

        transform(bp.path(), "cflinuxfs4", None).unwrap();

        assert_eq!(dependency_names(bp.path()), vec!["two", "three"]);
    }

    #[test]
    fn test_empty_stack_keeps_everything_without_stack_key() {
        let (bp, _artifacts) = setup();

        let out = transform(bp.path(), "", None).unwrap();

        assert_eq!(out.retained, 3);
        let doc = ManifestDocument::load(bp.path()).unwrap();
        assert!(doc.get("stack").is_none());
        assert_eq!(dependency_names(bp.path()), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_uncached_leaves_entries_unmodified() {
        let (bp, _artifacts) = setup();

        let out = transform(bp.path(), "cflinuxfs3", None).unwrap();

        let names: Vec<_> = out.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["README.md", "manifest.yml"]);
        let doc = ManifestDocument::load(bp.path()).unwrap();
        for entry in doc.dependency_entries().unwrap() {
            assert!(entry.get("file").is_none());
        }
    }

    #[test]
    fn test_cached_injects_file_and_appends_entries() {
        let (bp, _artifacts) = setup();
        let cache_dir = TempDir::new().unwrap();
        let cache = DependencyCache::new(cache_dir.path());

        let out = transform(bp.path(), "cflinuxfs3", Some(&cache)).unwrap();

        assert_eq!(out.files.len(), 4);
        assert_eq!(out.files[0].name, "README.md");
        assert!(out.files[2].name.ends_with("/one.tgz"));
        assert!(out.files[3].name.ends_with("/three.tgz"));

        let doc = ManifestDocument::load(bp.path()).unwrap();
        let entries = doc.dependency_entries().unwrap();
        assert_eq!(
            entries[0].get("file").and_then(Value::as_str),
            Some(out.files[2].name.as_str())
        );
        assert_eq!(
            entries[1].get("custom").and_then(Value::as_str),
            Some("keep-three")
        );
    }

    #[test]
    fn test_stack_and_unknown_keys_written() {
        let (bp, _artifacts) = setup();

        transform(bp.path(), "cflinuxfs3", None).unwrap();

        let doc = ManifestDocument::load(bp.path()).unwrap();
        assert_eq!(doc.get("stack").and_then(Value::as_str), Some("cflinuxfs3"));
        assert_eq!(doc.get("extra_top").and_then(Value::as_u64), Some(42));
        assert_eq!(
            doc.keys(),
            vec!["language", "include_files", "extra_top", "dependencies", "stack"]
        );
    }

    #[test]
    fn test_checksum_failure_aborts() {
        let (bp, artifacts) = setup();
        fs::write(artifacts.path().join("one.tgz"), "tampered").unwrap();
        let cache_dir = TempDir::new().unwrap();
        let cache = DependencyCache::new(cache_dir.path());

        let err = transform(bp.path(), "cflinuxfs3", Some(&cache)).unwrap_err();
        match err {
            TransformError::Fetch { name, source, .. } => {
                assert_eq!(name, "one");
                assert!(matches!(source, FetchError::ChecksumMismatch { .. }));
            }
            other => panic!("Expected Fetch error, got {:?}", other),
        }
    }

    fn cast_field(manifest: &str) -> String {
        let bp = TempDir::new().unwrap();
        fs::write(bp.path().join(MANIFEST_FILE_NAME), manifest).unwrap();

        match transform(bp.path(), "", None).unwrap_err() {
            TransformError::Manifest(ManifestError::Cast { field, .. }) => field,
            other => panic!("Expected Cast error, got {:?}", other),
        }
    }

    #[test]
    fn test_dependencies_wrong_shape() {
        assert_eq!(cast_field("language: go\ndependencies: nope\n"), "dependencies");
        assert_eq!(cast_field("language: go\ndependencies: {}\n"), "dependencies");
        assert_eq!(cast_field("language: go\n"), "dependencies");
    }

    #[test]
    fn test_dependency_entry_wrong_shape() {
        assert_eq!(
            cast_field("language: go\ndependencies: [just-a-string]\n"),
            "dependencies[0]"
        );
    }
}
