//! Content-verified dependency cache
//!
//! Dependencies are cached under
//! `<cache_root>/dependencies/<md5(uri)>/<basename(uri)>`, the same layout
//! that ends up inside cached archives. Every fetch re-checks the SHA-256 of
//! the cached file against the manifest, so a corrupted or forged entry is
//! rejected on each use and not only when it was first downloaded.
//!
//! Downloads land in a temporary file next to their final location and are
//! renamed into place only after the digest matches. Population of the cache
//! is serialized across processes with [`CacheLock`].

mod lock;
mod source;

pub use lock::{CacheLock, LockError, LockResult};
pub use source::{ArtifactSource, FileSource, HttpSource};

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use buildpack_manifest::Dependency;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::archive::FileEntry;

/// Top-level directory of cached dependencies, inside the cache and archives
pub const DEPENDENCIES_DIR: &str = "dependencies";

/// Default time to wait for another process holding the cache lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(300);

/// Result type for fetch operations
pub type FetchResult<T> = Result<T, FetchError>;

/// Errors from fetching dependencies
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid dependency uri `{uri}`: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("no source for scheme `{scheme}` (uri `{uri}`)")]
    UnsupportedScheme { uri: String, scheme: String },

    #[error("request for {uri} failed: {source}")]
    Http {
        uri: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("could not download {uri}: {status}")]
    HttpStatus { uri: String, status: u16 },

    #[error("transfer of {uri} failed: {source}")]
    Transfer {
        uri: String,
        #[source]
        source: io::Error,
    },

    #[error(
        "dependency sha256 mismatch for {}: expected sha256 {expected}, actual sha256 {actual}",
        path.display()
    )]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("cache lock error: {0}")]
    Lock(#[from] LockError),
}

/// Dependency cache rooted at one directory
pub struct DependencyCache {
    root: PathBuf,
    lock_timeout: Duration,
    sources: Vec<Box<dyn ArtifactSource>>,
}

impl DependencyCache {
    /// Create a cache with the built-in `file` and `http(s)` sources
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            sources: vec![Box::new(FileSource), Box::new(HttpSource::default())],
        }
    }

    /// Set how long to wait for the cache lock
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Register a source; it takes precedence for the schemes it handles
    pub fn with_source(mut self, source: Box<dyn ArtifactSource>) -> Self {
        self.sources.insert(0, source);
        self
    }

    /// Return a verified local copy of `dependency`, downloading it if absent.
    pub fn fetch(&self, dependency: &Dependency) -> FetchResult<FileEntry> {
        let name = cache_path(&dependency.uri)?;
        let path = self.root.join(&name);

        if path.exists() {
            debug!(uri = %dependency.uri, path = %path.display(), "dependency cache hit");
            verify_sha256(&path, &dependency.sha256)?;
        } else {
            let _lock = CacheLock::acquire(&self.root, self.lock_timeout)?;
            // Another process may have populated the entry while we waited
            if path.exists() {
                verify_sha256(&path, &dependency.sha256)?;
            } else {
                self.download(dependency, &path)?;
            }
        }

        Ok(FileEntry {
            name: name.to_string_lossy().replace('\\', "/"),
            path,
        })
    }

    fn download(&self, dependency: &Dependency, dest: &Path) -> FetchResult<()> {
        let uri = Url::parse(&dependency.uri).map_err(|e| FetchError::InvalidUri {
            uri: dependency.uri.clone(),
            reason: e.to_string(),
        })?;
        let source = self
            .sources
            .iter()
            .find(|s| s.schemes().iter().any(|scheme| *scheme == uri.scheme()))
            .ok_or_else(|| FetchError::UnsupportedScheme {
                uri: dependency.uri.clone(),
                scheme: uri.scheme().to_string(),
            })?;

        let dir = dest.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir).map_err(|source| FetchError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let tmp_error = |source| FetchError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(tmp_error)?;
        let bytes = source.download(&uri, tmp.as_file_mut())?;
        tmp.as_file().sync_all().map_err(tmp_error)?;

        // The partial file is removed with `tmp` if verification fails
        verify_sha256(tmp.path(), &dependency.sha256)?;

        tmp.persist(dest).map_err(|e| FetchError::Io {
            path: dest.to_path_buf(),
            source: e.error,
        })?;
        info!(uri = %dependency.uri, bytes, path = %dest.display(), "cached dependency");
        Ok(())
    }
}

/// Fetch one dependency into `cache_root` with default settings.
pub fn fetch(dependency: &Dependency, cache_root: &Path) -> FetchResult<FileEntry> {
    DependencyCache::new(cache_root).fetch(dependency)
}

/// Cache-relative path for a dependency URI:
/// `dependencies/<md5-hex(uri)>/<basename(uri)>`.
pub fn cache_path(uri: &str) -> FetchResult<PathBuf> {
    let base = base_name(uri).ok_or_else(|| FetchError::InvalidUri {
        uri: uri.to_string(),
        reason: "no file name".to_string(),
    })?;
    let digest = format!("{:x}", md5::compute(uri.as_bytes()));
    Ok(Path::new(DEPENDENCIES_DIR).join(digest).join(base))
}

/// Last `/`-separated segment of the raw URI, query and all.
fn base_name(uri: &str) -> Option<&str> {
    uri.rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
}

/// Hex SHA-256 of a file's contents
pub fn sha256_file(path: &Path) -> io::Result<String> {
    const BUF_SIZE: usize = 64 * 1024;
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compare a file's digest with the expected hex digest, ignoring case.
pub fn verify_sha256(path: &Path, expected: &str) -> FetchResult<()> {
    let actual = sha256_file(path).map_err(|source| FetchError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(FetchError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}
