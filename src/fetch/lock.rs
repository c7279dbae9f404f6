//! Cross-process lock on a dependency cache root
//!
//! Packager runs sharing a cache root take `.packager_cache.lock` before
//! populating an entry. Readers of existing entries never lock; entries only
//! appear through an atomic rename.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const CONTENTION_NOTICE_AFTER: Duration = Duration::from_millis(500);

pub type LockResult<T> = Result<T, LockError>;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {timeout:?} waiting for cache lock {}", path.display())]
    Timeout { path: PathBuf, timeout: Duration },

    #[error("cache lock I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Held lock; released on drop.
#[derive(Debug)]
pub struct CacheLock {
    path: PathBuf,
    file: File,
}

impl CacheLock {
    pub const LOCK_FILENAME: &'static str = ".packager_cache.lock";

    /// Block until the lock on `cache_root` is ours or `timeout` passes.
    /// The cache root is created if missing.
    pub fn acquire(cache_root: &Path, timeout: Duration) -> LockResult<Self> {
        let path = cache_root.join(Self::LOCK_FILENAME);
        let io_error = |source| LockError::Io {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(cache_root).map_err(io_error)?;
        let file = open_lock_file(&path).map_err(io_error)?;

        let started = Instant::now();
        let mut noticed = false;
        while !try_lock(&file, &path).map_err(io_error)? {
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(LockError::Timeout { path, timeout });
            }
            if !noticed && waited >= CONTENTION_NOTICE_AFTER {
                warn!(lock = %path.display(), "waiting for another packager to release the cache");
                noticed = true;
            }
            thread::sleep(POLL_INTERVAL);
        }

        if noticed {
            info!(
                lock = %path.display(),
                waited_secs = started.elapsed().as_secs_f64(),
                "cache lock acquired"
            );
        }
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn open_lock_file(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .mode(0o644)
        .open(path)
}

#[cfg(not(unix))]
fn open_lock_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
}

/// Non-blocking attempt; `Ok(false)` means someone else holds it.
#[cfg(unix)]
fn try_lock(file: &File, _path: &Path) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: `file` owns an open descriptor for the duration of the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::EWOULDBLOCK => Ok(false),
        _ => Err(err),
    }
}

/// Without flock, a marker file created exclusively stands in for the lock.
#[cfg(not(unix))]
fn try_lock(_file: &File, path: &Path) -> io::Result<bool> {
    let marker = path.with_extension("held");
    match OpenOptions::new().write(true).create_new(true).open(marker) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // SAFETY: the descriptor is closed only after this, when `file` drops.
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = fs::remove_file(self.path.with_extension("held"));
        }
    }
}
