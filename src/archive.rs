//! Zip archive creation
//!
//! Writes one deflate-compressed entry per [`FileEntry`], in exactly the
//! order given. Entry timestamps come from the source file's mtime (UTC) and
//! unix permission bits are carried over. The archive is assembled in a
//! temporary file beside the destination and renamed over it only once every
//! entry has been written.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Datelike, Timelike, Utc};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// One file destined for an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Archive-relative name, `/`-separated
    pub name: String,
    /// Local file providing the bytes
    pub path: PathBuf,
}

impl FileEntry {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Errors from archive creation
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("zip error writing entry `{name}`: {source}")]
    Zip {
        name: String,
        #[source]
        source: ZipError,
    },

    #[error("archive entry `{name}` is not a regular file: {}", path.display())]
    NotAFile { name: String, path: PathBuf },
}

/// Result type for archive operations
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Summary of a written archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveStats {
    pub entries: usize,
    pub bytes: u64,
}

/// Create (or replace) the zip archive at `archive_path` from `files`.
pub fn build(archive_path: &Path, files: &[FileEntry]) -> ArchiveResult<ArchiveStats> {
    let dir = match archive_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let io_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ArchiveError::Io { path, source }
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_error(dir))?;
    {
        let mut zip = ZipWriter::new(BufWriter::new(tmp.as_file_mut()));

        for file in files {
            append(&mut zip, file)?;
        }

        let writer = zip.finish().map_err(|source| ArchiveError::Zip {
            name: String::new(),
            source,
        })?;
        writer
            .into_inner()
            .map_err(|e| ArchiveError::Io {
                path: archive_path.to_path_buf(),
                source: e.into_error(),
            })?;
    }
    tmp.as_file().sync_all().map_err(io_error(archive_path))?;

    tmp.persist(archive_path).map_err(|e| ArchiveError::Io {
        path: archive_path.to_path_buf(),
        source: e.error,
    })?;

    let bytes = fs::metadata(archive_path)
        .map_err(io_error(archive_path))?
        .len();
    info!(archive = %archive_path.display(), entries = files.len(), bytes, "wrote archive");

    Ok(ArchiveStats {
        entries: files.len(),
        bytes,
    })
}

fn append<W: io::Write + io::Seek>(zip: &mut ZipWriter<W>, file: &FileEntry) -> ArchiveResult<()> {
    let io_error = |source| ArchiveError::Io {
        path: file.path.clone(),
        source,
    };

    let mut source = File::open(&file.path).map_err(io_error)?;
    let metadata = source.metadata().map_err(io_error)?;
    if !metadata.is_file() {
        return Err(ArchiveError::NotAFile {
            name: file.name.clone(),
            path: file.path.clone(),
        });
    }

    let mut options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    if let Ok(modified) = metadata.modified() {
        options = options.last_modified_time(zip_time(modified));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        options = options.unix_permissions(metadata.permissions().mode() & 0o7777);
    }

    zip.start_file(file.name.as_str(), options)
        .map_err(|source| ArchiveError::Zip {
            name: file.name.clone(),
            source,
        })?;
    let bytes = io::copy(&mut source, zip).map_err(io_error)?;
    debug!(name = %file.name, bytes, "added archive entry");
    Ok(())
}

/// MS-DOS timestamps cover 1980..=2107; anything outside clamps to the epoch.
fn zip_time(modified: SystemTime) -> zip::DateTime {
    let utc: DateTime<Utc> = modified.into();
    u16::try_from(utc.year())
        .ok()
        .and_then(|year| {
            zip::DateTime::from_date_and_time(
                year,
                utc.month() as u8,
                utc.day() as u8,
                utc.hour() as u8,
                utc.minute() as u8,
                utc.second() as u8,
            )
            .ok()
        })
        .unwrap_or_default()
}
