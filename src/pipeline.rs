//! Packaging pipeline
//!
//! Validates the target stack, stages a copy of the buildpack, stamps
//! `VERSION`, runs the manifest's `pre_package` hook, rewrites the staged
//! manifest for the stack and zips the result next to the source
//! directory. The source tree is only ever read; the archive is the single
//! file written there.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

use buildpack_manifest::{Manifest, ManifestError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::archive::{self, ArchiveError};
use crate::config::{ConfigError, PackagerConfig};
use crate::fetch::{self, DependencyCache, FetchError, DEFAULT_LOCK_TIMEOUT};
use crate::stage::{ExcludeError, ExcludeRules, StageError, Stager};
use crate::transform::{transform, TransformError};

/// File holding the buildpack version inside the archive
pub const VERSION_FILE: &str = "VERSION";

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Manifest(#[from] ManifestError),

    #[error("staging error: {0}")]
    Stage(#[from] StageError),

    #[error("dependency {name} {version}: {source}")]
    Fetch {
        name: String,
        version: String,
        #[source]
        source: FetchError,
    },

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` failed ({status})\n{output}")]
    Command {
        command: String,
        status: String,
        output: String,
    },

    #[error("expected archive was not produced: {}", .0.display())]
    MissingArchive(PathBuf),
}

impl From<TransformError> for PipelineError {
    fn from(err: TransformError) -> Self {
        match err {
            TransformError::Manifest(e) => PipelineError::Manifest(e),
            TransformError::Fetch {
                name,
                version,
                source,
            } => PipelineError::Fetch {
                name,
                version,
                source,
            },
        }
    }
}

impl From<ExcludeError> for PipelineError {
    fn from(err: ExcludeError) -> Self {
        PipelineError::Stage(StageError::from(err))
    }
}

impl PipelineError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Config(_) => 2,
            PipelineError::Manifest(_) => 3,
            PipelineError::Stage(_) | PipelineError::Io { .. } => 4,
            PipelineError::Archive(_) | PipelineError::MissingArchive(_) => 4,
            PipelineError::Fetch { source, .. } => match source {
                FetchError::ChecksumMismatch { .. } => 5,
                FetchError::Http { .. }
                | FetchError::HttpStatus { .. }
                | FetchError::Transfer { .. } => 6,
                FetchError::Lock(_) => 7,
                FetchError::InvalidUri { .. } | FetchError::UnsupportedScheme { .. } => 3,
                FetchError::Io { .. } => 4,
            },
            PipelineError::Command { .. } => 8,
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// `<language>_buildpack[-cached]-v<version>.zip`
pub fn archive_file_name(language: &str, version: &str, cached: bool) -> String {
    if cached {
        format!("{}_buildpack-cached-v{}.zip", language, version)
    } else {
        format!("{}_buildpack-v{}.zip", language, version)
    }
}

/// Settings for one packaging run
#[derive(Debug, Clone)]
pub struct PackageOptions {
    /// Written verbatim to `VERSION` and used in the archive name
    pub version: String,
    /// Target stack; empty packages every stack
    pub stack: String,
    /// Bundle dependencies into the archive
    pub cached: bool,
    /// Dependency cache root
    pub cache_dir: PathBuf,
    pub lock_timeout: Duration,
    /// Stager exclusions on top of the defaults
    pub stage_exclude: Vec<String>,
}

impl PackageOptions {
    pub fn new(version: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            version: version.into(),
            stack: String::new(),
            cached: false,
            cache_dir: cache_dir.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            stage_exclude: Vec::new(),
        }
    }

    /// Options taking the cache and stager settings from configuration
    pub fn from_config(version: impl Into<String>, config: &PackagerConfig) -> Self {
        Self {
            lock_timeout: config.lock_timeout,
            stage_exclude: config.stage_exclude.clone(),
            ..Self::new(version, config.cache_dir.clone())
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = stack.into();
        self
    }

    pub fn with_cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }
}

/// Outcome of a packaging run
#[derive(Debug, Clone, Serialize)]
pub struct PackageReport {
    pub path: PathBuf,
    pub language: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub cached: bool,
    pub entries: usize,
    pub dependencies: usize,
    pub size: u64,
    pub sha256: String,
}

/// Package `source_dir` and return the absolute archive path.
pub fn package(
    source_dir: &Path,
    cache_dir: &Path,
    version: &str,
    stack: &str,
    cached: bool,
) -> PipelineResult<PathBuf> {
    let options = PackageOptions::new(version, cache_dir)
        .with_stack(stack)
        .with_cached(cached);
    Ok(package_with(source_dir, &options)?.path)
}

/// Package `source_dir` with full options.
pub fn package_with(source_dir: &Path, options: &PackageOptions) -> PipelineResult<PackageReport> {
    let source_dir = absolute(source_dir)?;

    Manifest::load(&source_dir)?.validate_stack(&options.stack)?;

    let stager = Stager::new(source_dir.clone())?
        .with_excludes(ExcludeRules::with_patterns(options.stage_exclude.as_slice())?);
    let staged = stager.stage()?;
    info!(
        source = %source_dir.display(),
        files = staged.stats().files,
        "staged buildpack"
    );

    write_version(staged.path(), &options.version)?;

    let staged_manifest = Manifest::load(staged.path())?;
    if let Some(command) = staged_manifest.pre_package_command() {
        run_pre_package(staged.path(), command)?;
    }

    let cache = options.cached.then(|| {
        DependencyCache::new(options.cache_dir.clone()).with_lock_timeout(options.lock_timeout)
    });
    let transformed = transform(staged.path(), &options.stack, cache.as_ref())?;

    let archive_path = source_dir.join(archive_file_name(
        &transformed.manifest.language,
        &options.version,
        options.cached,
    ));
    let stats = archive::build(&archive_path, &transformed.files)?;
    let sha256 = fetch::sha256_file(&archive_path).map_err(|source| PipelineError::Io {
        path: archive_path.clone(),
        source,
    })?;

    if let Err(e) = staged.close() {
        warn!(error = %e, "failed to remove staging directory");
    }

    info!(
        archive = %archive_path.display(),
        bytes = stats.bytes,
        cached = options.cached,
        "packaged buildpack"
    );

    Ok(PackageReport {
        path: archive_path,
        language: transformed.manifest.language,
        version: options.version.clone(),
        stack: Some(options.stack.clone()).filter(|s| !s.is_empty()),
        cached: options.cached,
        entries: stats.entries,
        dependencies: transformed.retained,
        size: stats.bytes,
        sha256,
    })
}

pub(crate) fn absolute(dir: &Path) -> PipelineResult<PathBuf> {
    fs::canonicalize(dir).map_err(|source| PipelineError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

pub(crate) fn write_version(staged_dir: &Path, version: &str) -> PipelineResult<()> {
    let path = staged_dir.join(VERSION_FILE);
    fs::write(&path, version).map_err(|source| PipelineError::Io { path, source })
}

/// Run the hook directly (no shell) with the staged copy as working
/// directory. Relative paths resolve against the staged copy.
fn run_pre_package(staged_dir: &Path, command: &str) -> PipelineResult<()> {
    let program = if command.contains('/') {
        staged_dir.join(command)
    } else {
        PathBuf::from(command)
    };
    debug!(command, dir = %staged_dir.display(), "running pre_package hook");

    let (status, output) = run_combined(Command::new(&program).current_dir(staged_dir))
        .map_err(|source| PipelineError::Io {
            path: program.clone(),
            source,
        })?;
    check_status(command, status, output)
}

/// Run to completion with stdout and stderr sharing one file, so the
/// captured text keeps the order the child wrote it in.
pub(crate) fn run_combined(command: &mut Command) -> io::Result<(ExitStatus, String)> {
    let mut sink = tempfile::tempfile()?;
    let status = command
        .stdin(Stdio::null())
        .stdout(sink.try_clone()?)
        .stderr(sink.try_clone()?)
        .status()?;

    sink.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    sink.read_to_end(&mut bytes)?;
    Ok((status, String::from_utf8_lossy(&bytes).into_owned()))
}

pub(crate) fn check_status(
    command: &str,
    status: ExitStatus,
    output: String,
) -> PipelineResult<()> {
    if status.success() {
        return Ok(());
    }
    Err(PipelineError::Command {
        command: command.to_string(),
        status: status.to_string(),
        output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_archive_file_name() {
        assert_eq!(
            archive_file_name("ruby", "1.2.3", false),
            "ruby_buildpack-v1.2.3.zip"
        );
        assert_eq!(
            archive_file_name("ruby", "1.2.3", true),
            "ruby_buildpack-cached-v1.2.3.zip"
        );
    }

    #[test]
    fn test_options_from_config() {
        let config = PackagerConfig {
            cache_dir: PathBuf::from("/var/cache/bp"),
            lock_timeout: Duration::from_secs(10),
            stage_exclude: vec!["*.log".to_string()],
        };

        let options = PackageOptions::from_config("2.0.0", &config)
            .with_stack("cflinuxfs4")
            .with_cached(true);

        assert_eq!(options.cache_dir, PathBuf::from("/var/cache/bp"));
        assert_eq!(options.lock_timeout, Duration::from_secs(10));
        assert_eq!(options.stage_exclude, vec!["*.log"]);
        assert_eq!(options.stack, "cflinuxfs4");
        assert!(options.cached);
    }

    #[test]
    fn test_unknown_stack_rejected_before_staging() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("manifest.yml"),
            "language: go\ndependencies:\n  - name: go\n    version: 1.0.0\n    uri: file:///x/go.tgz\n    sha256: aa\n    cf_stacks: [cflinuxfs3]\n",
        )
        .unwrap();

        let err = package(dir.path(), dir.path(), "1.0.0", "windows", false).unwrap_err();

        assert_eq!(err.to_string(), "Stack `windows` not found in manifest");
        assert_eq!(err.exit_code(), 3);
        assert!(!dir.path().join("go_buildpack-v1.0.0.zip").exists());
    }

    #[test]
    fn test_missing_source_dir() {
        let dir = TempDir::new().unwrap();
        let err = package(&dir.path().join("nope"), dir.path(), "1", "", false).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }

    #[test]
    fn test_exit_codes_by_category() {
        let mismatch = PipelineError::Fetch {
            name: "ruby".to_string(),
            version: "1".to_string(),
            source: FetchError::ChecksumMismatch {
                path: PathBuf::from("x"),
                expected: "a".to_string(),
                actual: "b".to_string(),
            },
        };
        let status = PipelineError::Fetch {
            name: "ruby".to_string(),
            version: "1".to_string(),
            source: FetchError::HttpStatus {
                uri: "http://x/y".to_string(),
                status: 404,
            },
        };
        let command = PipelineError::Command {
            command: "hook".to_string(),
            status: "exit status: 1".to_string(),
            output: String::new(),
        };

        assert_eq!(mismatch.exit_code(), 5);
        assert_eq!(status.exit_code(), 6);
        assert_eq!(command.exit_code(), 8);
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_command_output_is_interleaved() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo out; echo err >&2; echo again; exit 3"]);
        let (status, output) = run_combined(&mut command).unwrap();

        match check_status("sh", status, output).unwrap_err() {
            PipelineError::Command { output, status, .. } => {
                assert_eq!(output, "out\nerr\nagain\n");
                assert!(status.contains('3'));
            }
            other => panic!("Expected Command error, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_successful_command_passes() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo fine"]);
        let (status, output) = run_combined(&mut command).unwrap();

        assert_eq!(output, "fine\n");
        assert!(check_status("sh", status, output).is_ok());
    }
}
