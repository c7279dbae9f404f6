//! Extension buildpacks
//!
//! Older buildpacks are packaged by their own Ruby tooling. We stage the
//! tree, stamp `VERSION`, hand the staged copy to
//! `bundle exec buildpack-packager` and copy the archive it produces back
//! into the buildpack directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use buildpack_manifest::Manifest;
use tracing::{debug, info};

use crate::pipeline::{
    absolute, archive_file_name, check_status, run_combined, write_version, PipelineError,
    PipelineResult,
};
use crate::stage::Stager;

/// Gemfile the extension tooling runs under
const EXTENSION_GEMFILE: &str = "cf.Gemfile";

/// The external packager to invoke; the cache flag is appended last.
#[derive(Debug, Clone)]
pub struct ExtensionCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for ExtensionCommand {
    fn default() -> Self {
        Self {
            program: "bundle".to_string(),
            args: vec!["exec".to_string(), "buildpack-packager".to_string()],
        }
    }
}

impl ExtensionCommand {
    fn display(&self, flag: &str) -> String {
        let mut parts = vec![self.program.as_str()];
        parts.extend(self.args.iter().map(String::as_str));
        parts.push(flag);
        parts.join(" ")
    }
}

/// Package an extension buildpack with `bundle exec buildpack-packager`.
pub fn compile_extension_package(dir: &Path, version: &str, cached: bool) -> PipelineResult<PathBuf> {
    compile_extension_package_with(dir, version, cached, &ExtensionCommand::default())
}

/// As [`compile_extension_package`], with an explicit packager command.
pub fn compile_extension_package_with(
    dir: &Path,
    version: &str,
    cached: bool,
    command: &ExtensionCommand,
) -> PipelineResult<PathBuf> {
    let dir = absolute(dir)?;
    let staged = Stager::new(dir.clone())?.stage()?;
    write_version(staged.path(), version)?;

    let flag = if cached { "--cached" } else { "--uncached" };
    let shown = command.display(flag);
    debug!(command = %shown, dir = %staged.path().display(), "running extension packager");

    let mut child = Command::new(&command.program);
    child
        .args(&command.args)
        .arg(flag)
        .env("BUNDLE_GEMFILE", EXTENSION_GEMFILE)
        .current_dir(staged.path());
    let (status, output) = run_combined(&mut child).map_err(|source| PipelineError::Io {
        path: PathBuf::from(&command.program),
        source,
    })?;
    check_status(&shown, status, output)?;

    let language = Manifest::load(&dir)?.language;
    let name = archive_file_name(&language, version, cached);
    let produced = staged.path().join(&name);
    if !produced.is_file() {
        return Err(PipelineError::MissingArchive(produced));
    }

    let archive_path = dir.join(&name);
    fs::copy(&produced, &archive_path).map_err(|source| PipelineError::Io {
        path: archive_path.clone(),
        source,
    })?;
    info!(archive = %archive_path.display(), cached, "packaged extension buildpack");

    Ok(archive_path)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn buildpack() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("manifest.yml"), "language: php\n").unwrap();
        fs::write(dir.path().join("cf.Gemfile"), "source 'https://rubygems.org'\n").unwrap();
        dir
    }

    /// `sh -c SCRIPT FLAG`: the flag lands in `$0`
    fn shell(script: &str) -> ExtensionCommand {
        ExtensionCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }

    #[test]
    fn test_copies_archive_back() {
        let bp = buildpack();
        let command = shell(
            r#"test "$BUNDLE_GEMFILE" = cf.Gemfile && printf '%s %s' "$0" "$(cat VERSION)" > php_buildpack-cached-v4.5.6.zip"#,
        );

        let path = compile_extension_package_with(bp.path(), "4.5.6", true, &command).unwrap();

        assert_eq!(
            path,
            bp.path()
                .canonicalize()
                .unwrap()
                .join("php_buildpack-cached-v4.5.6.zip")
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), "--cached 4.5.6");
    }

    #[test]
    fn test_uncached_flag_and_name() {
        let bp = buildpack();
        let command = shell(r#"printf '%s' "$0" > php_buildpack-v1.0.0.zip"#);

        let path = compile_extension_package_with(bp.path(), "1.0.0", false, &command).unwrap();

        assert!(path.ends_with("php_buildpack-v1.0.0.zip"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "--uncached");
    }

    #[test]
    fn test_failure_reports_output() {
        let bp = buildpack();
        let command = shell("echo bundler exploded; exit 7");

        let err = compile_extension_package_with(bp.path(), "1.0.0", false, &command).unwrap_err();

        match err {
            PipelineError::Command { output, .. } => assert!(output.contains("bundler exploded")),
            other => panic!("Expected Command error, got {:?}", other),
        }
    }

    #[test]
    fn test_failure_names_full_command() {
        let bp = buildpack();
        let command = shell("exit 1");

        let err = compile_extension_package_with(bp.path(), "1.0.0", true, &command).unwrap_err();

        match err {
            PipelineError::Command { command, .. } => assert_eq!(command, "sh -c exit 1 --cached"),
            other => panic!("Expected Command error, got {:?}", other),
        }
        assert_eq!(
            ExtensionCommand::default().display("--uncached"),
            "bundle exec buildpack-packager --uncached"
        );
    }

    #[test]
    fn test_missing_archive() {
        let bp = buildpack();
        let err =
            compile_extension_package_with(bp.path(), "1.0.0", false, &shell("true")).unwrap_err();
        assert!(matches!(err, PipelineError::MissingArchive(_)));
    }
}
