//! Buildpack packager CLI
//!
//! Entry point for the `buildpack-packager` command-line tool.

use std::error::Error as _;
use std::path::PathBuf;
use std::process;

use buildpack_packager::config::EffectiveConfig;
use buildpack_packager::extension::compile_extension_package;
use buildpack_packager::pipeline::{package_with, PackageOptions, PipelineError};
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "buildpack-packager")]
#[command(about = "Package buildpacks into distributable zip archives", version)]
struct Cli {
    /// Increase log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a buildpack archive
    Build {
        /// Version written to VERSION and used in the archive name
        #[arg(long = "version", value_name = "VERSION")]
        buildpack_version: String,

        /// Package dependencies for this stack only
        #[arg(long, conflicts_with = "any_stack", required_unless_present = "any_stack")]
        stack: Option<String>,

        /// Package dependencies for every stack
        #[arg(long)]
        any_stack: bool,

        /// Bundle dependencies into the archive
        #[arg(long)]
        cached: bool,

        /// Dependency cache directory (default: ~/.buildpack-packager/cache)
        #[arg(long)]
        cachedir: Option<PathBuf>,

        /// Config file (default: ~/.buildpack-packager/config.toml)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Print a JSON report instead of the archive path
        #[arg(long)]
        json: bool,

        /// Buildpack directory
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Package an extension buildpack with its bundled Ruby packager
    Extension {
        #[arg(long = "version", value_name = "VERSION")]
        buildpack_version: String,

        #[arg(long)]
        cached: bool,

        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Build {
            buildpack_version,
            stack,
            any_stack: _,
            cached,
            cachedir,
            config,
            json,
            path,
        } => run_build(BuildArgs {
            version: buildpack_version,
            stack: stack.unwrap_or_default(),
            cached,
            cachedir,
            config,
            json,
            path,
        }),
        Commands::Extension {
            buildpack_version,
            cached,
            path,
        } => compile_extension_package(&path, &buildpack_version, cached).map(|archive| {
            println!("{}", archive.display());
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        let mut source = e.source();
        while let Some(cause) = source {
            eprintln!("  caused by: {}", cause);
            source = cause.source();
        }
        process::exit(e.exit_code());
    }
}

/// 0 = warn, 1 = info, 2+ = debug; `RUST_LOG` wins when set
fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("buildpack_packager=warn"),
        1 => EnvFilter::new("buildpack_packager=info"),
        _ => EnvFilter::new("buildpack_packager=debug"),
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

struct BuildArgs {
    version: String,
    stack: String,
    cached: bool,
    cachedir: Option<PathBuf>,
    config: Option<PathBuf>,
    json: bool,
    path: PathBuf,
}

fn run_build(args: BuildArgs) -> Result<(), PipelineError> {
    let cli_overrides = args
        .cachedir
        .as_ref()
        .map(|dir| serde_json::json!({ "cache_dir": dir.to_string_lossy() }));
    let effective = EffectiveConfig::load(args.config.as_deref(), cli_overrides)?;
    for source in &effective.sources {
        debug!(origin = ?source.origin, path = ?source.path, digest = ?source.digest, "config layer");
    }

    let options = PackageOptions::from_config(args.version, &effective.packager()?)
        .with_stack(args.stack)
        .with_cached(args.cached);
    let report = package_with(&args.path, &options)?;

    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(1);
            }
        }
    } else {
        println!("{}", report.path.display());
    }
    Ok(())
}
