use anyhow::Result;
use chrono::Utc;
use clap::error::ErrorKind;
use clap::Parser;
use colored::Colorize;
use docker_sweep::{logging, AgeFilter, Config, DockerCli, Mode, RunConfig};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Reclaim disk space by removing stopped containers, unused images and orphaned volumes",
    long_about = None
)]
struct Args {
    /// Also remove unreferenced tagged images and dangling volumes
    #[arg(long, short)]
    deep_clean: bool,

    /// Show what would be removed, but don't remove anything
    #[arg(long, short = 'n', visible_alias = "dry-run")]
    check_only: bool,

    /// Don't echo to the console (the run log still records everything)
    #[arg(long, short)]
    quiet: bool,

    /// Only remove resources older than this (e.g. 48h, 7d, 2w, 3m)
    #[arg(long, value_name = "DURATION")]
    older_than: Option<String>,

    /// Only remove resources created before this date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    created_before: Option<String>,

    /// TOML file overriding the built-in defaults
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Container runtime CLI to drive
    #[arg(long, value_name = "BIN")]
    runtime: Option<PathBuf>,

    /// Run log location, truncated on every run
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

fn sweep(args: &Args) -> Result<ExitCode> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(runtime) = &args.runtime {
        config.runtime_binary = runtime.clone();
    }
    if let Some(log_file) = &args.log_file {
        config.log_file = log_file.clone();
    }

    let age_filter = AgeFilter::from_args(
        args.older_than.as_deref(),
        args.created_before.as_deref(),
        Utc::now(),
    )?;

    logging::init(&config.log_file, args.quiet)?;

    let run_config = RunConfig {
        mode: if args.deep_clean {
            Mode::DeepClean
        } else {
            Mode::Conservative
        },
        dry_run: args.check_only,
        age_filter,
        min_volume_api: config.min_volume_api_version,
        strict_volume_support: config.strict_volume_support,
        show_progress: !args.quiet,
    };
    let runtime = DockerCli::new(&config.runtime_binary, config.check_timeout());

    match docker_sweep::run(&runtime, &run_config) {
        Ok(report) => {
            if !args.quiet {
                report.print();
            }
            Ok(ExitCode::SUCCESS)
        }
        // Already written to the run log (and the console unless quiet)
        Err(_) => Ok(ExitCode::FAILURE),
    }
}

fn main() -> ExitCode {
    // Help and usage errors both exit 1 without touching the runtime
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    match sweep(&args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {:#}", "Error:".red().bold(), err);
            ExitCode::FAILURE
        }
    }
}
