//! Run log and console output.
//!
//! Every event goes to the run log file, which is truncated at startup. The
//! console copy on stderr is dropped in quiet mode. `RUST_LOG` adjusts the level.

use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub fn init(log_file: &Path, quiet: bool) -> Result<()> {
    let file = File::create(log_file)
        .with_context(|| format!("Failed to create run log {}", log_file.display()))?;

    // Default to info level if RUST_LOG not set
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_timer(ChronoLocal::rfc_3339())
        .with_writer(Mutex::new(file));

    let console_layer = (!quiet).then(|| {
        fmt::layer()
            .with_target(false)
            .without_time()
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Failed to install logger")
}
