use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    path::Path,
    sync::Mutex,
};
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

/// Environment variable holding the file log filter, e.g. `podsmith=debug`.
pub const LOG_ENV: &str = "PODSMITH_LOG";

/// Appends everything allowed by `PODSMITH_LOG` (default `info`) to
/// `log_path` and mirrors warnings to stderr. Safe to call twice; the
/// second call leaves the first subscriber in place.
pub fn init(log_path: &Path) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("create log dir")?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .context("open log file")?;

    let file_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false)
                .with_filter(file_filter),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .without_time()
                .with_target(false)
                .with_filter(LevelFilter::WARN),
        )
        .try_init();
    if installed.is_err() {
        tracing::debug!("log subscriber already installed");
    }
    Ok(())
}
