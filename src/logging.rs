use std::path::PathBuf;
use std::sync::Mutex;

use color_eyre::Result;
use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

lazy_static::lazy_static! {
    pub static ref LOG_FILE: String = format!("{}.log", env!("CARGO_PKG_NAME"));
}

/// Initialize logging with default settings (WARN level)
pub fn init() -> Result<()> {
    init_with(None, None)
}

/// Resolve where the log file goes, creating parent directories
pub fn log_path(custom_log_path: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = custom_log_path {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        return Ok(path);
    }
    // Default: log to current working directory
    Ok(std::env::current_dir()?.join(LOG_FILE.as_str()))
}

/// Initialize logging with custom path and/or level
pub fn init_with(custom_log_path: Option<PathBuf>, level: Option<tracing::Level>) -> Result<()> {
    let log_path = log_path(custom_log_path)?;

    // CLI level overrides the default; RUST_LOG still refines it
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.unwrap_or(tracing::Level::WARN).into())
        .from_env_lossy();

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_subscriber = fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .with_writer(Mutex::new(log_file))
        .with_target(false)
        .with_ansi(false)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(file_subscriber)
        .with(ErrorLayer::default())
        .try_init()?;

    tracing::debug!(path = %log_path.display(), "logging initialized");
    Ok(())
}
