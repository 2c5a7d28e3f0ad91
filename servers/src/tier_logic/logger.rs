use anyhow::{Result, anyhow};
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// # Setup Logging
///
/// Console layer for humans, daily rotating JSON file named after `app` for
/// machines. `RUST_LOG` wins over `log_level` when set. Records emitted through
/// the `log` facade (the admission library) are bridged into the same subscriber.
///
/// The returned guard flushes the file writer on drop; keep it alive in `main`.
pub fn setup_logging(log_dir: &Path, log_level: &str, app: &str) -> Result<WorkerGuard> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }

    let file_appender = rolling::daily(log_dir, format!("{}.log", app));
    let (non_blocking_appender, guard) = non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).with_ansi(true);

    let file_layer = fmt::layer().with_ansi(false).with_writer(non_blocking_appender).json();

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(log_level))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;

    tracing::info!("Logging initialized with level: {}", log_level);
    Ok(guard)
}

/// Loads `.env`, then the platform specific `.env.linux` / `.env.windows`.
pub fn load_dotenv() {
    let dotenv_os = if cfg!(target_os = "windows") { ".env.windows" } else { ".env.linux" };
    dotenvy::dotenv().ok();
    dotenvy::from_filename(dotenv_os).ok();
}
