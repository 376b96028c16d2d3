//! Log output for the bot
//!
//! Everything goes to a daily log file. The terminal gets the same events
//! unless the console paused it, in which case only warnings and errors get
//! through so a command can be typed without interleaved output.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::filter_fn, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

const LOG_FILE_PREFIX: &str = "reward-keys.log";
const LOG_DIR_ENV: &str = "REWARD_KEYS_LOG_PATH";
const LOG_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[cfg(target_os = "macos")]
const OSLOG_SUBSYSTEM: &str = "dev.reward-keys.bot";

static CONSOLE_PAUSED: AtomicBool = AtomicBool::new(false);

pub fn set_console_paused(paused: bool) {
    CONSOLE_PAUSED.store(paused, Ordering::Relaxed);
}

pub fn console_paused() -> bool {
    CONSOLE_PAUSED.load(Ordering::Relaxed)
}

fn console_allows(level: &Level) -> bool {
    !console_paused() || *level <= Level::WARN
}

/// Where log files are written
pub fn get_log_dir() -> Result<PathBuf> {
    match std::env::var_os(LOG_DIR_ENV) {
        Some(dir) => Ok(PathBuf::from(dir)),
        None => platform_log_dir(),
    }
}

/// Install the global subscriber. The returned guard flushes the file writer
/// when dropped and must live until exit.
pub fn init_logging() -> Result<WorkerGuard> {
    let log_dir = get_log_dir()?;
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {:?}", log_dir))?;

    let removed = prune_old_logs(&log_dir, LOG_MAX_AGE);

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false);
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(filter_fn(|metadata| console_allows(metadata.level())));

    #[cfg(target_os = "macos")]
    let oslog_layer = Some(tracing_oslog::OsLogger::new(OSLOG_SUBSYSTEM, "default"));
    #[cfg(not(target_os = "macos"))]
    let oslog_layer: Option<tracing_subscriber::layer::Identity> = None;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(file_layer)
        .with(console_layer)
        .with(oslog_layer)
        .init();

    if removed > 0 {
        tracing::debug!("Removed {} expired log file(s) from {:?}", removed, log_dir);
    }
    Ok(guard)
}

#[cfg(target_os = "macos")]
fn platform_log_dir() -> Result<PathBuf> {
    let home = std::env::var_os("HOME").context("HOME is not set; cannot place log files")?;
    Ok(PathBuf::from(home).join("Library/Logs/reward-keys"))
}

#[cfg(not(target_os = "macos"))]
fn platform_log_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("dev", "reward-keys", "bot")
        .context("No home directory found for log files")?;
    let dir = if cfg!(target_os = "windows") {
        dirs.data_local_dir().join("Logs")
    } else {
        dirs.state_dir().unwrap_or_else(|| dirs.data_local_dir()).join("logs")
    };
    Ok(dir)
}

/// Delete our rotated log files last modified more than `max_age` ago.
/// Returns how many were removed.
fn prune_old_logs(log_dir: &Path, max_age: Duration) -> usize {
    let Some(cutoff) = SystemTime::now().checked_sub(max_age) else {
        return 0;
    };
    let Ok(entries) = std::fs::read_dir(log_dir) else {
        return 0;
    };

    entries
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(LOG_FILE_PREFIX))
        .filter(|entry| {
            entry
                .metadata()
                .ok()
                .filter(|meta| meta.is_file())
                .and_then(|meta| meta.modified().ok())
                .is_some_and(|modified| modified < cutoff)
        })
        .filter(|entry| std::fs::remove_file(entry.path()).is_ok())
        .count()
}
