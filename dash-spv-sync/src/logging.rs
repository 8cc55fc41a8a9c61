//! Tracing setup for embedders of the sync engine.
//!
//! The engine itself only emits `tracing` events. Applications that do not
//! install their own subscriber can use [`init_logging`] to get console output,
//! a per-run log file, or both.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{LoggingError, LoggingResult};

/// Prefix for archived log files.
const LOG_FILE_PREFIX: &str = "spv-sync.";
/// Name of the active log file.
const ACTIVE_LOG_NAME: &str = "run.log";

/// Keeps the non-blocking file writer alive. Buffered entries are flushed on drop.
#[derive(Debug)]
pub struct LoggingGuard {
    _worker_guard: Option<WorkerGuard>,
}

/// Configuration for logging output.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter. If None, `RUST_LOG` is consulted, then INFO.
    pub level: Option<LevelFilter>,
    /// Whether to output logs to stderr.
    pub console: bool,
    /// Optional file logging configuration.
    pub file: Option<LogFileConfig>,
}

/// Configuration for log file output.
#[derive(Debug, Clone)]
pub struct LogFileConfig {
    /// Directory where log files will be stored.
    pub log_dir: PathBuf,
    /// Maximum number of archived log files to keep.
    pub max_files: usize,
}

/// Initialize console-only logging with the given level.
pub fn init_console_logging(level: LevelFilter) -> LoggingResult<LoggingGuard> {
    init_logging(LoggingConfig {
        level: Some(level),
        console: true,
        file: None,
    })
}

/// Initialize logging with the given configuration.
///
/// Returns a [`LoggingGuard`] that must outlive all logging. If neither console
/// nor file output is enabled no subscriber is installed.
///
/// # Errors
///
/// Fails if the log directory cannot be prepared or a global subscriber is
/// already installed.
pub fn init_logging(config: LoggingConfig) -> LoggingResult<LoggingGuard> {
    if !config.console && config.file.is_none() {
        return Ok(LoggingGuard {
            _worker_guard: None,
        });
    }

    let env_filter = match config.level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(LevelFilter::INFO.to_string())),
    };

    let (file_layer, guard) = if let Some(ref file_config) = config.file {
        let (non_blocking, guard) = setup_file_logging(file_config)?;
        let layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(false)
            .with_writer(non_blocking);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let console_layer = config
        .console
        .then(|| fmt::layer().with_target(true).with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| LoggingError::SubscriberInit(e.to_string()))?;

    Ok(LoggingGuard {
        _worker_guard: guard,
    })
}

fn setup_file_logging(config: &LogFileConfig) -> LoggingResult<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(&config.log_dir)?;
    rotate_previous_log(&config.log_dir)?;
    cleanup_old_logs(&config.log_dir, config.max_files)?;

    let file = File::create(config.log_dir.join(ACTIVE_LOG_NAME))?;
    Ok(tracing_appender::non_blocking(file))
}

/// Archive the previous `run.log` as `spv-sync.YYYY-MM-DD.HHMMSS.log`, named
/// after its modification time.
fn rotate_previous_log(log_dir: &Path) -> LoggingResult<()> {
    let run_log_path = log_dir.join(ACTIVE_LOG_NAME);
    if !run_log_path.exists() {
        return Ok(());
    }

    let timestamp = modification_time(&run_log_path).unwrap_or_else(Local::now);
    let stamp = timestamp.format("%Y-%m-%d.%H%M%S");

    let mut target = log_dir.join(format!("{}{}.log", LOG_FILE_PREFIX, stamp));
    if target.exists() {
        target = (1..=999)
            .map(|i| log_dir.join(format!("{}{}-{}.log", LOG_FILE_PREFIX, stamp, i)))
            .find(|p| !p.exists())
            .ok_or_else(|| {
                LoggingError::RotationFailed("too many log files with same timestamp".to_string())
            })?;
    }

    fs::rename(&run_log_path, &target).map_err(|e| LoggingError::RotationFailed(e.to_string()))
}

fn modification_time(path: &Path) -> Option<DateTime<Local>> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::from(modified))
}

/// Delete the oldest archives until at most `max_files` remain. `run.log` is never touched.
fn cleanup_old_logs(log_dir: &Path, max_files: usize) -> LoggingResult<()> {
    let mut archived: Vec<_> = fs::read_dir(log_dir)
        .map_err(|e| LoggingError::RotationFailed(format!("failed to read log dir: {}", e)))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX) && name.ends_with(".log"))
        })
        .collect();

    if archived.len() <= max_files {
        return Ok(());
    }

    archived.sort_by_key(|entry| entry.metadata().and_then(|m| m.modified()).ok());

    let excess = archived.len() - max_files;
    for entry in archived.into_iter().take(excess) {
        if let Err(e) = fs::remove_file(entry.path()) {
            tracing::warn!("Failed to remove old log file {:?}: {}", entry.path(), e);
        }
    }

    Ok(())
}
