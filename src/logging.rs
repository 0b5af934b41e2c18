//! Log output for the `logster` binary.
//!
//! Messages go to stderr and, when a log directory is usable, to a daily
//! rotated `logster.<date>.log` keeping the last five files. The subscriber
//! is installed for the lifetime of the returned [`LogGuard`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::Level;
use tracing::subscriber::DefaultGuard;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::filter::{Directive, ParseError};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub const DEFAULT_LOG_DIR: &str = "/var/log/logster";
const MAX_LOG_FILES: usize = 5;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("cannot create log directory {}: {source}", path.display())]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("cannot open log file: {0}")]
    Appender(#[from] InitError),

    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),
}

/// Keeps logging active. Dropping it flushes the file writer and uninstalls
/// the subscriber.
pub struct LogGuard {
    _default: DefaultGuard,
    _file: Option<WorkerGuard>,
}

/// INFO by default, DEBUG with `--debug`, only errors with `--quiet`.
pub fn level_for(debug: bool, quiet: bool) -> Level {
    if quiet {
        Level::ERROR
    } else if debug {
        Level::DEBUG
    } else {
        Level::INFO
    }
}

pub fn init(log_dir: Option<&Path>, level: Level) -> Result<LogGuard, LoggingError> {
    let directive: Directive = format!("logster={}", level).parse()?;
    let filter = EnvFilter::from_default_env().add_directive(directive);

    let (file_layer, file_guard) = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir).map_err(|source| LoggingError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("logster")
                .filename_suffix("log")
                .max_log_files(MAX_LOG_FILES)
                .build(dir)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = fmt::layer().with_target(false).with_writer(io::stderr);

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer);

    Ok(LogGuard {
        _default: tracing::subscriber::set_default(subscriber),
        _file: file_guard,
    })
}
