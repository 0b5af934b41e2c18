//! Persisted run state: where the checkpoint and lock live, how old the
//! checkpoint is, and re-stamping it after a run.
//!
//! The checkpoint's content belongs to the tail source. Only its mtime is
//! interpreted here: it marks the start of the previous successful run.

use std::fs::{File, FileTimes};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("cannot stat checkpoint {}: {source}", path.display())]
    Stat { path: PathBuf, source: io::Error },

    #[error("cannot re-stamp checkpoint {}: {source}", path.display())]
    Restamp { path: PathBuf, source: io::Error },
}

/// Source of wall-clock time.
pub trait Clock {
    fn now(&self) -> SystemTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Whole unix seconds, rounded down.
pub fn unix_seconds(t: SystemTime) -> i64 {
    DateTime::<Utc>::from(t).timestamp()
}

/// State artifacts for one (parser class, log file) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub checkpoint: PathBuf,
    pub lock: PathBuf,
}

impl StatePaths {
    /// `<state_dir>/logtail-<parser><log path with '/' replaced by '-'>.{state,lock}`
    pub fn new(state_dir: &Path, parser_name: &str, log_file: &Path) -> Self {
        let dirsafe = log_file.to_string_lossy().replace('/', "-");
        let stem = format!("logtail-{}{}", parser_name, dirsafe);
        Self {
            checkpoint: state_dir.join(format!("{}.state", stem)),
            lock: state_dir.join(format!("{}.lock", stem)),
        }
    }
}

/// Modification time of the checkpoint in unix seconds, or `None` when it
/// does not exist (first run, or deleted externally).
pub fn checkpoint_mtime(path: &Path) -> Result<Option<i64>, CheckpointError> {
    match std::fs::metadata(path) {
        Ok(meta) => {
            let modified = meta.modified().map_err(|source| CheckpointError::Stat {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(Some(unix_seconds(modified)))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(CheckpointError::Stat {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Seconds elapsed between the checkpoint stamp and `now`.
///
/// Never returns 0: runs within the same second, or a checkpoint stamped
/// in the future, are treated as a one-second interval.
pub fn elapsed_secs(now: i64, checkpoint_mtime: i64) -> u64 {
    let elapsed = now - checkpoint_mtime;
    if elapsed < 1 {
        warn!(
            "Checkpoint age is {} seconds; using a 1 second interval instead",
            elapsed
        );
        return 1;
    }
    elapsed as u64
}

/// Sets the checkpoint's atime and mtime to the whole second of `at`.
pub fn restamp(path: &Path, at: SystemTime) -> Result<(), CheckpointError> {
    let secs = unix_seconds(at).max(0) as u64;
    let stamp = UNIX_EPOCH + Duration::from_secs(secs);
    let times = FileTimes::new().set_accessed(stamp).set_modified(stamp);

    File::options()
        .write(true)
        .open(path)
        .and_then(|f| f.set_times(times))
        .map_err(|source| CheckpointError::Restamp {
            path: path.to_path_buf(),
            source,
        })
}
