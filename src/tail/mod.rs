//! Sources of "lines appended since the last checkpoint".
//!
//! A [`TailSource`] opens a [`TailSession`] for a log file and its
//! checkpoint. Lines are pulled one at a time; [`TailSession::finish`]
//! completes the read and leaves the checkpoint pointing past the last
//! line returned.
//!
//! Two sources exist: [`CommandTailSource`] runs `logtail2` through a
//! [`CommandRunner`](crate::runner::CommandRunner), and [`FileTailSource`]
//! tracks the offset itself.

pub mod command;
pub mod file;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::runner::CommandStatus;

pub use command::CommandTailSource;
pub use file::FileTailSource;

#[derive(Debug, Error)]
pub enum TailError {
    #[error("failed to run {command}: {source}")]
    Spawn { command: String, source: io::Error },

    #[error("failed to read tail output: {0}")]
    Read(#[from] io::Error),

    #[error("cannot open log file {}: {source}", path.display())]
    LogFile { path: PathBuf, source: io::Error },

    #[error("cannot write checkpoint {}: {source}", path.display())]
    Checkpoint { path: PathBuf, source: io::Error },
}

/// Produces new lines of a log file since its checkpoint.
pub trait TailSource {
    fn open<'a>(
        &'a self,
        log_file: &Path,
        checkpoint: &Path,
    ) -> Result<Box<dyn TailSession + 'a>, TailError>;
}

/// One in-progress incremental read.
pub trait TailSession {
    /// The next line without its terminator, or `None` when caught up.
    fn next_line(&mut self) -> Option<Result<String, TailError>>;

    /// Finishes the read and reports how the underlying mechanism exited.
    fn finish(self: Box<Self>) -> Result<CommandStatus, TailError>;
}

/// Strips a trailing `\n` or `\r\n` and decodes lossily; log files are not
/// guaranteed to be valid UTF-8.
pub(crate) fn decode_line(mut raw: Vec<u8>) -> String {
    if raw.last() == Some(&b'\n') {
        raw.pop();
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
    }
    match String::from_utf8(raw) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}
