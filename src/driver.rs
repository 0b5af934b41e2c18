//! One run: lock, measure the interval, read new lines, snapshot.
//!
//! ```text
//! acquire lock ──held──► Skipped
//!      │
//! checkpoint? ──absent──► tail once, discard lines ──► Bootstrapped
//!      │
//! duration = now - mtime(checkpoint)
//! tail ──► parser.consume_line (recoverable errors skip the line)
//! parser.snapshot(duration)
//! re-stamp checkpoint to run start
//!      │
//! release lock (on every path after acquisition) ──► Completed
//! ```

use std::path::Path;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::lock::{LockError, RunLock};
use crate::metric::Metric;
use crate::parser::{LogParser, ParseError};
use crate::state::{
    CheckpointError, Clock, StatePaths, SystemClock, checkpoint_mtime, elapsed_secs, restamp,
    unix_seconds,
};
use crate::tail::{TailError, TailSource};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Tail(#[from] TailError),

    #[error("failed to parse line {line_number} ({line:?}): {source}")]
    Parse {
        line_number: u64,
        line: String,
        source: ParseError,
    },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Result of a run that did not fail.
#[derive(Debug)]
pub enum RunOutcome {
    /// Another instance holds the lock; nothing was read.
    Skipped,
    /// No checkpoint existed; one was created and no metrics were produced.
    Bootstrapped,
    Completed(RunReport),
}

#[derive(Debug)]
pub struct RunReport {
    /// Seconds since the previous run's start.
    pub duration_secs: u64,
    pub metrics: Vec<Metric>,
    pub lines_read: u64,
    pub lines_skipped: u64,
    pub elapsed: Duration,
}

pub struct RunDriver<T: TailSource, C: Clock = SystemClock> {
    tail: T,
    clock: C,
}

impl<T: TailSource> RunDriver<T, SystemClock> {
    pub fn new(tail: T) -> Self {
        Self {
            tail,
            clock: SystemClock,
        }
    }
}

impl<T: TailSource, C: Clock> RunDriver<T, C> {
    pub fn with_clock(tail: T, clock: C) -> Self {
        Self { tail, clock }
    }

    /// Runs `parser` over the lines appended to `log_file` since the last run.
    pub fn run(
        &self,
        parser: &mut dyn LogParser,
        log_file: &Path,
        paths: &StatePaths,
    ) -> Result<RunOutcome, RunError> {
        let started = self.clock.now();
        let timer = Instant::now();

        let mut lock = match RunLock::acquire(&paths.lock) {
            Ok(lock) => lock,
            Err(e) if e.is_held() => {
                warn!("Failed to get lock. Is another instance of logster running?");
                return Ok(RunOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };

        let result = self.run_locked(parser, log_file, paths, unix_seconds(started), timer);
        // Stamp only after a successful read so a failed run is re-measured.
        let result = result.and_then(|outcome| {
            if let RunOutcome::Completed(report) = &outcome
                && let Err(e) = restamp(&paths.checkpoint, started)
            {
                error!(
                    "Discarding {} metrics from {} lines, the checkpoint could not be stamped",
                    report.metrics.len(),
                    report.lines_read
                );
                return Err(e.into());
            }
            Ok(outcome)
        });

        release_lock(&mut lock);
        result
    }

    fn run_locked(
        &self,
        parser: &mut dyn LogParser,
        log_file: &Path,
        paths: &StatePaths,
        now: i64,
        timer: Instant,
    ) -> Result<RunOutcome, RunError> {
        let Some(mtime) = checkpoint_mtime(&paths.checkpoint)? else {
            info!(
                "Writing new state file and exiting. (Was either first run, or state file went missing.)"
            );
            self.bootstrap(log_file, paths)?;
            return Ok(RunOutcome::Bootstrapped);
        };

        let duration_secs = elapsed_secs(now, mtime);
        debug!("Setting duration to {} seconds.", duration_secs);

        let mut session = self.tail.open(log_file, &paths.checkpoint)?;
        let mut lines_read = 0u64;
        let mut lines_skipped = 0u64;

        while let Some(line) = session.next_line() {
            let line = line?;
            lines_read += 1;
            if let Err(e) = parser.consume_line(&line) {
                if !e.is_recoverable() {
                    return Err(RunError::Parse {
                        line_number: lines_read,
                        line,
                        source: e,
                    });
                }
                lines_skipped += 1;
                debug!("Parsing exception caught on line {}: {} ({:?})", lines_read, e, line);
            }
        }

        let status = session.finish()?;
        if !status.success() {
            warn!("Tail of {} finished with {}", log_file.display(), status);
        }

        let metrics = parser.snapshot(duration_secs);
        let elapsed = timer.elapsed();
        info!(
            "Total execution time: {:.1} seconds. {} lines read, {} skipped, {} metrics.",
            elapsed.as_secs_f64(),
            lines_read,
            lines_skipped,
            metrics.len()
        );

        Ok(RunOutcome::Completed(RunReport {
            duration_secs,
            metrics,
            lines_read,
            lines_skipped,
            elapsed,
        }))
    }

    /// Establishes a fresh checkpoint. The lines read predate any measured
    /// interval and are dropped.
    fn bootstrap(&self, log_file: &Path, paths: &StatePaths) -> Result<(), RunError> {
        let mut session = self.tail.open(log_file, &paths.checkpoint)?;
        let mut discarded = 0u64;
        while let Some(line) = session.next_line() {
            line?;
            discarded += 1;
        }
        let status = session.finish()?;
        if !status.success() {
            warn!(
                "Tail of {} returned bad exit status: {}",
                log_file.display(),
                status
            );
        }
        debug!("Discarded {} lines preceding the first checkpoint", discarded);
        Ok(())
    }
}

/// Best effort: a failed release is logged and retried once.
fn release_lock(lock: &mut RunLock) {
    if let Err(e) = lock.release() {
        warn!("{}", e);
        if let Err(e) = lock.release() {
            debug!("Retrying lock release failed: {}", e);
        }
    }
}
