//! Single-instance guard for one (parser class, log file) pair.
//!
//! The lock is a file holding the owner's pid plus an exclusive `flock` on
//! it. Acquisition never waits: if another run holds the lock, the caller
//! gets [`LockError::Held`] and is expected to skip this cycle.
//!
//! A lock file left behind by a crashed run (no `flock` holder, recorded pid
//! no longer alive) is removed and acquisition retried once.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock {} is held by another instance", path.display())]
    Held { path: PathBuf },

    #[error("cannot create lock {}: {source}", path.display())]
    Create { path: PathBuf, source: io::Error },

    #[error("cannot release lock {}: {source}", path.display())]
    Release { path: PathBuf, source: io::Error },
}

impl LockError {
    pub fn is_held(&self) -> bool {
        matches!(self, LockError::Held { .. })
    }
}

/// An acquired run lock. Released explicitly with [`RunLock::release`], or
/// on drop as a fallback.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    file: Option<File>,
}

impl RunLock {
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        match Self::try_create(path) {
            Err(LockError::Held { .. }) if break_stale_lock(path) => Self::try_create(path),
            other => other,
        }
    }

    fn try_create(path: &Path) -> Result<Self, LockError> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(LockError::Held {
                    path: path.to_path_buf(),
                });
            }
            Err(source) => {
                return Err(LockError::Create {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        if flock(&file, LockMode::ExclusiveNonBlocking).is_err() {
            let _ = fs::remove_file(path);
            return Err(LockError::Held {
                path: path.to_path_buf(),
            });
        }

        if let Err(source) = write!(file, "{}", std::process::id()).and_then(|_| file.flush()) {
            let _ = fs::remove_file(path);
            return Err(LockError::Create {
                path: path.to_path_buf(),
                source,
            });
        }

        debug!("Locking successful: {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    /// Unlocks and removes the lock file.
    ///
    /// Calling it again after a successful release reports an error (the
    /// file is already gone) that callers may ignore.
    pub fn release(&mut self) -> Result<(), LockError> {
        if let Some(file) = self.file.take() {
            flock(&file, LockMode::Unlock).map_err(|source| LockError::Release {
                path: self.path.clone(),
                source,
            })?;
        }
        fs::remove_file(&self.path).map_err(|source| LockError::Release {
            path: self.path.clone(),
            source,
        })?;
        debug!("Unlocking successful: {}", self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if self.file.is_some()
            && let Err(e) = self.release()
        {
            warn!("{}", e);
        }
    }
}

/// Removes `path` if nobody holds its `flock` and the pid recorded in it
/// is dead. Returns true when the file was removed.
fn break_stale_lock(path: &Path) -> bool {
    match File::open(path) {
        Ok(file) => remove_if_stale(path, file),
        Err(_) => false,
    }
}

/// `file` must have been opened from `path`. It is removed only while we
/// hold its `flock` and `path` still names the same inode.
fn remove_if_stale(path: &Path, mut file: File) -> bool {
    if flock(&file, LockMode::ExclusiveNonBlocking).is_err() {
        return false;
    }

    let mut content = String::new();
    if file.read_to_string(&mut content).is_err() {
        return false;
    }
    // An empty file may belong to a run that has not written its pid yet.
    let Ok(pid) = content.trim().parse::<i32>() else {
        return false;
    };
    if process_alive(pid) {
        return false;
    }
    if !same_file(&file, path) {
        debug!("Lock {} was replaced, not breaking it", path.display());
        return false;
    }

    warn!(
        "Removing stale lock {} left by pid {} which is no longer running",
        path.display(),
        pid
    );
    fs::remove_file(path).is_ok()
}

#[cfg(unix)]
fn same_file(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_file(_file: &File, path: &Path) -> bool {
    path.exists()
}

#[derive(Clone, Copy)]
enum LockMode {
    ExclusiveNonBlocking,
    Unlock,
}

#[cfg(unix)]
fn flock(file: &File, mode: LockMode) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let op = match mode {
        LockMode::ExclusiveNonBlocking => libc::LOCK_EX | libc::LOCK_NB,
        LockMode::Unlock => libc::LOCK_UN | libc::LOCK_NB,
    };
    // SAFETY: the descriptor is owned by `file` and stays open for the call.
    let ret = unsafe { libc::flock(file.as_raw_fd(), op) };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Non-unix fallback: the exclusive-create of the lock file is the only guard.
#[cfg(not(unix))]
fn flock(_file: &File, _mode: LockMode) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 only checks for existence and permission.
    let ret = unsafe { libc::kill(pid, 0) };
    ret == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_writes_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.lock");

        let lock = RunLock::acquire(&path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, std::process::id().to_string());
        assert_eq!(lock.path(), path);
    }

    #[test]
    fn test_second_acquire_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.lock");

        let _held = RunLock::acquire(&path).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        let err = RunLock::acquire(&path).unwrap_err();
        assert!(err.is_held());
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn test_release_removes_file_and_second_release_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.lock");

        let mut lock = RunLock::acquire(&path).unwrap();
        lock.release().unwrap();
        assert!(!path.exists());

        let err = lock.release().unwrap_err();
        assert!(matches!(err, LockError::Release { .. }));
    }

    #[test]
    fn test_drop_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.lock");

        {
            let _lock = RunLock::acquire(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
        assert!(RunLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_lock_file_of_live_process_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.lock");
        fs::write(&path, std::process::id().to_string()).unwrap();

        assert!(RunLock::acquire(&path).unwrap_err().is_held());
        assert!(path.exists());
    }

    #[test]
    fn test_empty_lock_file_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.lock");
        fs::write(&path, "").unwrap();

        assert!(RunLock::acquire(&path).unwrap_err().is_held());
    }

    #[cfg(unix)]
    #[test]
    fn test_stale_lock_of_dead_process_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.lock");
        // Above any pid_max, so never a live process.
        fs::write(&path, "2147483000").unwrap();

        let _lock = RunLock::acquire(&path).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            std::process::id().to_string()
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_replaced_stale_lock_is_not_broken() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.lock");
        fs::write(&path, "2147483000").unwrap();

        // One run opens the stale file, then another breaks it and takes
        // a fresh lock before the first one gets to flock.
        let late = File::open(&path).unwrap();
        let _owner = RunLock::acquire(&path).unwrap();

        assert!(!remove_if_stale(&path, late));
        assert!(path.exists());
        assert!(RunLock::acquire(&path).unwrap_err().is_held());
    }

    #[test]
    fn test_missing_state_dir_is_create_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no/such/dir/run.lock");
        let err = RunLock::acquire(&path).unwrap_err();
        assert!(matches!(err, LockError::Create { .. }));
    }
}
