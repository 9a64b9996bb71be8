//! Singleton instance lock
//!
//! The lock is a file holding the decimal pid of the running instance. It is
//! advisory and presence-based, not an OS-level file lock, so it relies on
//! atomic create-if-absent and is not safe on network filesystems.
//!
//! Staleness is detected by probing the recorded pid with signal 0. Any
//! error counts as "process gone". A pid reused by an unrelated process after
//! a crash makes a stale lock look live; that risk is accepted.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::common::{paths, Error, Result};

/// Manager for the singleton lock file
#[derive(Debug)]
pub struct LockManager {
    /// Path to the lock file
    path: PathBuf,
    /// Whether this process created the lock file
    acquired: bool,
}

impl LockManager {
    /// Create a lock manager for `path` without touching the filesystem
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            acquired: false,
        }
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this process holds the lock
    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    /// Create the lock file containing our pid
    ///
    /// A stale lock left by a dead process is removed and creation retried
    /// once. A live holder yields `Error::AlreadyRunning`.
    pub fn acquire(&mut self) -> Result<()> {
        if self.acquired {
            return Err(Error::invariant(format!(
                "lock on {} acquired twice",
                self.path.display()
            )));
        }

        paths::ensure_parent_dir(&self.path).map_err(|e| Error::lock_create(&self.path, e))?;

        match self.create() {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if let Some(pid) = self.check_holder()? {
                    return Err(Error::AlreadyRunning { pid });
                }
                // check_holder removed the stale file
                self.create().map_err(|e| Error::lock_create(&self.path, e))?;
            }
            Err(e) => return Err(Error::lock_create(&self.path, e)),
        }

        self.acquired = true;
        tracing::trace!(path = %self.path.display(), pid = std::process::id(), "Acquired lock");
        Ok(())
    }

    fn create(&self) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&self.path)?;
        write!(file, "{}", std::process::id())?;
        file.sync_all()
    }

    /// Read the pid recorded in the lock file, if any
    ///
    /// Does not check liveness and never removes the file.
    pub fn read_holder(&self) -> Result<Option<i32>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::trace!(path = %self.path.display(), "No lock file, assuming no lock");
                return Ok(None);
            }
            Err(e) => return Err(Error::Io(e)),
        };

        match content.trim().parse::<i32>() {
            Ok(pid) if pid > 0 => Ok(Some(pid)),
            _ => Err(Error::LockCorrupt {
                path: self.path.clone(),
            }),
        }
    }

    /// Return the pid of a live lock holder
    ///
    /// A lock whose holder no longer exists is stale; it is removed and
    /// `None` returned.
    pub fn check_holder(&self) -> Result<Option<i32>> {
        let pid = match self.read_holder()? {
            Some(pid) => pid,
            None => return Ok(None),
        };

        tracing::trace!(path = %self.path.display(), pid, "Existing lock file");

        if process_alive(pid) {
            return Ok(Some(pid));
        }

        tracing::trace!(pid, "Assume no lock; holder process is gone");
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed stale lock file"),
            Err(e) => tracing::trace!(path = %self.path.display(), "Removing stale lock file: {}", e),
        }
        Ok(None)
    }

    /// Remove the lock file
    ///
    /// Releasing a lock this process never acquired is an invariant violation.
    pub fn release(&mut self) -> Result<()> {
        if !self.acquired {
            return Err(Error::invariant(format!(
                "tried to remove a lock on {} I didn't have",
                self.path.display()
            )));
        }

        std::fs::remove_file(&self.path)?;
        self.acquired = false;
        tracing::trace!(path = %self.path.display(), "Released lock");
        Ok(())
    }
}

/// Probe whether `pid` names an existing process
pub fn process_alive(pid: i32) -> bool {
    pid > 0 && unsafe { libc::kill(pid, 0) } == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// A pid that certainly belonged to a process which has exited
    fn dead_pid() -> i32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id() as i32;
        child.wait().unwrap();
        pid
    }

    #[test]
    fn test_acquire_writes_own_pid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("daemon.pid");

        let mut lock = LockManager::new(&path);
        lock.acquire().unwrap();

        assert!(lock.is_acquired());
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, std::process::id().to_string());
    }

    #[test]
    fn test_second_acquire_reports_live_holder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("daemon.pid");

        let mut first = LockManager::new(&path);
        first.acquire().unwrap();

        let mut second = LockManager::new(&path);
        match second.acquire() {
            Err(Error::AlreadyRunning { pid }) => assert_eq!(pid, std::process::id() as i32),
            other => panic!("expected AlreadyRunning, got {:?}", other),
        }
        assert!(!second.is_acquired());
    }

    #[test]
    fn test_check_holder_without_lock() {
        let dir = tempdir().unwrap();
        let lock = LockManager::new(dir.path().join("daemon.pid"));
        assert_eq!(lock.check_holder().unwrap(), None);
    }

    #[test]
    fn test_check_holder_removes_stale_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        std::fs::write(&path, dead_pid().to_string()).unwrap();

        let lock = LockManager::new(&path);
        assert_eq!(lock.check_holder().unwrap(), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_acquire_recovers_stale_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        std::fs::write(&path, format!("{}\n", dead_pid())).unwrap();

        let mut lock = LockManager::new(&path);
        lock.acquire().unwrap();
        assert_eq!(lock.read_holder().unwrap(), Some(std::process::id() as i32));
    }

    #[test]
    fn test_corrupt_lock_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        std::fs::write(&path, "not a pid").unwrap();

        let err = LockManager::new(&path).check_holder().unwrap_err();
        assert!(matches!(err, Error::LockCorrupt { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_release_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("daemon.pid");

        let mut lock = LockManager::new(&path);
        lock.acquire().unwrap();
        lock.release().unwrap();

        assert!(!lock.is_acquired());
        assert!(!path.exists());
    }

    #[test]
    fn test_release_without_acquire_is_invariant() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        std::fs::write(&path, std::process::id().to_string()).unwrap();

        // The file exists, but this manager never created it
        let mut lock = LockManager::new(&path);
        let err = lock.release().unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));
        assert!(path.exists());
    }

    #[test]
    fn test_process_alive() {
        assert!(process_alive(std::process::id() as i32));
        assert!(!process_alive(dead_pid()));
        assert!(!process_alive(0));
        assert!(!process_alive(-1));
    }
}
