//! Ledger directory locking
//!
//! Conditional ledger writes are read-compare-write sequences, so two
//! pipelines on the same host must not interleave them. The lock is an
//! advisory `flock` on `<root>/.ledger.lock`, acquired with a bounded wait
//! and released on drop.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

pub type LockResult<T> = Result<T, LockError>;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("ledger lock not acquired within {0:?}")]
    Timeout(Duration),

    #[error("ledger lock I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Exclusive advisory lock over a ledger directory.
pub struct LedgerLock {
    path: PathBuf,
    file: File,
}

impl LedgerLock {
    const LOCK_FILENAME: &'static str = ".ledger.lock";
    const POLL_INTERVAL: Duration = Duration::from_millis(20);
    const CONTENTION_WARN_AFTER: Duration = Duration::from_millis(500);

    /// Acquire the lock for `dir`, waiting at most `timeout`.
    pub fn acquire(dir: &Path, timeout: Duration) -> LockResult<Self> {
        fs::create_dir_all(dir)?;

        let path = dir.join(Self::LOCK_FILENAME);
        let start = Instant::now();
        let mut warned = false;

        loop {
            match Self::try_exclusive(&path) {
                Ok(file) => {
                    if warned {
                        debug!(
                            lock = %path.display(),
                            waited_ms = start.elapsed().as_millis() as u64,
                            "ledger lock acquired after contention"
                        );
                    }
                    return Ok(Self { path, file });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !warned && start.elapsed() > Self::CONTENTION_WARN_AFTER {
                        warn!(lock = %path.display(), "ledger lock contended, waiting");
                        warned = true;
                    }
                }
                Err(e) => return Err(LockError::Io(e)),
            }

            if start.elapsed() >= timeout {
                return Err(LockError::Timeout(timeout));
            }
            std::thread::sleep(Self::POLL_INTERVAL);
        }
    }

    #[cfg(unix)]
    fn try_exclusive(path: &Path) -> io::Result<File> {
        use std::os::unix::fs::OpenOptionsExt;
        use std::os::unix::io::AsRawFd;

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o644)
            .open(path)?;

        // SAFETY: fd is owned by `file` and stays open for the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(file);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "ledger lock held"))
        } else {
            Err(err)
        }
    }

    #[cfg(not(unix))]
    fn try_exclusive(path: &Path) -> io::Result<File> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "ledger lock held"))
            }
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // SAFETY: fd is still owned by `self.file`.
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_creates_dir_and_file() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("ledger");
        let lock = LedgerLock::acquire(&dir, Duration::from_secs(1)).unwrap();
        assert!(lock.path().exists());
        assert_eq!(lock.path().file_name().unwrap(), ".ledger.lock");
    }

    #[test]
    fn test_reacquire_after_drop() {
        let tmp = TempDir::new().unwrap();
        drop(LedgerLock::acquire(tmp.path(), Duration::from_secs(1)).unwrap());
        let _again = LedgerLock::acquire(tmp.path(), Duration::from_secs(1)).unwrap();
    }

    #[test]
    #[cfg(unix)]
    fn test_contention_times_out() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_path_buf();
        let _held = LedgerLock::acquire(&dir, Duration::from_secs(1)).unwrap();

        let result = std::thread::spawn(move || {
            LedgerLock::acquire(&dir, Duration::from_millis(100)).map(|_| ())
        })
        .join()
        .unwrap();

        assert!(matches!(result, Err(LockError::Timeout(_))));
    }
}
