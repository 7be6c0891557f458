//! Single-writer ownership of a WAL directory.
//!
//! The lock is an advisory `flock` on `wal.lock`. It is held for as long as
//! the [`WalLock`] value lives and released when the file descriptor closes,
//! so every exit path (including panics) gives the stream back.

use brook_core::{CoreError, CoreResult};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

pub const LOCK_FILE: &str = "wal.lock";

#[derive(Debug)]
pub struct WalLock {
    _file: File,
    path: PathBuf,
}

impl WalLock {
    /// Acquires the lock for `dir` without blocking.
    ///
    /// Fails with [`CoreError::FileLock`] if another process (or another open
    /// handle in this process) already owns the directory.
    pub fn acquire(dir: &Path) -> CoreResult<Self> {
        let path = dir.join(LOCK_FILE);
        let lock_err = |e: io::Error| CoreError::FileLock {
            path: path.display().to_string(),
            message: e.to_string(),
        };

        // Not truncated before locking: the current holder's pid stays readable.
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(lock_err)?;

        Self::try_lock(&file).map_err(lock_err)?;

        // The pid is for operators only.
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file, path })
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> io::Result<()> {
        use libc::{flock, LOCK_EX, LOCK_NB};

        let fd = file.as_raw_fd();
        let result = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn try_lock(_file: &File) -> io::Result<()> {
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_writes_pid() {
        let dir = TempDir::new().unwrap();
        let lock = WalLock::acquire(dir.path()).unwrap();
        let content = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_double_lock_fails() {
        let dir = TempDir::new().unwrap();
        let _held = WalLock::acquire(dir.path()).unwrap();

        let err = WalLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, CoreError::FileLock { .. }));
    }

    #[test]
    fn test_released_on_drop() {
        let dir = TempDir::new().unwrap();
        {
            let _lock = WalLock::acquire(dir.path()).unwrap();
        }
        assert!(WalLock::acquire(dir.path()).is_ok());
    }
}
