//! Advisory cache lock using `flock(2)` directly.
//!
//! Only the `File` is owned; `Drop` calls `flock(fd, LOCK_UN)`. An RAII
//! guard from a lock crate would borrow its owner and could not live in
//! the same struct as the cache.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use qad_core::error::AppError;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// Diagnostic information written to the lock file.
#[derive(Debug, Serialize, Deserialize)]
struct LockDiagnostic {
    pid: u32,
    version: String,
    acquired_at: DateTime<Utc>,
}

/// Exclusive lock on one cache namespace.
pub struct CacheLock {
    file: File,
    lock_path: PathBuf,
}

impl std::fmt::Debug for CacheLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLock")
            .field("lock_path", &self.lock_path)
            .finish()
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let fd = self.file.as_raw_fd();
        // SAFETY: `fd` is a valid file descriptor owned by `self.file`.
        // A failed unlock is harmless: closing the fd releases the lock.
        unsafe {
            libc::flock(fd, libc::LOCK_UN);
        }
    }
}

impl CacheLock {
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Acquire a non-blocking exclusive lock at `lock_path`.
    ///
    /// Fails with [`AppError::CacheLocked`] when another process holds it.
    pub fn acquire(lock_path: &Path, version: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)
            .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;

        let fd = file.as_raw_fd();
        // SAFETY: `fd` is a valid file descriptor from the `File` just opened.
        let ret = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };

        if ret != 0 {
            return Err(held_lock_error(lock_path));
        }

        let mut lock = CacheLock {
            file,
            lock_path: lock_path.to_path_buf(),
        };
        let diagnostic = LockDiagnostic {
            pid: std::process::id(),
            version: version.to_string(),
            acquired_at: Utc::now(),
        };
        let json =
            serde_json::to_string(&diagnostic).context("Failed to serialize lock diagnostic")?;
        lock.file
            .set_len(0)
            .context("Failed to truncate lock file")?;
        lock.file
            .write_all(json.as_bytes())
            .context("Failed to write lock diagnostic")?;
        lock.file.flush().context("Failed to flush lock file")?;
        Ok(lock)
    }
}

fn held_lock_error(lock_path: &Path) -> anyhow::Error {
    let mut contents = String::new();
    let read = File::open(lock_path).and_then(|mut f| f.read_to_string(&mut contents));
    match read
        .ok()
        .and_then(|_| serde_json::from_str::<LockDiagnostic>(&contents).ok())
    {
        Some(diagnostic) => anyhow::Error::new(AppError::CacheLocked(diagnostic.pid)).context(
            format!(
                "Cache version '{}' is in use (acquired {})",
                diagnostic.version, diagnostic.acquired_at
            ),
        ),
        None => anyhow::anyhow!(
            "Cache is locked (unable to read diagnostic info): {}",
            lock_path.display()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_acquire_writes_diagnostic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("answer_cache_v1.json.lock");
        let lock = CacheLock::acquire(&path, "v1").unwrap();
        assert_eq!(lock.lock_path(), path);

        let contents = std::fs::read_to_string(&path).unwrap();
        let diagnostic: LockDiagnostic = serde_json::from_str(&contents).unwrap();
        assert_eq!(diagnostic.pid, std::process::id());
        assert_eq!(diagnostic.version, "v1");
    }

    #[test]
    fn test_second_acquire_fails_while_held() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("answer_cache_v1.json.lock");
        let _lock = CacheLock::acquire(&path, "v1").unwrap();

        // flock locks are per open file description, so a second open in the
        // same process conflicts just like another process would.
        let err = CacheLock::acquire(&path, "v1").unwrap_err();
        let app = err.downcast_ref::<AppError>().unwrap();
        assert!(matches!(app, AppError::CacheLocked(pid) if *pid == std::process::id()));
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.lock");
        {
            let _lock = CacheLock::acquire(&path, "v1").unwrap();
        }
        CacheLock::acquire(&path, "v1").unwrap();
    }
}
