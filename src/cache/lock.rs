//! Advisory file locking shared across processes
//!
//! Wraps `flock`-style locks behind an RAII guard so the OS lock is
//! released on every exit path, including panics. An NFS-backed cache root
//! is unsupported.

use crate::error::{KilnError, KilnResult, LockOp};
use fs4::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Lock flavor for a lockfile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many holders, used by readers
    Shared,
    /// Single holder, used by writers
    Exclusive,
}

/// A held advisory lock on a lockfile.
///
/// Dropping the guard releases the lock (closing the descriptor releases it
/// at the OS level even if the explicit unlock never ran). The lockfile
/// itself is never deleted here; deleting a lockfile is only safe under a
/// strictly higher lock in the hierarchy.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    released: bool,
}

impl FileLock {
    /// Open or create `path` and acquire the advisory lock, blocking until
    /// it is available.
    pub fn acquire(path: &Path, mode: LockMode) -> KilnResult<Self> {
        validate_lock_path(path)?;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| KilnError::lock(LockOp::Open, path, e))?;

        let locked = match mode {
            LockMode::Shared => file.lock_shared(),
            LockMode::Exclusive => file.lock_exclusive(),
        };
        locked.map_err(|e| KilnError::lock(LockOp::Lock, path, e))?;

        Ok(Self {
            file,
            released: false,
        })
    }

    /// Explicitly release the lock, surfacing an unlock failure.
    fn release(&mut self, path: &Path) -> KilnResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.file
            .unlock()
            .map_err(|e| KilnError::lock(LockOp::Unlock, path, e))
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.file.unlock();
        }
    }
}

/// Run `body` while holding the lock on `path`.
///
/// Open and lock failures are returned before `body` runs. An unlock
/// failure is surfaced only when `body` itself succeeded; the body's error
/// wins otherwise.
pub fn with_lock<T>(
    path: &Path,
    mode: LockMode,
    body: impl FnOnce() -> KilnResult<T>,
) -> KilnResult<T> {
    let mut lock = FileLock::acquire(path, mode)?;
    let out = body();
    let unlock = lock.release(path);
    match (out, unlock) {
        (Ok(_), Err(e)) => Err(e),
        (out, _) => out,
    }
}

fn validate_lock_path(path: &Path) -> KilnResult<()> {
    match path.to_str() {
        Some(s) if !s.contains('\0') => Ok(()),
        _ => Err(KilnError::Internal(format!(
            "bad lockfile characters: {:?}",
            path
        ))),
    }
}
