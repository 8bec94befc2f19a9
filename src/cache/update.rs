//! Guarded read-modify-write of a small data file
//!
//! The data file lives next to its lockfile rather than inside it, so that
//! every write completes before the lock is released.

use crate::cache::lock::{with_lock, LockMode};
use crate::error::{KilnError, KilnResult};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Writer handed to the update callback.
///
/// `commit` rewrites the data file in place at offset 0 without truncating.
/// This is safe only because record parsing ignores bytes after the first
/// newline, so a shorter commit cannot expose a stale tail as data.
pub struct Rewriter<'a> {
    file: &'a mut File,
    path: &'a Path,
}

impl Rewriter<'_> {
    pub fn commit(&mut self, new: &str) -> KilnResult<()> {
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| KilnError::io(format!("seek 0 in {}", self.path.display()), e))?;
        self.file
            .write_all(new.as_bytes())
            .map_err(|e| KilnError::io(format!("write {}", self.path.display()), e))
    }
}

/// Under an exclusive lock on `lockfile`, read all of `datafile` (created
/// empty when absent) and hand the contents to `update` together with a
/// [`Rewriter`] for committing a replacement.
///
/// The callback's error wins over any later failure on the same call.
pub fn update_under_lock<T>(
    lockfile: &Path,
    datafile: &Path,
    update: impl FnOnce(&str, &mut Rewriter<'_>) -> KilnResult<T>,
) -> KilnResult<T> {
    validate_data_path(datafile)?;

    with_lock(lockfile, LockMode::Exclusive, || {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(datafile)
            .map_err(|e| KilnError::io(format!("open {}", datafile.display()), e))?;

        let mut old = String::new();
        file.read_to_string(&mut old)
            .map_err(|e| KilnError::io(format!("read {}", datafile.display()), e))?;

        let mut writer = Rewriter {
            file: &mut file,
            path: datafile,
        };
        update(&old, &mut writer)
    })
}

fn validate_data_path(path: &Path) -> KilnResult<()> {
    match path.to_str() {
        Some(s) if !s.contains('\0') => Ok(()),
        _ => Err(KilnError::Internal(format!(
            "bad datafile characters: {:?}",
            path
        ))),
    }
}
