//! Age-based expiration
//!
//! Trimming walks all 256 partitions under their exclusive part locks, so
//! it never overlaps a lookup on the same partition and never sees an item
//! whose lockfile exists but is not yet locked. Destructive operations go
//! through a pattern guard so a misconfigured root (say `/`) cannot be
//! damaged.

use crate::cache::config::Cache;
use crate::cache::item::ItemRecord;
use crate::cache::lock::{with_lock, LockMode};
use crate::cache::update::update_under_lock;
use crate::error::{KilnError, KilnResult};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, warn};

/// Placeholder objdir stored in `trim.txt`, which reuses the item-record
/// wire format for its timestamp.
const TRIM_PLACEHOLDER: &str = "/kiln/trim";

fn trim_record() -> ItemRecord {
    ItemRecord::new(TRIM_PLACEHOLDER)
}

impl Cache {
    /// Run a trim pass if the last one is old enough, otherwise return
    /// cheaply. Intended to piggy-back on cache misses.
    ///
    /// The fast path reads `trim.txt` without any lock; the decision is
    /// re-checked under the exclusive trim lock so racing processes
    /// coalesce into a single pass.
    pub fn trim_periodically(&self) -> KilnResult<()> {
        let trim = self.trim_lock();

        if let Ok(raw) = fs::read_to_string(&trim.datafile) {
            if let Ok(record) = ItemRecord::parse(&raw) {
                if record.age() <= self.refresh_age() {
                    return Ok(());
                }
            }
        }

        let due = update_under_lock(&trim.lockfile, &trim.datafile, |old, w| {
            if let Ok(record) = ItemRecord::parse(old) {
                if record.age() <= self.refresh_age() {
                    return Ok(false);
                }
            }
            // mark first so concurrent fast paths back off while we work
            w.commit(&trim_record().to_line())?;
            Ok(true)
        })?;

        if due {
            self.trim_now()?;
        }
        Ok(())
    }

    /// Expire old items in every partition, then record the pass in
    /// `trim.txt`.
    pub fn trim_now(&self) -> KilnResult<()> {
        let global = self.global_lock();
        with_lock(&global.lockfile, LockMode::Shared, || {
            let mut last_err = None;
            for part in 0..=255u8 {
                if let Err(e) = self.trim_part(part) {
                    warn!("trim of partition {:02x} failed: {}", part, e);
                    last_err = Some(e);
                }
            }
            match last_err {
                None => Ok(()),
                Some(e) => Err(e),
            }
        })?;

        let trim = self.trim_lock();
        update_under_lock(&trim.lockfile, &trim.datafile, |_old, w| {
            w.commit(&trim_record().to_line())
        })
    }

    fn trim_part(&self, part: u8) -> KilnResult<()> {
        let pair = self.part_lock_at(part);
        let part_dir = self.part_dir(part);

        with_lock(&pair.lockfile, LockMode::Exclusive, || {
            // enumerate items only while holding the part lock exclusively:
            // a creator could otherwise sit between "lockfile created" and
            // "lockfile locked"
            let entries = fs::read_dir(&part_dir)
                .map_err(|e| KilnError::io(format!("read {}", part_dir.display()), e))?;

            let mut last_err = None;
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if !self.re_item.is_match(name) {
                    continue;
                }
                let item_dir = entry.path();
                if !item_dir.join("lockfile").is_file() {
                    continue;
                }
                if let Err(e) = self.trim_item(&item_dir) {
                    warn!("trim of {} failed: {}", item_dir.display(), e);
                    last_err = Some(e);
                }
            }
            match last_err {
                None => Ok(()),
                Some(e) => Err(e),
            }
        })
    }

    /// Decide the fate of one item while its partition is locked
    /// exclusively. Deleting the lockfile is safe only here, under the
    /// strictly higher part lock.
    fn trim_item(&self, item_dir: &Path) -> KilnResult<()> {
        let datafile = item_dir.join("info");

        let raw = match fs::read_to_string(&datafile) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                // non-UTF-8 garbage is just another unreadable record
                warn!("skipping unreadable record {}", datafile.display());
                return Ok(());
            }
            Err(e) => return Err(KilnError::io(format!("read {}", datafile.display()), e)),
            Ok(raw) => raw,
        };

        if raw.is_empty() {
            // no commit ever happened: a creator crashed before finishing
            debug!("removing zombie item {}", item_dir.display());
            return self.safe_remove_all(item_dir);
        }

        let record = match ItemRecord::parse(&raw) {
            Ok(record) => record,
            Err(reason) => {
                // unknown format: preserve the data, it may still be in use
                warn!("skipping unreadable record {}: {}", datafile.display(), reason);
                return Ok(());
            }
        };

        if record.age() > self.max_age() {
            debug!("expiring {}", item_dir.display());
            // the record must go first; a half-deleted item without its
            // record is a zombie, a record pointing into a half-deleted
            // item is corruption
            fs::remove_file(&datafile)
                .map_err(|e| KilnError::io(format!("remove {}", datafile.display()), e))?;
            return self.safe_remove_all(item_dir);
        }
        Ok(())
    }

    /// Recursively delete an item or object directory after proving the
    /// path shape. Anything that does not look like
    /// `…/<2-hex>-t/<40-hex>` or `…/<2-hex>-t/<40-hex>/<8-hex>` is refused.
    pub(crate) fn safe_remove_all(&self, target: &Path) -> KilnResult<()> {
        let base = path_base(target)?;

        let item_dir = if base.len() == 8 {
            if !self.re_object.is_match(base) {
                return Err(bad_delete_path(target));
            }
            target.parent().ok_or_else(|| bad_delete_path(target))?
        } else {
            target
        };
        let item_base = path_base(item_dir)?;
        let part_dir = item_dir.parent().ok_or_else(|| bad_delete_path(target))?;
        let part_base = path_base(part_dir)?;

        if !self.re_item.is_match(item_base) || !self.re_part.is_match(part_base) {
            return Err(bad_delete_path(target));
        }

        remove_tree_nofollow(target)
            .map_err(|e| KilnError::io(format!("remove {}", target.display()), e))
    }
}

fn path_base(path: &Path) -> KilnResult<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| bad_delete_path(path))
}

fn bad_delete_path(path: &Path) -> KilnError {
    KilnError::Internal(format!("refusing to delete {}", path.display()))
}

/// `remove_dir_all` that never follows symlinks: links are removed as
/// links, their targets stay untouched.
fn remove_tree_nofollow(path: &Path) -> io::Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if meta.file_type().is_symlink() || !meta.is_dir() {
        return fs::remove_file(path);
    }

    for entry in walkdir::WalkDir::new(path)
        .follow_links(false)
        .contents_first(true)
    {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_dir() {
            fs::remove_dir(entry.path())?;
        } else {
            match fs::remove_file(entry.path()) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
    }
    Ok(())
}
