//! Command implementations

mod exec;
mod info;
mod trim;

pub use exec::execute as exec;
pub use info::execute as info;
pub use trim::execute as trim;

use crate::cache::Cache;
use crate::error::{KilnError, KilnResult};
use std::path::PathBuf;
use std::time::Duration;

/// Open the cache named by `--cache-dir` / `KILN_CACHE_DIR`, or the
/// per-user default. A relative override is anchored at the current
/// directory.
fn open_cache(cache_dir: Option<PathBuf>, max_age: Duration) -> KilnResult<Cache> {
    match cache_dir {
        Some(dir) => {
            let dir = if dir.is_absolute() {
                dir
            } else {
                std::env::current_dir()
                    .map_err(|e| KilnError::io("getting current directory", e))?
                    .join(dir)
            };
            Cache::open(dir, max_age)
        }
        None => {
            let base = dirs::cache_dir()
                .ok_or_else(|| KilnError::bad_config("no user cache directory available"))?;
            Cache::open(base.join("kiln"), max_age)
        }
    }
}
