//! Trim command - expire old cache items now

use crate::cache::{format_bytes, DEFAULT_MAX_AGE};
use crate::error::KilnResult;
use console::style;
use std::path::PathBuf;

/// Execute the trim command
pub fn execute(cache_dir: Option<PathBuf>) -> KilnResult<()> {
    let cache = super::open_cache(cache_dir, DEFAULT_MAX_AGE)?;

    cache.trim_now()?;

    let stats = cache.stats()?;
    println!(
        "{} cache is {} for {} files in {}",
        style("✓").green(),
        format_bytes(stats.size_bytes),
        stats.count,
        stats.dir.display()
    );
    Ok(())
}
