//! Observational cache statistics
//!
//! Purely informational: the walk takes no locks and may race with
//! concurrent creates and trims, which is fine for a size report.

use crate::cache::config::Cache;
use crate::error::KilnResult;
use serde::Serialize;
use std::path::PathBuf;
use walkdir::WalkDir;

/// Size summary over the whole `data/` tree
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Number of regular files, bookkeeping files included
    pub count: u64,
    /// Total size of those files in bytes
    pub size_bytes: u64,
    /// The cache root the numbers describe
    pub dir: PathBuf,
}

impl Cache {
    /// Walk `data/` and count regular files and their sizes.
    pub fn stats(&self) -> KilnResult<CacheStats> {
        let mut stats = CacheStats {
            count: 0,
            size_bytes: 0,
            dir: self.dir().to_path_buf(),
        };
        for entry in WalkDir::new(self.data_dir()).follow_links(false) {
            // entries may vanish mid-walk; skip what cannot be read
            let Ok(entry) = entry else { continue };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                stats.count += 1;
                stats.size_bytes += meta.len();
            }
        }
        Ok(stats)
    }
}

/// Render a byte count with a binary-unit suffix, one decimal above bytes
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
