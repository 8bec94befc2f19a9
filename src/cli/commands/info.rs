//! Info command - report cache size and location

use crate::cache::{format_bytes, DEFAULT_MAX_AGE};
use crate::cli::args::{InfoArgs, OutputFormat};
use crate::error::KilnResult;
use std::path::PathBuf;

/// Execute the info command
pub fn execute(args: InfoArgs, cache_dir: Option<PathBuf>) -> KilnResult<()> {
    let cache = super::open_cache(cache_dir, DEFAULT_MAX_AGE)?;
    let stats = cache.stats()?;

    match args.format {
        OutputFormat::Table => {
            println!("Location: {}", stats.dir.display());
            println!("Files:    {}", stats.count);
            println!("Size:     {}", format_bytes(stats.size_bytes));
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        OutputFormat::Plain => {
            println!("{} {} {}", stats.count, stats.size_bytes, stats.dir.display());
        }
    }
    Ok(())
}
