//! Exec command - run a command once per input and reuse its artifacts

use crate::cache::parse_duration;
use crate::cli::args::ExecArgs;
use crate::error::{KilnError, KilnResult, ProducerError};
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Execute the exec command
///
/// The wrapped command runs with its working directory set to a fresh
/// artifact directory, also exposed as `KILN_OUT`. Whatever it leaves
/// there is the cached artifact. The directory path is printed on stdout.
pub fn execute(args: ExecArgs, cache_dir: Option<PathBuf>) -> KilnResult<()> {
    let max_age = parse_duration(&args.max_age)
        .map_err(|e| KilnError::bad_config(format!("bad --max-age {:?}: {}", args.max_age, e)))?;
    let cache = super::open_cache(cache_dir, max_age)?;

    // the input must cover everything that affects the computation; by
    // default that is the command line plus the kiln version
    let input = match &args.input {
        Some(input) => input.clone(),
        None => format!(
            "// kiln: {}\n{}\n",
            env!("CARGO_PKG_VERSION"),
            args.command.join("\n")
        ),
    };

    let produced = Cell::new(false);
    let command = &args.command;
    let producer = |outdir: &Path| -> Result<(), ProducerError> {
        produced.set(true);
        debug!("running {:?} in {}", command, outdir.display());
        let status = Command::new(&command[0])
            .args(&command[1..])
            .current_dir(outdir)
            .env("KILN_OUT", outdir)
            .status()
            .map_err(|e| format!("failed to start {:?}: {}", command[0], e))?;
        if !status.success() {
            return Err(format!("command exited with {}", status).into());
        }
        Ok(())
    };

    let objdir = cache.lookup(&input, &producer)?;

    if produced.get() {
        // already on the slow path, a good moment to check for a due trim
        if let Err(e) = cache.trim_periodically() {
            debug!("periodic trim failed: {}", e);
        }
    }

    println!("{}", objdir.display());
    Ok(())
}
