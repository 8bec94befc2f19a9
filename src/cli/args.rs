//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// kiln - run a computation once per host, cache the artifact
///
/// Wraps a command in a content-addressed on-disk cache: the first
/// invocation per distinct input runs the command, later invocations reuse
/// the artifact directory it produced.
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Cache root directory (defaults to the per-user cache)
    #[arg(long, global = true, env = "KILN_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command once per input, reusing its artifact directory after
    Exec(ExecArgs),

    /// Show cache size and location
    Info(InfoArgs),

    /// Expire old cache items now
    Trim,
}

/// Arguments for the exec command
#[derive(Parser, Debug)]
pub struct ExecArgs {
    /// Maximum artifact age before expiry (units h, m, s, ms)
    #[arg(long, default_value = "240h")]
    pub max_age: String,

    /// Cache key; defaults to the command line itself
    #[arg(long)]
    pub input: Option<String>,

    /// Command to run inside a fresh artifact directory, after `--`
    #[arg(required = true, last = true)]
    pub command: Vec<String>,
}

/// Arguments for the info command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

/// Output format for machine- or human-oriented listings
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Plain,
}
