//! kiln - CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use kiln::cli::{Cli, Commands};
use kiln::error::KilnResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            let mut source = std::error::Error::source(&e);
            while let Some(cause) = source {
                eprintln!("{} {}", style("Caused by:").dim(), cause);
                source = std::error::Error::source(cause);
            }
            ExitCode::FAILURE
        }
    }
}

fn run() -> KilnResult<()> {
    let cli = Cli::parse();

    // Initialize logging; stderr keeps exec's stdout clean for scripting
    let filter = match cli.verbose {
        0 => EnvFilter::new("kiln=warn"),
        1 => EnvFilter::new("kiln=debug"),
        _ => EnvFilter::new("kiln=trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Exec(args) => kiln::cli::commands::exec(args, cli.cache_dir),
        Commands::Info(args) => kiln::cli::commands::info(args, cli.cache_dir),
        Commands::Trim => kiln::cli::commands::trim(cli.cache_dir),
    }
}
