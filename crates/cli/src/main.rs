//! Shipout COA CLI - Main Entry Point
//!
//! Inspects persisted suite results, renders the CI issue body and
//! manages the suite configuration file.

use clap::{Parser, Subcommand};

use coa_cli::commands::{config, report};
use coa_cli::output;

/// Shipout COA CLI - results and configuration of the COA download suite
#[derive(Parser)]
#[command(name = "coa")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect suite results
    #[command(subcommand)]
    Report(report::ReportCommands),

    /// Manage the suite configuration file
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Show version information
    Version,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Report(cmd) => report::execute(cmd, cli.format)?,
        Commands::Config(cmd) => config::execute(cmd, cli.format)?,
        Commands::Version => {
            println!("Shipout COA CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("coa-common v{}", coa_common::VERSION);
        }
    }

    Ok(())
}
