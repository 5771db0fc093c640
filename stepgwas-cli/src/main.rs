//! stepgwas: Stepwise forward-selection models for GWAS.
//!
//! CLI entry point using clap for argument parsing.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "stepgwas",
    version,
    about = "Stepwise forward-selection association models",
    long_about = "Fits a linear model per trait by adding, one at a time, the site that\n\
                   most improves it, with optional permutation thresholds and support intervals."
)]
struct Cli {
    /// Number of worker threads (0 = all cores)
    #[arg(long, default_value = "0", global = true)]
    threads: usize,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run forward selection for each trait of a phenotype file
    Fit(commands::fit::FitArgs),

    /// Build the candidate site list from genotypes and store it
    StoreSites(commands::store_sites::StoreSitesArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    tracing::info!("stepgwas v{}", env!("CARGO_PKG_VERSION"));
    if cli.threads > 0 {
        tracing::info!("Using {} threads", cli.threads);
    }

    match cli.command {
        Commands::Fit(args) => commands::fit::run(args, cli.threads),
        Commands::StoreSites(args) => commands::store_sites::run(args, cli.threads),
    }
}
