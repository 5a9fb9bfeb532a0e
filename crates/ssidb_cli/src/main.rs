//! SSIDB CLI
//!
//! Command-line tools for running in-process SSIDB clusters.
//!
//! # Commands
//!
//! - `simulate` - Run a concurrent transfer workload and report statistics
//! - `scenario` - Replay a named conflict scenario step by step
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use ssidb_core::{CoreConfig, OrderingMode, ValidationMode};
use tracing_subscriber::EnvFilter;

/// SSIDB cluster simulation tools.
#[derive(Parser)]
#[command(name = "ssidb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Validation mode
    #[arg(global = true, short, long, value_enum, default_value = "ssi")]
    mode: Mode,

    /// Prepare ordering
    #[arg(global = true, short, long, value_enum, default_value = "two-phase")]
    ordering: Ordering,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Plain,
    Ssi,
}

#[derive(Clone, Copy, ValueEnum)]
enum Ordering {
    TwoPhase,
    TotalOrder,
}

#[derive(Subcommand)]
enum Commands {
    /// Run concurrent transfers between accounts
    Simulate {
        /// Number of nodes
        #[arg(short, long, default_value = "3")]
        nodes: usize,

        /// Number of client threads
        #[arg(short, long, default_value = "4")]
        threads: usize,

        /// Transactions per thread
        #[arg(long, default_value = "250")]
        transactions: usize,

        /// Number of accounts
        #[arg(short, long, default_value = "8")]
        accounts: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Replay a conflict scenario
    Scenario {
        /// Scenario name (stale-read, write-skew, lost-update)
        #[arg(default_value = "stale-read")]
        name: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = CoreConfig::default()
        .validation_mode(match cli.mode {
            Mode::Plain => ValidationMode::Plain,
            Mode::Ssi => ValidationMode::Ssi,
        })
        .ordering_mode(match cli.ordering {
            Ordering::TwoPhase => OrderingMode::TwoPhase,
            Ordering::TotalOrder => OrderingMode::TotalOrder,
        });

    match cli.command {
        Commands::Simulate {
            nodes,
            threads,
            transactions,
            accounts,
            format,
        } => {
            let options = commands::simulate::SimulateOptions {
                nodes,
                threads,
                transactions,
                accounts,
            };
            commands::simulate::run(config, &options, &format)?;
        }
        Commands::Scenario { name } => {
            commands::scenario::run(config, &name)?;
        }
        Commands::Version => {
            println!("SSIDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("SSIDB Core v{}", ssidb_core::VERSION);
        }
    }

    Ok(())
}
