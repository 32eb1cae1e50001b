//! StoreFlow CLI
//!
//! Command-line driver for the StoreFlow dispatch engine.
//!
//! # Commands
//!
//! - `run` - Dispatch a batch of counter transactions and report their states
//! - `signpost` - Send a signpost marker through the pipeline
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// StoreFlow command-line tools.
#[derive(Parser)]
#[command(name = "storeflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Dispatch strategy selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    /// Run each transaction inline.
    Sync,
    /// Run on the shared concurrent queue.
    Async,
    /// Run on the serial queue given by `--queue`.
    Serial,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch a batch of increment transactions
    Run {
        /// Number of transactions to dispatch
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,

        /// Dispatch strategy
        #[arg(short, long, value_enum, default_value = "serial")]
        strategy: StrategyArg,

        /// Serial queue name (used with `--strategy serial`)
        #[arg(short, long, default_value = "main")]
        queue: String,

        /// Cancel every k-th transaction right after dispatch (0 = never)
        #[arg(long, default_value = "0")]
        cancel_every: usize,

        /// Simulated work per transaction in milliseconds
        #[arg(long, default_value = "5")]
        work_ms: u64,

        /// Width of the shared concurrent queue
        #[arg(short, long, default_value = "4")]
        workers: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Send a signpost through the pipeline
    Signpost {
        /// Signpost name
        #[arg(short, long, default_value = "signpost_prior")]
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

    match cli.command {
        Commands::Run {
            count,
            strategy,
            queue,
            cancel_every,
            work_ms,
            workers,
            format,
        } => {
            let options = commands::run::RunOptions {
                count,
                strategy,
                queue,
                cancel_every,
                work: Duration::from_millis(work_ms),
                workers,
            };
            commands::run::run(&options, &format)?;
        }
        Commands::Signpost { name } => {
            commands::signpost::run(&name)?;
        }
        Commands::Version => {
            println!("StoreFlow CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("StoreFlow Core v{}", storeflow_core::VERSION);
        }
    }

    Ok(())
}
