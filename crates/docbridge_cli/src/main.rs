//! docbridge CLI
//!
//! Command-line tools for the docbridge client.
//!
//! # Commands
//!
//! - `demo` - Save numbered assets to an in-process emulator and query them back
//! - `config` - Print the client configuration resolved from the environment

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// docbridge document client tools.
#[derive(Parser)]
#[command(name = "docbridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save assets to an emulator, then count those matching a file name prefix
    Demo {
        /// Number of assets to save
        #[arg(short, long, default_value_t = 10)]
        records: u32,

        /// File name prefix to query for
        #[arg(short, long, default_value = "a")]
        prefix: String,

        /// Maximum concurrent batches
        #[arg(short, long, env = "DOCBRIDGE_MAX_CONCURRENCY", default_value_t = 4)]
        concurrency: usize,

        /// Route requests through the gateway
        #[arg(short, long)]
        gateway: bool,

        /// Keep emulator data in this directory across runs
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Keep the database after the run
        #[arg(short, long)]
        keep: bool,
    },

    /// Print the configuration resolved from DOCBRIDGE_* variables
    Config,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Demo {
            records,
            prefix,
            concurrency,
            gateway,
            data_dir,
            keep,
        } => {
            let options = commands::demo::DemoOptions {
                records,
                prefix,
                concurrency,
                gateway,
                data_dir,
                keep,
            };
            commands::demo::run(&options)?;
        }
        Commands::Config => {
            commands::config::run()?;
        }
        Commands::Version => {
            println!("docbridge CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
