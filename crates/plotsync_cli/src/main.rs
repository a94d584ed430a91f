//! Plotsync CLI
//!
//! Command-line tools for the plotsync engine.
//!
//! # Commands
//!
//! - `simulate` - Run two devices against an in-process server
//! - `version` - Read or advance a persisted sync version
//! - `token` - Issue a signed device token

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Plotsync command-line tools.
#[derive(Parser)]
#[command(name = "plotsync")]
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
    /// Run two devices against an in-process server and print their stats
    Simulate {
        /// Operations the first device queues before syncing
        #[arg(short, long, default_value = "120")]
        operations: usize,

        /// Operations sent per request
        #[arg(short, long, default_value = "50")]
        batch_size: usize,

        /// Project id
        #[arg(short, long, default_value = "demo-project")]
        project: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Read or advance a persisted sync version
    Version {
        /// Path to the version store file
        #[arg(short, long)]
        store: PathBuf,

        /// Project id
        #[arg(short, long)]
        project: String,

        /// Store this version if it is newer than the current one
        #[arg(long)]
        set: Option<u64>,
    },

    /// Issue a signed device token
    Token {
        /// Shared HMAC secret
        #[arg(long, env = "PLOTSYNC_SECRET")]
        secret: String,

        /// Device id the token is bound to
        #[arg(short, long)]
        device: String,

        /// Project id the token is bound to
        #[arg(short, long)]
        project: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Simulate {
            operations,
            batch_size,
            project,
            format,
        } => {
            commands::simulate::run(operations, batch_size, &project, &format)?;
        }
        Commands::Version {
            store,
            project,
            set,
        } => {
            commands::version::run(&store, &project, set)?;
        }
        Commands::Token {
            secret,
            device,
            project,
        } => {
            commands::token::run(&secret, &device, &project)?;
        }
    }

    Ok(())
}
