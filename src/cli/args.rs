//! CLI argument definitions using clap
//!
//! Commands:
//! - aerostream init --config <path>
//! - aerostream serve --config <path>
//! - aerostream tail --url <ws url> --position <p> [--count N]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// aerostream - resumable update stream over a replication log
#[derive(Parser, Debug)]
#[command(name = "aerostream")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the binlog directory with its genesis segment
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./aerostream.json")]
        config: PathBuf,
    },

    /// Serve the update stream and the status endpoints
    Serve {
        /// Path to configuration file
        #[arg(long, default_value = "./aerostream.json")]
        config: PathBuf,
    },

    /// Stream events from a running node and print them as JSON lines
    Tail {
        /// WebSocket URL of the node
        #[arg(long, default_value = "ws://127.0.0.1:4000")]
        url: String,

        /// Stream every group after this position
        #[arg(long, default_value = "0")]
        position: String,

        /// Stop after this many events
        #[arg(long)]
        count: Option<usize>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
