//! CLI module for aerostream
//!
//! Provides command-line interface for:
//! - init: Create the binlog directory
//! - serve: Run a stream node (WebSocket stream + HTTP status)
//! - tail: Print events from a running node

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{apply_ingest, init, run, run_command, serve, tail, Config, IngestRequest};
pub use errors::{CliError, CliErrorCode, CliResult};
