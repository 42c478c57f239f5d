//! aerostream CLI entry point
//!
//! Parses arguments, dispatches to the command, prints any error to stderr
//! and exits non-zero on failure. All logic lives in the `cli` module.

use aerostream::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
