//! Command-line interface for reviewd.
//!
//! Provides the `serve` command that runs the daemon and an `enqueue`
//! helper for pushing test jobs.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands, EnqueueArgs, ServeArgs};
