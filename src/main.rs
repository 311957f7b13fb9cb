//! reviewd CLI entry point.
//!
//! Initializes logging and delegates to the CLI module for command handling.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Arguments are parsed before tracing init so --log-level can feed
    // the filter. Priority: RUST_LOG env var > --log-level > "info".
    let cli = reviewd::cli::parse_cli();
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone());

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    reviewd::cli::run_with_cli(cli).await
}
