//! Music Catalog command line.

use clap::Parser;
use music_catalog::cli;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Default filter when RUST_LOG is not set
const DEFAULT_FILTER: &str = "warn,music_catalog=info,library=info,scanner=info,metadata=info,config=info,db=info,events=info";

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();

    cli::run_command(&args)
}
