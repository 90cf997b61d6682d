mod cli;
mod events;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{CLI, Subcommand};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> eyre::Result<()> {
    init_tracing();
    let cli = CLI::parse();
    match cli.command {
        Subcommand::Trace(opts) => cli::run_trace(opts),
    }
}
