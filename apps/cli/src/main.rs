//! subscout CLI: research subcontractors for a trade in a city.
//!
//! Submits a research job, follows it to completion and prints a ranked,
//! evidence-backed list of candidate companies.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
