//! TubeWiki CLI - turns video transcripts into study guides.
//!
//! Submits jobs, runs the pipeline for job descriptors, and inspects the
//! local job database.

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
