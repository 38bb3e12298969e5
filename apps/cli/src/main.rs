//! ConceptLink CLI: annotate text units, link their concepts to a target
//! knowledge base, and load mentions, links, and taxonomy into a graph.
//!
//! Every stage persists its dump before loading it, so an interrupted run
//! resumes where it stopped.

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
