//! PosterPress CLI: poster rendering worker.
//!
//! Claims queued jobs, renders and compiles the poster, and publishes the
//! PDF (and, for paid jobs, a source archive) to object storage.

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
