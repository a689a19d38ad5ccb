//! docfill CLI: find the blanks in a legal document and fill them in.
//!
//! Uploads a DOCX or PDF into a session, asks the variable oracle which
//! fields need values, and writes a filled `.docx`.

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
