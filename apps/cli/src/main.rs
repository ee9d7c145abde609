//! IntakeSync CLI: classify intake form responses and sync them to Notion.
//!
//! Reads free-form intake rows from a workbook, writes canonical requests to a
//! staging sheet, and upserts the staged requests into a Notion database.

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
