//! kbforge CLI: run knowledge-base ETL pipelines locally.
//!
//! Drives the task engine end to end: ingest a directory, build an index
//! version, and publish it behind an alias.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli)
}
