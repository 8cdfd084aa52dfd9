use anyhow::Result;
use clap::Parser;

mod cli;

fn main() -> Result<()> {
    palimpsest::telemetry::init();
    cli::run(cli::Cli::parse())
}
