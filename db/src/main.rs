use clap::Parser;
use std::error::Error;

use metrisch_db::cli;

fn main() -> Result<(), Box<dyn Error>> {
    let cli = cli::Cli::parse();
    match &cli.command {
        cli::Commands::Scan(args) => cli::run_scan(args)?,
    }
    Ok(())
}
