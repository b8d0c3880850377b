use anyhow::Result;
use clap::Parser;

use hierexec::cli::commands::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.run()
}
