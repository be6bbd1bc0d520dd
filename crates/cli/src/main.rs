//! CLI entry point for the `ire` peer tool.

use clap::Parser;
use ire_cli::CliConfig;

fn main() -> anyhow::Result<()> {
    let config = CliConfig::parse();
    config.run()
}
