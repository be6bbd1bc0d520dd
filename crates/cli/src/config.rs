//! Command-line configuration and process setup.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::commands::{Command, CommandResult};

/// Talk to invoke/response/event peers over newline-delimited JSON on TCP.
#[derive(Parser, Debug)]
#[command(name = "ire", version)]
pub struct CliConfig {
    /// Log filter, e.g. `debug` or `ire_core=trace`. Falls back to
    /// `RUST_LOG`, then `info`.
    #[arg(long, global = true)]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    /// Install logging, start a runtime and execute the subcommand.
    pub fn run(self) -> Result<()> {
        init_tracing(self.log.as_deref())?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start the Tokio runtime")?;

        match runtime.block_on(self.command.execute())? {
            CommandResult::Value(value) => println!("{value}"),
            CommandResult::Received(count) => tracing::info!(count, "stopped listening"),
            CommandResult::Done => {}
        }
        Ok(())
    }
}

fn init_tracing(log: Option<&str>) -> Result<()> {
    let filter = match log {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid log filter {directives:?}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    // stdout carries command output only
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
