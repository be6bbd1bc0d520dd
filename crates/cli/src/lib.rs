//! CLI tool for talking to invoke/response/event peers over TCP.
//!
//! Provides commands for:
//! - Serving a demo peer
//! - Invoking remote methods
//! - Emitting and listening for events

pub mod commands;
pub mod config;

pub use commands::{Command, CommandResult};
pub use config::CliConfig;
