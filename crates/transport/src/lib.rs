//! Concrete transports for the invoke/response/event engine.
//!
//! This crate provides two ways to connect peers:
//! - In-process linked ports (`MemoryPort`), in the listener style
//! - Newline-delimited JSON over any Tokio byte stream (`LineTransport`)

pub mod line;
pub mod memory;
mod subscribers;

pub use line::{LineTransport, DEFAULT_MAX_FRAME_LEN};
pub use memory::MemoryPort;
