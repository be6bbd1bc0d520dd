//! Error types for the engine.

use serde_json::Value;
use thiserror::Error;

use crate::envelope::TRANSPORT_CLOSED;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned synchronously by [`Peer`](crate::Peer) operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed method or event name
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// Operation needs a bound transport
    #[error("Not connected: no transport is hooked")]
    NotConnected,
    /// `hook` was called outside a Tokio runtime
    #[error("No Tokio runtime is available to run method handlers")]
    NoRuntime,
    /// The bound transport refused an outbound frame
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    /// Payload could not be serialized
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failure a [`PendingCall`](crate::PendingCall) settles with.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    /// The remote peer answered with an `error` response; carries its reason.
    #[error("Remote rejected the call: {0}")]
    Rejected(Value),
    /// The transport was unhooked before a response arrived.
    #[error("{}", TRANSPORT_CLOSED)]
    TransportClosed,
}

impl CallError {
    /// The reason as it travels on the wire.
    pub fn reason(&self) -> Value {
        match self {
            CallError::Rejected(reason) => reason.clone(),
            CallError::TransportClosed => Value::from(TRANSPORT_CLOSED),
        }
    }
}

/// Errors produced by transport implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The other end is gone
    #[error("transport closed")]
    Closed,
    /// Underlying I/O failure
    #[error("transport io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}
