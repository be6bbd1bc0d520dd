//! Peer-to-peer invoke/response/event engine.
//!
//! This crate provides the protocol core that runs over any connected,
//! message-oriented transport:
//! - Wire envelope codec
//! - Method registry for remotely invocable handlers
//! - Invocation tracking for outbound calls
//! - Event listeners (persistent and one-shot)
//! - Transport binding, teardown and inbound routing
//!
//! ```no_run
//! use std::sync::Arc;
//! use ire_core::{EventHandler, MethodHandler, Peer, Transport};
//! use serde_json::json;
//!
//! # async fn demo(transport: Arc<dyn Transport>) -> anyhow::Result<()> {
//! let peer = Peer::with_transport(transport)?;
//! peer.register("add", MethodHandler::sync(|args| {
//!     Ok(json!(args.iter().filter_map(|v| v.as_f64()).sum::<f64>()))
//! }))?
//! .on("tick", EventHandler::new(|n| println!("tick {n}")))?;
//!
//! let sum = peer.invoke("add", vec![json!(1), json!(2)])?.await?;
//! peer.emit("done", sum)?;
//! # Ok(())
//! # }
//! ```

pub mod envelope;
pub mod error;
pub mod events;
pub mod inflight;
pub mod peer;
pub mod registry;
pub mod tracker;
pub mod transport;

pub use envelope::{CorrelationId, Envelope, Kind, EVENT_ID, TRANSPORT_CLOSED, UNKNOWN_METHOD};
pub use error::{CallError, Error, Result, TransportError};
pub use events::EventHandler;
pub use peer::{Peer, WeakPeer};
pub use registry::MethodHandler;
pub use tracker::PendingCall;
pub use transport::{
    EventTarget, Frame, ListenerStyle, MessageEvent, MessageHandler, Observable, ObserverStyle,
    Transport,
};
