//! Invocation tracker for outbound calls.
//!
//! Each local `invoke` gets the next id from a counter scoped to the current
//! transport binding and parks a continuation under that id until a matching
//! `response` frame arrives or the binding is torn down.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::CallError;

type Settle = oneshot::Sender<Result<Value, CallError>>;

/// Future for the outcome of one `invoke`.
///
/// Resolves with the remote result, [`CallError::Rejected`] when the remote
/// answered with an error, or [`CallError::TransportClosed`] when the engine
/// was unhooked (or dropped) first.
#[must_use = "a PendingCall does nothing unless awaited"]
#[derive(Debug)]
pub struct PendingCall {
    id: u64,
    rx: oneshot::Receiver<Result<Value, CallError>>,
}

impl PendingCall {
    /// Correlation id carried by the outbound `invoke` frame.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for PendingCall {
    type Output = Result<Value, CallError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CallError::TransportClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Pending table plus id counter.
#[derive(Debug, Default)]
pub struct InvocationTracker {
    next_id: u64,
    pending: HashMap<u64, Settle>,
}

impl InvocationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id and park a continuation for it.
    pub fn begin(&mut self) -> PendingCall {
        self.next_id += 1;
        let id = self.next_id;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        PendingCall { id, rx }
    }

    /// Forget a call whose `invoke` frame never made it onto the wire.
    pub fn abandon(&mut self, id: u64) {
        self.pending.remove(&id);
    }

    /// Settle the call with `id`. Returns `false` when no such call is
    /// outstanding (late or duplicate response).
    pub fn settle(&mut self, id: u64, outcome: Result<Value, CallError>) -> bool {
        match self.pending.remove(&id) {
            Some(tx) => {
                // The caller may have dropped its PendingCall; nothing to do then.
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Reject everything with `TRANSPORT_CLOSED` and restart ids at 0.
    /// Returns how many calls were rejected.
    pub fn close_all(&mut self) -> usize {
        let rejected = self.pending.len();
        for (_, tx) in self.pending.drain() {
            let _ = tx.send(Err(CallError::TransportClosed));
        }
        self.next_id = 0;
        rejected
    }
}
