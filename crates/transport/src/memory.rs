//! In-process linked ports.
//!
//! `MemoryPort::pair()` returns two ends of a channel. Text sent on one end
//! is delivered, in order, to the `"message"` listeners of the other end by
//! a pump task. Delivery is always asynchronous, as it would be across a
//! real wire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ire_core::transport::MESSAGE_EVENT;
use ire_core::{EventTarget, MessageEvent, MessageHandler, TransportError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::subscribers::Subscribers;

/// One end of an in-process link. Wrap it in
/// [`ListenerStyle`](ire_core::ListenerStyle) to hook a peer to it.
#[derive(Debug)]
pub struct MemoryPort {
    outbound: mpsc::UnboundedSender<String>,
    listeners: Arc<Subscribers>,
    open: Arc<AtomicBool>,
    remote_open: Arc<AtomicBool>,
    /// Drains frames sent by the other end into `listeners`.
    pump: JoinHandle<()>,
}

impl MemoryPort {
    /// Create two linked ports. Must be called inside a Tokio runtime.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let a_listeners = Arc::new(Subscribers::default());
        let b_listeners = Arc::new(Subscribers::default());
        let a_open = Arc::new(AtomicBool::new(true));
        let b_open = Arc::new(AtomicBool::new(true));

        let a = Self {
            outbound: a_tx,
            listeners: Arc::clone(&a_listeners),
            open: Arc::clone(&a_open),
            remote_open: Arc::clone(&b_open),
            pump: tokio::spawn(pump(b_rx, a_listeners)),
        };
        let b = Self {
            outbound: b_tx,
            listeners: Arc::clone(&b_listeners),
            open: b_open,
            remote_open: a_open,
            pump: tokio::spawn(pump(a_rx, b_listeners)),
        };
        (a, b)
    }

    /// Whether the other end still exists.
    pub fn is_linked(&self) -> bool {
        self.remote_open.load(Ordering::Acquire)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl EventTarget for MemoryPort {
    fn send(&self, payload: String) -> Result<(), TransportError> {
        if !self.is_linked() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(payload)
            .map_err(|_| TransportError::Closed)
    }

    fn add_event_listener(&self, event: &str, listener: MessageHandler) {
        if event == MESSAGE_EVENT {
            self.listeners.add(listener);
        } else {
            trace!(event, "memory port only emits message events");
        }
    }

    fn remove_event_listener(&self, event: &str, listener: &MessageHandler) {
        if event == MESSAGE_EVENT {
            self.listeners.remove(listener);
        }
    }
}

impl Drop for MemoryPort {
    fn drop(&mut self) {
        self.open.store(false, Ordering::Release);
        self.pump.abort();
    }
}

async fn pump(mut inbound: mpsc::UnboundedReceiver<String>, listeners: Arc<Subscribers>) {
    while let Some(text) = inbound.recv().await {
        listeners.deliver(MessageEvent::text(text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ire_core::Frame;
    use tokio::sync::mpsc::unbounded_channel;

    fn collector() -> (MessageHandler, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let handler = MessageHandler::new(move |event: MessageEvent| {
            if let Frame::Text(text) = event.data {
                let _ = tx.send(text);
            }
        });
        (handler, rx)
    }

    #[tokio::test]
    async fn test_frames_cross_in_order() {
        let (a, b) = MemoryPort::pair();
        let (handler, mut rx) = collector();
        b.add_event_listener(MESSAGE_EVENT, handler);

        a.send("one".into()).unwrap();
        a.send("two".into()).unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("one"));
        assert_eq!(rx.recv().await.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_other_event_names_are_ignored() {
        let (a, _b) = MemoryPort::pair();
        a.add_event_listener("close", MessageHandler::new(|_| {}));
        assert_eq!(a.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_send_after_remote_drop_fails() {
        let (a, b) = MemoryPort::pair();
        drop(b);
        assert!(!a.is_linked());
        assert_eq!(a.send("x".into()), Err(TransportError::Closed));
    }
}
