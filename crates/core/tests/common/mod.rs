//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use ire_core::{MessageEvent, MessageHandler, Transport, TransportError};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

/// Transport that records outbound frames and lets the test push inbound
/// frames synchronously.
pub struct RecordingTransport {
    outbound: mpsc::UnboundedSender<String>,
    subscribers: Mutex<Vec<MessageHandler>>,
    refuse_sends: Mutex<bool>,
    before_subscribe: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

/// Test-side handle on what a [`RecordingTransport`] sent.
pub struct Outbox {
    rx: mpsc::UnboundedReceiver<String>,
}

impl RecordingTransport {
    pub fn new() -> (Arc<Self>, Outbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            outbound: tx,
            subscribers: Mutex::new(Vec::new()),
            refuse_sends: Mutex::new(false),
            before_subscribe: Mutex::new(None),
        });
        (transport, Outbox { rx })
    }

    /// Deliver a raw text frame to every subscriber.
    pub fn deliver_text(&self, text: &str) {
        let subscribers = self.subscribers.lock().clone();
        for handler in subscribers {
            handler.call(MessageEvent::text(text));
        }
    }

    /// Deliver a JSON value as a text frame.
    pub fn deliver(&self, value: Value) {
        self.deliver_text(&value.to_string());
    }

    pub fn deliver_event(&self, event: MessageEvent) {
        let subscribers = self.subscribers.lock().clone();
        for handler in subscribers {
            handler.call(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn refuse_sends(&self, refuse: bool) {
        *self.refuse_sends.lock() = refuse;
    }

    /// Run `f` inside the next `subscribe`, before the handler is recorded.
    pub fn before_next_subscribe(&self, f: impl FnOnce() + Send + 'static) {
        *self.before_subscribe.lock() = Some(Box::new(f));
    }
}

impl Transport for RecordingTransport {
    fn send(&self, payload: String) -> Result<(), TransportError> {
        if *self.refuse_sends.lock() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(payload)
            .map_err(|_| TransportError::Closed)
    }

    fn subscribe(&self, handler: MessageHandler) {
        let hook = self.before_subscribe.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        self.subscribers.lock().push(handler);
    }

    fn unsubscribe(&self, handler: &MessageHandler) {
        self.subscribers.lock().retain(|h| h != handler);
    }
}

impl Outbox {
    /// Next frame sent, parsed as JSON. Panics if nothing arrives in time.
    pub async fn next(&mut self) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(1), self.rx.recv())
            .await
            .expect("timed out waiting for an outbound frame")
            .expect("transport dropped");
        serde_json::from_str(&text).expect("outbound frame is JSON")
    }

    /// Frame sent synchronously, if any.
    pub fn try_next(&mut self) -> Option<Value> {
        self.rx
            .try_recv()
            .ok()
            .map(|text| serde_json::from_str(&text).expect("outbound frame is JSON"))
    }

    /// Assert nothing is sent for a short while.
    pub async fn expect_silence(&mut self) {
        let got = tokio::time::timeout(Duration::from_millis(50), self.rx.recv()).await;
        assert!(got.is_err(), "unexpected outbound frame: {:?}", got);
    }
}
