//! Transport contract.
//!
//! The engine needs three things from a transport: a way to send a text
//! frame, and a way to subscribe/unsubscribe exactly one inbound handler.
//! [`Transport`] is that contract. Transports that expose a different
//! subscription style are adapted once, at bind time:
//!
//! - [`EventTarget`] (`add_event_listener("message", ..)`) via [`ListenerStyle`]
//! - [`Observable`] (`on("message", ..)`) via [`ObserverStyle`]

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::TransportError;

/// Event name both subscription styles use for inbound frames.
pub const MESSAGE_EVENT: &str = "message";

/// Raw inbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

/// What a transport hands to its subscriber for each received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub data: Frame,
}

impl MessageEvent {
    pub fn text(data: impl Into<String>) -> Self {
        Self {
            data: Frame::Text(data.into()),
        }
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self {
            data: Frame::Binary(data.into()),
        }
    }
}

/// Callback a transport invokes for every inbound frame.
///
/// Two handlers are equal only if they are clones of the same allocation,
/// which is what `unsubscribe` matches on.
#[derive(Clone)]
pub struct MessageHandler(Arc<dyn Fn(MessageEvent) + Send + Sync>);

impl MessageHandler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(MessageEvent) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, event: MessageEvent) {
        (self.0)(event)
    }
}

impl PartialEq for MessageHandler {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.0) as *const (),
            Arc::as_ptr(&other.0) as *const (),
        )
    }
}

impl Eq for MessageHandler {}

impl fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageHandler")
            .field(&(Arc::as_ptr(&self.0) as *const ()))
            .finish()
    }
}

/// A connected, message-oriented transport.
pub trait Transport: Send + Sync + 'static {
    /// Send one text frame to the remote side.
    fn send(&self, payload: String) -> Result<(), TransportError>;

    /// Start delivering inbound frames to `handler`.
    fn subscribe(&self, handler: MessageHandler);

    /// Stop delivering to `handler`. Unknown handlers are ignored.
    fn unsubscribe(&self, handler: &MessageHandler);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, payload: String) -> Result<(), TransportError> {
        (**self).send(payload)
    }

    fn subscribe(&self, handler: MessageHandler) {
        (**self).subscribe(handler)
    }

    fn unsubscribe(&self, handler: &MessageHandler) {
        (**self).unsubscribe(handler)
    }
}

/// DOM-style transport: `addEventListener` / `removeEventListener`.
pub trait EventTarget: Send + Sync + 'static {
    fn send(&self, payload: String) -> Result<(), TransportError>;
    fn add_event_listener(&self, event: &str, listener: MessageHandler);
    fn remove_event_listener(&self, event: &str, listener: &MessageHandler);
}

/// Emitter-style transport: `on` / `off`.
pub trait Observable: Send + Sync + 'static {
    fn send(&self, payload: String) -> Result<(), TransportError>;
    fn on(&self, event: &str, listener: MessageHandler);
    fn off(&self, event: &str, listener: &MessageHandler);
}

/// Adapts an [`EventTarget`] into a [`Transport`].
#[derive(Debug)]
pub struct ListenerStyle<T>(pub T);

impl<T: EventTarget> ListenerStyle<T> {
    pub fn new(target: T) -> Self {
        Self(target)
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: EventTarget> Transport for ListenerStyle<T> {
    fn send(&self, payload: String) -> Result<(), TransportError> {
        self.0.send(payload)
    }

    fn subscribe(&self, handler: MessageHandler) {
        self.0.add_event_listener(MESSAGE_EVENT, handler)
    }

    fn unsubscribe(&self, handler: &MessageHandler) {
        self.0.remove_event_listener(MESSAGE_EVENT, handler)
    }
}

/// Adapts an [`Observable`] into a [`Transport`].
#[derive(Debug)]
pub struct ObserverStyle<T>(pub T);

impl<T: Observable> ObserverStyle<T> {
    pub fn new(observable: T) -> Self {
        Self(observable)
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: Observable> Transport for ObserverStyle<T> {
    fn send(&self, payload: String) -> Result<(), TransportError> {
        self.0.send(payload)
    }

    fn subscribe(&self, handler: MessageHandler) {
        self.0.on(MESSAGE_EVENT, handler)
    }

    fn unsubscribe(&self, handler: &MessageHandler) {
        self.0.off(MESSAGE_EVENT, handler)
    }
}
