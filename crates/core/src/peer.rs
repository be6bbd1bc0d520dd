//! The protocol engine.
//!
//! A [`Peer`] owns a method registry, a listener table, the pending-call
//! tracker and the in-flight set, and routes every inbound frame of the
//! bound transport to one of them.
//!
//! # Lifecycle
//!
//! ```text
//!            hook(t)                    unhook()
//! Unbound ──────────────▶ Bound(t) ──────────────▶ Unbound
//!                           │  ▲
//!                           └──┘ hook(t2): full unhook, then bind t2
//! ```
//!
//! Teardown is synchronous: pending calls are rejected with
//! `TRANSPORT_CLOSED`, executing remote-requested handlers lose the right to
//! respond, and the inbound handler is unsubscribed.
//!
//! # Locking
//!
//! All tables sit behind one mutex. It is never held while user code or a
//! transport `send` runs, so handlers and listeners may call back into the
//! peer freely.

use std::fmt;
use std::sync::{Arc, Weak};

use metrics::counter;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use crate::envelope::{CorrelationId, Envelope, Kind, ERROR, SUCCESS, UNKNOWN_METHOD};
use crate::error::{CallError, Error, Result};
use crate::events::{Cursor, EventHandler, ListenerTable};
use crate::inflight::{InFlightSet, Marker};
use crate::registry::{validate_name, MethodHandler, MethodRegistry};
use crate::tracker::{InvocationTracker, PendingCall};
use crate::transport::{Frame, MessageEvent, MessageHandler, Transport};

/// One side of an invoke/response/event conversation.
///
/// Cloning is cheap and yields another handle to the same engine.
#[derive(Clone, Default)]
pub struct Peer {
    inner: Arc<Inner>,
}

/// Non-owning handle to a [`Peer`], for handlers and listeners that call
/// back into the peer they are installed on.
#[derive(Clone, Default)]
pub struct WeakPeer {
    inner: Weak<Inner>,
}

impl WeakPeer {
    /// `None` once every [`Peer`] handle has been dropped.
    pub fn upgrade(&self) -> Option<Peer> {
        self.inner.upgrade().map(|inner| Peer { inner })
    }
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    methods: MethodRegistry,
    listeners: ListenerTable,
    calls: InvocationTracker,
    in_flight: InFlightSet,
    binding: Option<Binding>,
}

struct Binding {
    transport: Arc<dyn Transport>,
    handler: MessageHandler,
    runtime: Handle,
}

impl State {
    /// Reject pending calls, silence executing handlers and detach the
    /// binding. The caller unsubscribes the returned binding after
    /// releasing the lock.
    fn teardown(&mut self) -> Option<Binding> {
        let rejected = self.calls.close_all();
        let cancelled = self.in_flight.cancel_all();
        if rejected > 0 {
            counter!("ire_invocations_cancelled_total").increment(rejected as u64);
        }
        if rejected > 0 || cancelled > 0 {
            debug!(rejected, cancelled, "tore down outstanding work");
        }
        self.binding.take()
    }

    fn is_bound_to(&self, handler: &MessageHandler) -> bool {
        self.binding.as_ref().is_some_and(|b| &b.handler == handler)
    }
}

impl Binding {
    fn release(self) {
        self.transport.unsubscribe(&self.handler);
        debug!("transport unhooked");
    }
}

impl Peer {
    /// Create an unbound peer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a peer and hook it to `transport` right away.
    pub fn with_transport(transport: Arc<dyn Transport>) -> Result<Self> {
        let peer = Self::new();
        peer.hook(transport)?;
        Ok(peer)
    }

    pub fn downgrade(&self) -> WeakPeer {
        WeakPeer {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // ------------------------------------------------------------------
    // Methods
    // ------------------------------------------------------------------

    /// Make `handler` invocable by the remote side under `name`.
    ///
    /// Fails if `name` is empty or already taken; an existing registration
    /// is never replaced.
    pub fn register(&self, name: impl Into<String>, handler: MethodHandler) -> Result<&Self> {
        let name = name.into();
        self.inner
            .state
            .lock()
            .methods
            .register(name.clone(), handler)?;
        debug!(method = %name, "registered method");
        Ok(self)
    }

    /// Remove the registration for `name` if it is bound to `handler`.
    /// A different handler is silently ignored.
    pub fn unregister(&self, name: &str, handler: &MethodHandler) -> Result<&Self> {
        if self.inner.state.lock().methods.unregister(name, handler)? {
            debug!(method = %name, "unregistered method");
        }
        Ok(self)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.inner.state.lock().methods.contains(name)
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Add a listener for remote `event` frames.
    pub fn add_listener(
        &self,
        event: impl Into<String>,
        handler: EventHandler,
        once: bool,
    ) -> Result<&Self> {
        self.inner
            .state
            .lock()
            .listeners
            .add(event.into(), handler, once)?;
        Ok(self)
    }

    pub fn on(&self, event: impl Into<String>, handler: EventHandler) -> Result<&Self> {
        self.add_listener(event, handler, false)
    }

    pub fn once(&self, event: impl Into<String>, handler: EventHandler) -> Result<&Self> {
        self.add_listener(event, handler, true)
    }

    /// Remove the most recently added listener matching `(handler, once)`.
    pub fn remove_listener(&self, event: &str, handler: &EventHandler, once: bool) -> Result<&Self> {
        self.inner
            .state
            .lock()
            .listeners
            .remove(event, handler, once)?;
        Ok(self)
    }

    pub fn off(&self, event: &str, handler: &EventHandler) -> Result<&Self> {
        self.remove_listener(event, handler, false)
    }

    pub fn off_once(&self, event: &str, handler: &EventHandler) -> Result<&Self> {
        self.remove_listener(event, handler, true)
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.state.lock().listeners.listener_count(event)
    }

    /// Fire `event` at the remote side. No reply is expected.
    pub fn emit(&self, event: &str, data: Value) -> Result<&Self> {
        let transport = self.inner.bound_transport()?;
        validate_name(event, "event")?;
        let payload = Envelope::event(event, data).encode()?;
        transport.send(payload)?;
        trace!(event = %event, "emitted event");
        Ok(self)
    }

    // ------------------------------------------------------------------
    // Invocations
    // ------------------------------------------------------------------

    /// Ask the remote side to run `name` with `args`.
    ///
    /// Errors are returned immediately when unbound, when `name` is empty or
    /// when the transport refuses the frame. Otherwise the returned
    /// [`PendingCall`] settles once the matching response arrives or the
    /// peer is unhooked. There is no built-in timeout.
    pub fn invoke(&self, name: &str, args: Vec<Value>) -> Result<PendingCall> {
        let (transport, call) = {
            let mut state = self.inner.state.lock();
            let transport = state
                .binding
                .as_ref()
                .map(|b| Arc::clone(&b.transport))
                .ok_or(Error::NotConnected)?;
            validate_name(name, "method")?;
            (transport, state.calls.begin())
        };

        let sent = Envelope::invoke(name, call.id(), args)
            .encode()
            .map_err(Error::from)
            .and_then(|payload| transport.send(payload).map_err(Error::from));
        if let Err(err) = sent {
            self.inner.state.lock().calls.abandon(call.id());
            return Err(err);
        }

        counter!("ire_invocations_sent_total").increment(1);
        trace!(method = %name, id = call.id(), "sent invocation");
        Ok(call)
    }

    /// Number of local invocations still waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.state.lock().calls.len()
    }

    /// Number of remote-requested handlers currently executing.
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    // ------------------------------------------------------------------
    // Transport binding
    // ------------------------------------------------------------------

    /// Bind to `transport`, unhooking the current one first.
    ///
    /// Must run inside a Tokio runtime: remote-requested handlers are spawned
    /// onto it.
    pub fn hook(&self, transport: Arc<dyn Transport>) -> Result<&Self> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handler = MessageHandler::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.route(event);
            }
        });

        // Swap bindings in one critical section so concurrent hooks can't
        // both install over an unbound state.
        let previous = {
            let mut state = self.inner.state.lock();
            let previous = state.teardown();
            state.binding = Some(Binding {
                transport: Arc::clone(&transport),
                handler: handler.clone(),
                runtime,
            });
            previous
        };
        if let Some(previous) = previous {
            previous.release();
        }

        transport.subscribe(handler.clone());
        // A hook or unhook that ran while we were subscribing has already
        // released this binding, possibly before the handler was attached.
        let replaced = !self.inner.state.lock().is_bound_to(&handler);
        if replaced {
            transport.unsubscribe(&handler);
            debug!("transport replaced while hooking");
        } else {
            debug!("transport hooked");
        }
        Ok(self)
    }

    /// Tear down the current binding. Safe to call when unbound.
    pub fn unhook(&self) -> &Self {
        self.inner.unhook();
        self
    }

    /// The currently bound transport.
    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.inner
            .state
            .lock()
            .binding
            .as_ref()
            .map(|b| Arc::clone(&b.transport))
    }

    pub fn is_bound(&self) -> bool {
        self.inner.state.lock().binding.is_some()
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Peer")
            .field("bound", &state.binding.is_some())
            .field("methods", &state.methods.len())
            .field("pending_calls", &state.calls.len())
            .field("in_flight", &state.in_flight.len())
            .finish()
    }
}

impl Inner {
    fn bound_transport(&self) -> Result<Arc<dyn Transport>> {
        self.state
            .lock()
            .binding
            .as_ref()
            .map(|b| Arc::clone(&b.transport))
            .ok_or(Error::NotConnected)
    }

    fn unhook(&self) {
        let binding = self.state.lock().teardown();
        if let Some(binding) = binding {
            binding.release();
        }
    }

    /// Entry point for every inbound frame.
    fn route(self: &Arc<Self>, event: MessageEvent) {
        let text = match event.data {
            Frame::Text(text) => text,
            Frame::Binary(_) => {
                drop_frame("binary");
                return;
            }
        };
        let envelope = match Envelope::decode(&text) {
            Ok(envelope) => envelope,
            Err(err) => {
                trace!(error = %err, "dropping undecodable frame");
                drop_frame(err.reason());
                return;
            }
        };

        counter!("ire_frames_received_total", "kind" => envelope.kind.as_str()).increment(1);
        trace!(
            kind = %envelope.kind,
            name = %envelope.name,
            id = %envelope.id,
            "routing frame"
        );

        match envelope.kind {
            Kind::Invoke => self.on_invoke(envelope),
            Kind::Response => self.on_response(envelope),
            Kind::Event => self.on_event(envelope),
        }
    }

    fn on_invoke(self: &Arc<Self>, envelope: Envelope) {
        let Some(args) = envelope.arguments() else {
            drop_frame("invalid_arguments");
            return;
        };
        let Envelope { name, id, .. } = envelope;

        let mut state = self.state.lock();
        let Some(binding) = state.binding.as_ref() else {
            drop_frame("unbound");
            return;
        };
        let transport = Arc::clone(&binding.transport);
        let runtime = binding.runtime.clone();

        let handler = state.methods.get(&name).cloned();
        let Some(handler) = handler else {
            drop(state);
            trace!(method = %name, id = %id, "unknown method");
            respond(&transport, Envelope::error(id, UNKNOWN_METHOD));
            return;
        };
        let marker = state.in_flight.begin();
        drop(state);

        let weak = Arc::downgrade(self);
        let handler_runtime = runtime.clone();
        runtime.spawn(async move {
            // Run the handler as its own task so a panic surfaces as a JoinError.
            let outcome = match handler_runtime
                .spawn(async move { handler.call(args).await })
                .await
            {
                Ok(outcome) => outcome,
                Err(join) => Err(anyhow::anyhow!("method {name:?} failed: {join}")),
            };
            if let Some(inner) = weak.upgrade() {
                inner.complete(&marker, id, outcome);
            }
        });
    }

    fn complete(&self, marker: &Marker, id: CorrelationId, outcome: anyhow::Result<Value>) {
        let transport = {
            let mut state = self.state.lock();
            if !marker.is_live() {
                counter!("ire_responses_suppressed_total").increment(1);
                trace!(id = %id, "suppressing response after teardown");
                return;
            }
            state.in_flight.finish(marker);
            match state.binding.as_ref() {
                Some(binding) => Arc::clone(&binding.transport),
                None => return,
            }
        };

        let response = match outcome {
            Ok(result) => Envelope::success(id, result),
            Err(err) => Envelope::error(id, err.to_string()),
        };
        respond(&transport, response);
    }

    fn on_response(&self, envelope: Envelope) {
        let outcome = match envelope.name.as_str() {
            SUCCESS => Ok(envelope.data),
            ERROR => Err(CallError::Rejected(envelope.data)),
            _ => {
                drop_frame("unknown_response");
                return;
            }
        };
        let settled = match envelope.id.as_u64() {
            Some(id) => self.state.lock().calls.settle(id, outcome),
            None => false,
        };
        if !settled {
            trace!(id = %envelope.id, "no pending call for response");
            drop_frame("unknown_id");
        }
    }

    fn on_event(&self, envelope: Envelope) {
        if !envelope.id.is_event_sentinel() {
            drop_frame("event_id");
            return;
        }

        let mut cursor = Cursor::default();
        let mut delivered = 0usize;
        loop {
            let next = self
                .state
                .lock()
                .listeners
                .next_for_delivery(&envelope.name, &mut cursor);
            let Some(handler) = next else {
                break;
            };
            handler.call(&envelope.data);
            delivered += 1;
        }

        if delivered == 0 {
            drop_frame("no_listeners");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(binding) = self.state.get_mut().binding.take() {
            binding.transport.unsubscribe(&binding.handler);
        }
    }
}

fn respond(transport: &Arc<dyn Transport>, envelope: Envelope) {
    let sent = envelope
        .encode()
        .map_err(Error::from)
        .and_then(|payload| transport.send(payload).map_err(Error::from));
    if let Err(err) = sent {
        warn!(id = %envelope.id, error = %err, "failed to send response");
    }
}

fn drop_frame(reason: &'static str) {
    counter!("ire_frames_dropped_total", "reason" => reason).increment(1);
}
