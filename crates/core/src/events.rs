//! Event listener table.
//!
//! Listeners are kept per event name in registration order. A listener is
//! identified by the pair (handler, once): the same handler may be present
//! both as a persistent and as a one-shot listener, and `off` only removes
//! the flavour it is asked for.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::registry::validate_name;

/// Callback for remote events. Identity is by allocation.
#[derive(Clone)]
pub struct EventHandler(Arc<dyn Fn(&Value) + Send + Sync>);

impl EventHandler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, payload: &Value) {
        (self.0)(payload)
    }
}

impl PartialEq for EventHandler {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.0) as *const (),
            Arc::as_ptr(&other.0) as *const (),
        )
    }
}

impl Eq for EventHandler {}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventHandler")
            .field(&(Arc::as_ptr(&self.0) as *const ()))
            .finish()
    }
}

#[derive(Debug, Clone)]
struct Listener {
    handler: EventHandler,
    once: bool,
}

/// Traversal state for one inbound event dispatch.
///
/// Dispatch walks the live list by index instead of over a snapshot, so
/// listeners added or removed by a running handler are observed the same way
/// an in-place splice would observe them.
#[derive(Debug, Default)]
pub struct Cursor {
    index: usize,
}

/// Event name → ordered listener list.
#[derive(Debug, Default)]
pub struct ListenerTable {
    listeners: HashMap<String, Vec<Listener>>,
}

impl ListenerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener, creating the list on first use.
    pub fn add(&mut self, event: String, handler: EventHandler, once: bool) -> Result<()> {
        validate_name(&event, "event")?;
        self.listeners
            .entry(event)
            .or_default()
            .push(Listener { handler, once });
        Ok(())
    }

    /// Remove the last entry matching (handler, once). At most one entry is
    /// removed per call; returns whether one was.
    pub fn remove(&mut self, event: &str, handler: &EventHandler, once: bool) -> Result<bool> {
        validate_name(event, "event")?;
        let Some(list) = self.listeners.get_mut(event) else {
            return Ok(false);
        };
        match list
            .iter()
            .rposition(|l| l.once == once && &l.handler == handler)
        {
            Some(idx) => {
                list.remove(idx);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Advance `cursor` over the list for `event` and return the next handler
    /// to run. One-shot entries are taken out of the list here, before the
    /// caller runs them.
    pub fn next_for_delivery(&mut self, event: &str, cursor: &mut Cursor) -> Option<EventHandler> {
        let list = self.listeners.get_mut(event)?;
        if cursor.index >= list.len() {
            return None;
        }
        if list[cursor.index].once {
            Some(list.remove(cursor.index).handler)
        } else {
            let handler = list[cursor.index].handler.clone();
            cursor.index += 1;
            Some(handler)
        }
    }

    pub fn has_listeners(&self, event: &str) -> bool {
        self.listeners.get(event).is_some_and(|l| !l.is_empty())
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.get(event).map_or(0, Vec::len)
    }
}
