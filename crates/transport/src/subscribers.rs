use ire_core::{MessageEvent, MessageHandler};
use parking_lot::Mutex;

/// Inbound handlers attached to one transport.
///
/// Delivery iterates over a snapshot, so a handler may unsubscribe itself
/// (or anyone else) while a frame is being delivered.
#[derive(Debug, Default)]
pub(crate) struct Subscribers {
    handlers: Mutex<Vec<MessageHandler>>,
}

impl Subscribers {
    pub fn add(&self, handler: MessageHandler) {
        self.handlers.lock().push(handler);
    }

    /// Remove the first registration of `handler`.
    pub fn remove(&self, handler: &MessageHandler) -> bool {
        let mut handlers = self.handlers.lock();
        match handlers.iter().position(|h| h == handler) {
            Some(index) => {
                handlers.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn deliver(&self, event: MessageEvent) {
        let snapshot = self.handlers.lock().clone();
        for handler in snapshot {
            handler.call(event.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }
}
