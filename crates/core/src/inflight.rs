//! In-flight markers for remote-requested method calls.
//!
//! A marker is created when a remote `invoke` starts executing locally and
//! carries a single liveness flag. Teardown flips every flag off; the
//! completion path checks its flag before sending a response.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Marker keys are never reused, even across bindings, so a late completion
/// can't retire a marker that belongs to a newer call.
static NEXT_MARKER: AtomicU64 = AtomicU64::new(1);

/// Liveness token for one executing handler.
#[derive(Debug, Clone)]
pub struct Marker {
    key: u64,
    live: Arc<AtomicBool>,
}

impl Marker {
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }
}

/// Set of markers for calls currently executing.
#[derive(Debug, Default)]
pub struct InFlightSet {
    markers: HashMap<u64, Arc<AtomicBool>>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self) -> Marker {
        let key = NEXT_MARKER.fetch_add(1, Ordering::Relaxed);
        let live = Arc::new(AtomicBool::new(true));
        self.markers.insert(key, Arc::clone(&live));
        Marker { key, live }
    }

    pub fn finish(&mut self, marker: &Marker) {
        self.markers.remove(&marker.key);
    }

    /// Mark every executing call as no longer relevant and forget them.
    /// Returns how many were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.markers.len();
        for (_, live) in self.markers.drain() {
            live.store(false, Ordering::Release);
        }
        cancelled
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_keeps_marker_live() {
        let mut set = InFlightSet::new();
        let marker = set.begin();
        assert_eq!(set.len(), 1);
        set.finish(&marker);
        assert!(set.is_empty());
        assert!(marker.is_live());
    }

    #[test]
    fn test_cancel_all_kills_markers() {
        let mut set = InFlightSet::new();
        let a = set.begin();
        let b = set.begin();

        assert_eq!(set.cancel_all(), 2);
        assert!(!a.is_live());
        assert!(!b.is_live());
        assert!(set.is_empty());
    }

    #[test]
    fn test_markers_from_new_generation_unaffected() {
        let mut set = InFlightSet::new();
        let old = set.begin();
        set.cancel_all();

        let fresh = set.begin();
        // retiring a stale marker must not touch the new one
        set.finish(&old);
        assert_eq!(set.len(), 1);
        assert!(fresh.is_live());
    }
}
