//! Low-memory notification plumbing.
//!
//! The host process owns the bus and fires [`MemoryPressureBus::notify_low_memory`]
//! from its own watcher; the engine subscribes a background flush at
//! construction and unsubscribes at dispose. The bus is a plain value handed
//! in at construction, not a process-wide singleton.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type LowMemoryListener = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by [`MemoryPressureBus::subscribe`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<u64, LowMemoryListener>>,
}

/// Fan-out registry for low-memory events.
#[derive(Clone, Default)]
pub struct MemoryPressureBus {
    inner: Arc<BusInner>,
}

impl MemoryPressureBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: LowMemoryListener) -> SubscriptionId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().insert(id, listener);
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.listeners.lock().remove(&id.0);
    }

    /// Invoke every subscribed listener.
    ///
    /// Listeners are snapshotted first so a listener can unsubscribe (or
    /// subscribe) without deadlocking the bus.
    pub fn notify_low_memory(&self) {
        let listeners: Vec<LowMemoryListener> =
            self.inner.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn subscribe_notify_unsubscribe() {
        let bus = MemoryPressureBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_in_listener = hits.clone();
        let id = bus.subscribe(Arc::new(move || {
            hits_in_listener.fetch_add(1, Ordering::SeqCst);
        }));

        bus.notify_low_memory();
        bus.notify_low_memory();
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        bus.unsubscribe(id);
        bus.notify_low_memory();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn notify_with_no_listeners_is_fine() {
        MemoryPressureBus::new().notify_low_memory();
    }
}
