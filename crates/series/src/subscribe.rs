//! Change notification for series readers.
//!
//! Subscribers are told about every committed write and about completion.
//! Notifications are delivered on the writer's thread after the write lock is
//! released, so a subscriber may read the series from its callback.

use crate::slots::{SlotArena, SlotHandle};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

/// Receiver of series change notifications.
pub trait SeriesSubscriber: Send + Sync {
    /// Called after a write is committed with the new series version.
    fn on_update(&self, version: u64);

    /// Called once when the series becomes read-only through completion.
    fn on_complete(&self) {}
}

type Sink = Arc<dyn SeriesSubscriber>;

// Most series have at most one subscriber; the arena is only built for more.
enum Subscribers {
    Empty { generation: u32 },
    Single { handle: SlotHandle, sink: Sink },
    Many(SlotArena<Sink>),
}

pub(crate) struct SubscriberRegistry {
    inner: Mutex<Subscribers>,
}

impl SubscriberRegistry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Subscribers::Empty { generation: 0 }),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match &*self.inner.lock() {
            Subscribers::Empty { .. } => 0,
            Subscribers::Single { .. } => 1,
            Subscribers::Many(arena) => arena.len(),
        }
    }

    fn insert(&self, sink: Sink) -> SlotHandle {
        let mut inner = self.inner.lock();
        let current = std::mem::replace(&mut *inner, Subscribers::Empty { generation: 0 });
        let (next, handle) = match current {
            Subscribers::Empty { generation } => {
                let handle = SlotHandle::new(0, generation);
                (Subscribers::Single { handle, sink }, handle)
            }
            Subscribers::Single {
                handle: existing,
                sink: existing_sink,
            } => {
                let mut arena = SlotArena::seeded(existing, existing_sink);
                let handle = arena.insert(sink);
                (Subscribers::Many(arena), handle)
            }
            Subscribers::Many(mut arena) => {
                let handle = arena.insert(sink);
                (Subscribers::Many(arena), handle)
            }
        };
        *inner = next;
        handle
    }

    fn remove(&self, handle: SlotHandle) -> bool {
        let mut inner = self.inner.lock();
        match &mut *inner {
            Subscribers::Empty { .. } => false,
            Subscribers::Single { handle: current, .. } => {
                if *current != handle {
                    return false;
                }
                let generation = current.generation().wrapping_add(1);
                *inner = Subscribers::Empty { generation };
                true
            }
            Subscribers::Many(arena) => arena.remove(handle).is_some(),
        }
    }

    // Snapshot under the lock, deliver outside it.
    fn sinks(&self) -> Vec<Sink> {
        match &*self.inner.lock() {
            Subscribers::Empty { .. } => Vec::new(),
            Subscribers::Single { sink, .. } => vec![Arc::clone(sink)],
            Subscribers::Many(arena) => arena.values().cloned().collect(),
        }
    }

    pub(crate) fn notify_update(&self, version: u64) {
        for sink in self.sinks() {
            sink.on_update(version);
        }
    }

    pub(crate) fn notify_complete(&self) {
        for sink in self.sinks() {
            sink.on_complete();
        }
    }
}

/// Registration of a subscriber; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    registry: Weak<SubscriberRegistry>,
    handle: SlotHandle,
}

impl Subscription {
    pub(crate) fn register(registry: &Arc<SubscriberRegistry>, sink: Sink) -> Self {
        let handle = registry.insert(sink);
        Self {
            registry: Arc::downgrade(registry),
            handle,
        }
    }

    /// Handle identifying this registration.
    pub fn handle(&self) -> SlotHandle {
        self.handle
    }

    /// Unsubscribes explicitly.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.handle);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("handle", &self.handle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct Counter {
        updates: AtomicU64,
        last: AtomicU64,
        completed: AtomicU64,
    }

    impl SeriesSubscriber for Counter {
        fn on_update(&self, version: u64) {
            self.updates.fetch_add(1, Ordering::Relaxed);
            self.last.store(version, Ordering::Relaxed);
        }

        fn on_complete(&self) {
            self.completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_single_then_promoted() {
        let registry = Arc::new(SubscriberRegistry::new());
        let first = Arc::new(Counter::default());
        let second = Arc::new(Counter::default());

        let a = Subscription::register(&registry, first.clone());
        registry.notify_update(1);
        let b = Subscription::register(&registry, second.clone());
        assert_eq!(registry.len(), 2);
        registry.notify_update(2);

        assert_eq!(first.updates.load(Ordering::Relaxed), 2);
        assert_eq!(second.updates.load(Ordering::Relaxed), 1);
        assert_eq!(second.last.load(Ordering::Relaxed), 2);

        drop(a);
        registry.notify_complete();
        assert_eq!(first.completed.load(Ordering::Relaxed), 0);
        assert_eq!(second.completed.load(Ordering::Relaxed), 1);
        drop(b);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_stale_single_handle_ignored() {
        let registry = Arc::new(SubscriberRegistry::new());
        let sink = Arc::new(Counter::default());

        let first = Subscription::register(&registry, sink.clone());
        let stale = first.handle();
        first.unsubscribe();
        let second = Subscription::register(&registry, sink.clone());

        assert_ne!(stale, second.handle());
        assert!(!registry.remove(stale));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_subscription_outlives_registry() {
        let registry = Arc::new(SubscriberRegistry::new());
        let subscription = Subscription::register(&registry, Arc::new(Counter::default()));
        drop(registry);
        drop(subscription);
    }
}
