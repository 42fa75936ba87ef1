//! Subscriber bookkeeping for tracker fan-out
//!
//! A [`SubscriberRegistry`] holds callbacks keyed by a stable
//! [`SubscriptionId`]. Notification works on a snapshot of the registered
//! callbacks so that callbacks can subscribe, unsubscribe or query the
//! tracker while being notified.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned by the tracker's subscribe functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Allocate a process-unique handle
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SubscriptionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Callback invoked with a borrowed payload
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Entry<T: ?Sized> {
    callback: Callback<T>,
    /// Cleared on removal so snapshots taken earlier skip this entry
    active: Arc<AtomicBool>,
}

impl<T: ?Sized> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
            active: Arc::clone(&self.active),
        }
    }
}

/// Set of callbacks interested in one kind of change
pub struct SubscriberRegistry<T: ?Sized> {
    entries: BTreeMap<SubscriptionId, Entry<T>>,
}

/// Callbacks captured at a point in time, ready to be notified
pub struct NotifyList<T: ?Sized> {
    entries: Vec<(SubscriptionId, Entry<T>)>,
}

impl<T: ?Sized> Default for SubscriberRegistry<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T: ?Sized> SubscriberRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback under a fresh handle
    pub fn add(&mut self, callback: Callback<T>) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.insert(id, callback);
        id
    }

    /// Register a callback under a handle allocated by the caller
    pub(crate) fn insert(&mut self, id: SubscriptionId, callback: Callback<T>) {
        self.entries.insert(
            id,
            Entry {
                callback,
                active: Arc::new(AtomicBool::new(true)),
            },
        );
    }

    /// Remove a callback. Returns `false` if the handle was not registered.
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        match self.entries.remove(&id) {
            Some(entry) => {
                entry.active.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Capture the current callbacks for notification outside any lock
    pub fn snapshot(&self) -> NotifyList<T> {
        NotifyList {
            entries: self
                .entries
                .iter()
                .map(|(id, entry)| (*id, entry.clone()))
                .collect(),
        }
    }

    /// Invoke every registered callback with `payload`
    pub fn notify_all(&self, payload: &T) -> usize {
        self.snapshot().notify(payload)
    }
}

impl<T: ?Sized> NotifyList<T> {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Invoke each still-active callback with `payload`.
    ///
    /// A panicking callback is logged and skipped; remaining callbacks
    /// still run. Returns the number of callbacks that panicked.
    pub fn notify(&self, payload: &T) -> usize {
        let mut failures = 0;
        for (id, entry) in &self.entries {
            if !entry.active.load(Ordering::SeqCst) {
                continue;
            }
            let callback = &entry.callback;
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                failures += 1;
                tracing::warn!(
                    subscription = %id,
                    error = %panic_message(panic.as_ref()),
                    "Subscriber callback panicked"
                );
            }
        }
        failures
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, Callback<u32>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let callback: Callback<u32> = Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, callback)
    }

    #[test]
    fn test_add_notify_remove() {
        let mut registry = SubscriberRegistry::new();
        let (count, callback) = counter();
        let id = registry.add(callback);

        assert_eq!(registry.len(), 1);
        assert!(registry.contains(id));
        registry.notify_all(&7);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(registry.remove(id));
        assert!(!registry.contains(id));
        assert!(!registry.remove(id));
        registry.notify_all(&7);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_handles_are_unique() {
        let mut registry = SubscriberRegistry::<u32>::new();
        let (_, a) = counter();
        let (_, b) = counter();
        assert_ne!(registry.add(a), registry.add(b));
    }

    #[test]
    fn test_panicking_callback_does_not_stop_others() {
        let mut registry = SubscriberRegistry::new();
        registry.add(Arc::new(|_: &u32| panic!("subscriber exploded")));
        let (count, callback) = counter();
        registry.add(callback);

        let failures = registry.notify_all(&1);

        assert_eq!(failures, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_removed_entry_is_skipped_by_earlier_snapshot() {
        let mut registry = SubscriberRegistry::new();
        let (count, callback) = counter();
        let id = registry.add(callback);

        let pending = registry.snapshot();
        registry.remove(id);
        pending.notify(&3);

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
