//! In-memory operation tracker
//!
//! The [`OperationTracker`] is the single owner of live operation state.
//! It combines four pieces:
//!
//! - the **registry** of live [`Operation`] snapshots keyed by id
//! - the **query interface** over that registry ([`get`](OperationTracker::get),
//!   [`get_by_type`](OperationTracker::get_by_type), [`get_stats`](OperationTracker::get_stats), ...)
//! - **fan-out** to global and per-operation subscribers
//! - the bounded [`HistoryArchive`] of terminated operations
//!
//! ## Ordering
//!
//! Mutating calls are serialized end to end by a delivery lock: each one
//! takes the state lock, swaps in the new snapshot, records history,
//! captures the subscriber lists, releases the state lock, and notifies
//! subscribers before letting the next mutation in. Subscribers therefore
//! see changes to one id in the order they were applied.
//!
//! Callbacks run outside the state lock, so they may query the tracker or
//! unsubscribe. They must not call a mutating method (`start`, `update`,
//! `complete`, `error`, `cancel`, `clear`, `clear_all`): the delivery lock
//! is still held and the call would deadlock.
//!
//! Mutations addressed to an unknown or already-terminal id are silent
//! no-ops; late and duplicate transport messages are expected.
//!
//! ## Example
//!
//! ```rust
//! use optrack_core::{NewOperation, OperationTracker, OperationUpdate};
//!
//! let tracker = OperationTracker::new();
//! let id = tracker.start(NewOperation::indexing("repoA", 10));
//! tracker.update(&id, OperationUpdate::progress(0.5));
//! tracker.complete(&id, None);
//!
//! assert_eq!(tracker.get_history()[0].id, id);
//! ```

mod history;
mod stats;
mod subscribers;

pub use history::{HistoryArchive, HistoryEntry, DEFAULT_HISTORY_CAPACITY};
pub use stats::OperationStats;
pub use subscribers::{Callback, NotifyList, SubscriberRegistry, SubscriptionId};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::config::HistoryConfig;
use crate::types::{
    DetailsPatch, NewOperation, Operation, OperationKind, OperationStatus, OperationUpdate,
};

/// Source of timestamps for start/end times
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Payload passed to global subscribers: every live record after a mutation
pub type OperationList = [Arc<Operation>];

#[derive(Default)]
struct TrackerState {
    operations: HashMap<String, Arc<Operation>>,
    history: HistoryArchive,
    global: SubscriberRegistry<OperationList>,
    per_operation: HashMap<String, SubscriberRegistry<Operation>>,
    /// Which operation id each per-operation subscription belongs to
    subscription_targets: HashMap<SubscriptionId, String>,
}

impl TrackerState {
    fn snapshot(&self) -> Vec<Arc<Operation>> {
        self.operations.values().cloned().collect()
    }
}

/// Notifications owed after a mutation, delivered once the lock is released
struct PendingNotification {
    snapshot: Vec<Arc<Operation>>,
    global: NotifyList<OperationList>,
    changed: Option<(Arc<Operation>, NotifyList<Operation>)>,
}

impl PendingNotification {
    fn deliver(self) {
        let mut failures = self.global.notify(&self.snapshot);
        if let Some((op, subscribers)) = self.changed {
            failures += subscribers.notify(&op);
        }
        if failures > 0 {
            tracing::debug!(failures, "Fan-out finished with subscriber failures");
        }
    }
}

/// Tracks the lifecycle of long-running backend operations
pub struct OperationTracker {
    state: Mutex<TrackerState>,
    /// Held across apply and fan-out of every mutation
    delivery: Mutex<()>,
    clock: Clock,
}

impl Default for OperationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationTracker {
    /// Create a tracker with the default history capacity and the system clock
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                history: HistoryArchive::with_capacity(capacity),
                ..Default::default()
            }),
            delivery: Mutex::new(()),
            clock: Arc::new(Utc::now),
        }
    }

    /// Create a tracker from the `[history]` config section
    pub fn from_config(config: &HistoryConfig) -> Self {
        Self::with_history_capacity(config.capacity)
    }

    /// Replace the clock used for start and end times
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        // Callbacks never run under the lock, so poisoning can only come from
        // a bug in the tracker itself; the map is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn serialize(&self) -> MutexGuard<'_, ()> {
        // Subscriber panics are caught in fan-out, so this is never poisoned
        // by a callback.
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    // ============================================
    // Registry (mutations)
    // ============================================

    /// Start tracking a new operation and return its id.
    ///
    /// The record starts `running` (or `connecting` when requested) with
    /// `start_time = now`. The details are stored as supplied.
    pub fn start(&self, new: NewOperation) -> String {
        let kind = new.details.kind();
        let id = format!("{}-{}", kind.as_str(), uuid::Uuid::new_v4());
        let op = Arc::new(Operation::started(id.clone(), new, self.now()));

        tracing::debug!(
            id = %id,
            kind = %kind,
            resource = op.owning_resource().unwrap_or("-"),
            status = %op.status,
            "Operation started"
        );

        let _delivery = self.serialize();
        let pending = {
            let mut state = self.lock();
            state.operations.insert(id.clone(), Arc::clone(&op));
            Self::pending(&state, op)
        };
        pending.deliver();

        id
    }

    /// Merge `update` into a live, in-flight operation.
    ///
    /// Returns `false` without notifying anyone when `id` is unknown or
    /// already terminal.
    pub fn update(&self, id: &str, update: OperationUpdate) -> bool {
        self.mutate(id, "update", |op| op.patched(&update))
    }

    /// Mark an operation completed, with optional final kind-specific fields
    pub fn complete(&self, id: &str, result: Option<DetailsPatch>) -> bool {
        let now = self.now();
        self.mutate(id, "complete", |op| {
            let base = match &result {
                Some(patch) => op.patched(&OperationUpdate {
                    details: Some(patch.clone()),
                    ..Default::default()
                })?,
                None => op.clone(),
            };
            base.finished(OperationStatus::Completed, now, None)
        })
    }

    /// Mark an operation failed with a human-readable message
    pub fn error(&self, id: &str, message: impl Into<String>) -> bool {
        let now = self.now();
        let message = message.into();
        self.mutate(id, "error", move |op| {
            op.finished(OperationStatus::Error, now, Some(message))
        })
    }

    /// Mark an operation cancelled.
    ///
    /// Local bookkeeping only: nothing here asks the remote system to stop.
    pub fn cancel(&self, id: &str) -> bool {
        let now = self.now();
        self.mutate(id, "cancel", |op| {
            op.finished(OperationStatus::Cancelled, now, None)
        })
    }

    /// Remove one operation from the live map. History is untouched.
    pub fn clear(&self, id: &str) -> bool {
        let _delivery = self.serialize();
        let pending = {
            let mut state = self.lock();
            if state.operations.remove(id).is_none() {
                tracing::debug!(id = %id, "Clear for unknown operation ignored");
                return false;
            }
            PendingNotification {
                snapshot: state.snapshot(),
                global: state.global.snapshot(),
                changed: None,
            }
        };
        tracing::debug!(id = %id, "Operation cleared");
        pending.deliver();
        true
    }

    /// Remove every operation from the live map. History is untouched.
    pub fn clear_all(&self) -> usize {
        let _delivery = self.serialize();
        let (removed, pending) = {
            let mut state = self.lock();
            let removed = state.operations.len();
            state.operations.clear();
            let pending = PendingNotification {
                snapshot: Vec::new(),
                global: state.global.snapshot(),
                changed: None,
            };
            (removed, pending)
        };
        tracing::debug!(removed, "All operations cleared");
        pending.deliver();
        removed
    }

    /// Apply `transition` to the record for `id` and fan out the result.
    fn mutate<F>(&self, id: &str, action: &'static str, transition: F) -> bool
    where
        F: FnOnce(&Operation) -> Option<Operation>,
    {
        let _delivery = self.serialize();
        let pending = {
            let mut state = self.lock();
            let Some(current) = state.operations.get(id) else {
                tracing::debug!(id = %id, action, "Mutation for unknown operation ignored");
                return false;
            };
            let Some(next) = transition(current) else {
                tracing::debug!(
                    id = %id,
                    action,
                    status = %current.status,
                    "Mutation for terminal operation ignored"
                );
                return false;
            };

            let next = Arc::new(next);
            state.operations.insert(id.to_string(), Arc::clone(&next));

            if next.is_terminal() {
                if let Some(entry) = HistoryEntry::from_operation(&next) {
                    tracing::debug!(
                        id = %id,
                        kind = %entry.kind,
                        status = %entry.status,
                        duration_ms = entry.duration_ms,
                        "Operation finished"
                    );
                    if let Some(evicted) = state.history.record(entry) {
                        tracing::trace!(evicted = %evicted.id, "History full, evicted oldest entry");
                    }
                }
            } else {
                tracing::trace!(id = %id, progress = next.progress, status = %next.status, "Operation updated");
            }

            Self::pending(&state, next)
        };
        pending.deliver();
        true
    }

    fn pending(state: &TrackerState, changed: Arc<Operation>) -> PendingNotification {
        let per_op = state
            .per_operation
            .get(&changed.id)
            .map(SubscriberRegistry::snapshot)
            .filter(|list| !list.is_empty());
        PendingNotification {
            snapshot: state.snapshot(),
            global: state.global.snapshot(),
            changed: per_op.map(|list| (changed, list)),
        }
    }

    // ============================================
    // Query interface
    // ============================================

    pub fn get(&self, id: &str) -> Option<Arc<Operation>> {
        self.lock().operations.get(id).cloned()
    }

    /// All live records, in no particular order
    pub fn get_all(&self) -> Vec<Arc<Operation>> {
        self.lock().snapshot()
    }

    pub fn get_by_type(&self, kind: OperationKind) -> Vec<Arc<Operation>> {
        self.lock()
            .operations
            .values()
            .filter(|op| op.kind() == kind)
            .cloned()
            .collect()
    }

    /// Live records whose owning resource is `key`.
    ///
    /// Records without an owning resource never match.
    pub fn get_by_owning_resource(&self, key: &str) -> Vec<Arc<Operation>> {
        self.lock()
            .operations
            .values()
            .filter(|op| op.owning_resource() == Some(key))
            .cloned()
            .collect()
    }

    /// Live records that are connecting or running
    pub fn get_active(&self) -> Vec<Arc<Operation>> {
        self.lock()
            .operations
            .values()
            .filter(|op| op.status.is_in_flight())
            .cloned()
            .collect()
    }

    /// Aggregate counts, recomputed on every call
    pub fn get_stats(&self) -> OperationStats {
        OperationStats::compute(self.lock().operations.values())
    }

    // ============================================
    // History
    // ============================================

    /// Archived terminal operations, newest first
    pub fn get_history(&self) -> Vec<HistoryEntry> {
        self.lock().history.entries()
    }

    pub fn history_for_resource(&self, key: &str) -> Vec<HistoryEntry> {
        self.lock().history.for_resource(key)
    }

    pub fn clear_history(&self) {
        self.lock().history.clear();
    }

    // ============================================
    // Subscriptions
    // ============================================

    /// Call `callback` with every live record after each applied mutation.
    ///
    /// The callback may read the tracker or unsubscribe, but must not mutate it.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&OperationList) + Send + Sync + 'static,
    {
        self.lock().global.add(Arc::new(callback))
    }

    /// Call `callback` with the new record whenever operation `id` changes.
    ///
    /// The id does not need to exist yet. A subscription for an id that
    /// never changes again stays registered until [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe_to_progress<F>(&self, id: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&Operation) + Send + Sync + 'static,
    {
        let sub = SubscriptionId::next();
        let mut state = self.lock();
        state
            .per_operation
            .entry(id.to_string())
            .or_default()
            .insert(sub, Arc::new(callback));
        state.subscription_targets.insert(sub, id.to_string());
        sub
    }

    /// Remove a global or per-operation subscription.
    ///
    /// Returns `false` if the handle is unknown (e.g. already removed).
    pub fn unsubscribe(&self, sub: SubscriptionId) -> bool {
        let mut state = self.lock();
        if state.global.remove(sub) {
            return true;
        }

        let Some(target) = state.subscription_targets.remove(&sub) else {
            return false;
        };
        let Some(registry) = state.per_operation.get_mut(&target) else {
            return false;
        };
        let removed = registry.remove(sub);
        if registry.is_empty() {
            state.per_operation.remove(&target);
        }
        removed
    }

    /// Number of registered subscriptions (global, per-operation)
    pub fn subscriber_counts(&self) -> (usize, usize) {
        let state = self.lock();
        (state.global.len(), state.subscription_targets.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IndexingPatch, OperationDetails};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fixed_clock(start: DateTime<Utc>, step_ms: i64) -> Clock {
        let ticks = Arc::new(AtomicUsize::new(0));
        Arc::new(move || {
            let n = ticks.fetch_add(1, Ordering::SeqCst) as i64;
            start + chrono::Duration::milliseconds(n * step_ms)
        })
    }

    #[test]
    fn test_start_assigns_id_and_running_status() {
        let tracker = OperationTracker::new();
        let id = tracker.start(NewOperation::indexing("repoA", 10));

        assert!(id.starts_with("indexing-"));
        let op = tracker.get(&id).unwrap();
        assert_eq!(op.status, OperationStatus::Running);
        assert_eq!(op.progress, 0.0);
        assert!(op.end_time.is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let tracker = OperationTracker::new();
        let a = tracker.start(NewOperation::query(None, "a"));
        let b = tracker.start(NewOperation::query(None, "a"));
        assert_ne!(a, b);
        assert_eq!(tracker.get_all().len(), 2);
    }

    #[test]
    fn test_connecting_then_running() {
        let tracker = OperationTracker::new();
        let id = tracker.start(NewOperation::generation("repoA", 5).connecting());
        assert_eq!(tracker.get(&id).unwrap().status, OperationStatus::Connecting);

        tracker.update(
            &id,
            OperationUpdate::default().with_status(OperationStatus::Running),
        );
        assert_eq!(tracker.get(&id).unwrap().status, OperationStatus::Running);
    }

    #[test]
    fn test_duration_uses_clock() {
        let start = Utc::now();
        let tracker = OperationTracker::new().with_clock(fixed_clock(start, 250));
        let id = tracker.start(NewOperation::indexing("repoA", 1));
        tracker.complete(&id, None);

        let entry = &tracker.get_history()[0];
        assert_eq!(entry.start_time, start);
        assert_eq!(entry.duration_ms, 250);
    }

    #[test]
    fn test_complete_with_result_merges_details() {
        let tracker = OperationTracker::new();
        let id = tracker.start(NewOperation::indexing("repoA", 10));
        tracker.complete(
            &id,
            Some(DetailsPatch::Indexing(IndexingPatch {
                files_processed: Some(10),
                ..Default::default()
            })),
        );

        let op = tracker.get(&id).unwrap();
        assert_eq!(op.progress, 1.0);
        match &op.details {
            OperationDetails::Indexing(d) => assert_eq!(d.files_processed, 10),
            other => panic!("unexpected details: {:?}", other),
        }
        assert_eq!(tracker.get_history()[0].metadata["files_processed"], 10);
    }

    #[test]
    fn test_error_records_message() {
        let tracker = OperationTracker::new();
        let id = tracker.start(NewOperation::research(None, "caching", 3));
        assert!(tracker.error(&id, "model unavailable"));

        let op = tracker.get(&id).unwrap();
        assert_eq!(op.status, OperationStatus::Error);
        assert_eq!(op.error.as_deref(), Some("model unavailable"));
        assert_eq!(
            tracker.get_history()[0].error.as_deref(),
            Some("model unavailable")
        );
    }

    #[test]
    fn test_clear_keeps_history() {
        let tracker = OperationTracker::new();
        let id = tracker.start(NewOperation::indexing("repoA", 1));
        tracker.cancel(&id);

        assert!(tracker.clear(&id));
        assert!(tracker.get(&id).is_none());
        assert!(!tracker.clear(&id));
        assert_eq!(tracker.get_history().len(), 1);
        assert_eq!(tracker.get_history()[0].status, OperationStatus::Cancelled);
    }

    #[test]
    fn test_unsubscribe_per_operation_cleans_up() {
        let tracker = OperationTracker::new();
        let sub = tracker.subscribe_to_progress("missing", |_| {});
        assert_eq!(tracker.subscriber_counts(), (0, 1));

        assert!(tracker.unsubscribe(sub));
        assert!(!tracker.unsubscribe(sub));
        assert_eq!(tracker.subscriber_counts(), (0, 0));
    }

    #[test]
    fn test_callback_can_query_tracker() {
        let tracker = Arc::new(OperationTracker::new());
        let seen = Arc::new(AtomicUsize::new(0));

        let inner = Arc::clone(&tracker);
        let counter = Arc::clone(&seen);
        tracker.subscribe(move |ops| {
            // Re-entrant read must not deadlock
            assert_eq!(inner.get_all().len(), ops.len());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let id = tracker.start(NewOperation::query(None, "q"));
        tracker.complete(&id, None);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
