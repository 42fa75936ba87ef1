//! Bounded archive of terminated operations

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{Operation, OperationKind, OperationStatus};

/// Default number of entries kept
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Immutable snapshot of an operation taken when it became terminal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub id: String,
    pub kind: OperationKind,
    pub owning_resource: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// `end_time - start_time` in milliseconds
    pub duration_ms: i64,
    pub status: OperationStatus,
    pub error: Option<String>,
    /// Kind-specific summary (files processed, pages generated, ...)
    pub metadata: serde_json::Value,
}

impl HistoryEntry {
    /// Build an entry from a terminal record; `None` if it is still in flight
    pub fn from_operation(op: &Operation) -> Option<Self> {
        let end_time = op.end_time.filter(|_| op.is_terminal())?;
        Some(Self {
            id: op.id.clone(),
            kind: op.kind(),
            owning_resource: op.owning_resource().map(str::to_string),
            start_time: op.start_time,
            end_time,
            duration_ms: (end_time - op.start_time).num_milliseconds(),
            status: op.status,
            error: op.error.clone(),
            metadata: op.details.metadata(),
        })
    }

    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.duration_ms)
    }
}

/// Newest-first archive holding at most `capacity` entries
#[derive(Debug)]
pub struct HistoryArchive {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl Default for HistoryArchive {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryArchive {
    /// Create an archive; a capacity of zero is raised to one
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Prepend an entry, evicting the oldest when full.
    ///
    /// Returns the evicted entry, if any.
    pub fn record(&mut self, entry: HistoryEntry) -> Option<HistoryEntry> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_back()
        } else {
            None
        };
        self.entries.push_front(entry);
        evicted
    }

    /// Entries newest-first
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn for_resource(&self, key: &str) -> Vec<HistoryEntry> {
        self.entries
            .iter()
            .filter(|e| e.owning_resource.as_deref() == Some(key))
            .cloned()
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
