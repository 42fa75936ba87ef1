//! Aggregate statistics over live operations

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::types::{Operation, OperationKind, OperationStatus};

/// Counts computed on demand from the live operation map
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationStats {
    /// Number of live records
    pub total: usize,
    /// Records that are connecting or running
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Count per kind; every kind is present, defaulting to zero
    pub by_type: BTreeMap<OperationKind, usize>,
    /// Count per owning resource key
    pub by_owning_resource: BTreeMap<String, usize>,
}

impl Default for OperationStats {
    fn default() -> Self {
        Self {
            total: 0,
            running: 0,
            completed: 0,
            failed: 0,
            cancelled: 0,
            by_type: OperationKind::ALL.iter().map(|k| (*k, 0)).collect(),
            by_owning_resource: BTreeMap::new(),
        }
    }
}

impl OperationStats {
    pub fn compute<'a, I>(operations: I) -> Self
    where
        I: IntoIterator<Item = &'a Arc<Operation>>,
    {
        let mut stats = Self::default();

        for op in operations {
            stats.total += 1;
            match op.status {
                OperationStatus::Connecting | OperationStatus::Running => stats.running += 1,
                OperationStatus::Completed => stats.completed += 1,
                OperationStatus::Error => stats.failed += 1,
                OperationStatus::Cancelled => stats.cancelled += 1,
                OperationStatus::Idle => {}
            }
            *stats.by_type.entry(op.kind()).or_insert(0) += 1;
            if let Some(key) = op.owning_resource() {
                *stats
                    .by_owning_resource
                    .entry(key.to_string())
                    .or_insert(0) += 1;
            }
        }

        stats
    }

    pub fn count_for(&self, kind: OperationKind) -> usize {
        self.by_type.get(&kind).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewOperation;
    use chrono::Utc;

    #[test]
    fn test_empty_stats_have_all_kinds() {
        let stats = OperationStats::compute(std::iter::empty());
        assert_eq!(stats.total, 0);
        assert_eq!(stats.by_type.len(), 4);
        assert!(stats.by_type.values().all(|c| *c == 0));
        assert!(stats.by_owning_resource.is_empty());
    }

    #[test]
    fn test_compute_counts() {
        let now = Utc::now();
        let ops = vec![
            Arc::new(Operation::started(
                "a".into(),
                NewOperation::indexing("repoA", 1),
                now,
            )),
            Arc::new(Operation::started(
                "b".into(),
                NewOperation::generation("repoA", 1).connecting(),
                now,
            )),
            Arc::new(
                Operation::started("c".into(), NewOperation::query(None, "q"), now)
                    .finished(OperationStatus::Error, now, Some("x".into()))
                    .unwrap(),
            ),
        ];

        let stats = OperationStats::compute(&ops);

        assert_eq!(stats.total, 3);
        assert_eq!(stats.running, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.count_for(OperationKind::Indexing), 1);
        assert_eq!(stats.count_for(OperationKind::Research), 0);
        assert_eq!(stats.by_owning_resource.get("repoA"), Some(&2));
        assert_eq!(stats.by_type.values().sum::<usize>(), stats.total);
    }
}
