//! In-memory pending queue ordered by priority class, then submission time.

use std::collections::{BTreeSet, HashMap};

use crate::core::queue::{PendingEntry, PendingQueue};
use crate::util::serde::JobId;

/// Ordered set of queued jobs with O(log n) insert and remove.
#[derive(Debug, Default)]
pub struct InMemoryPendingQueue {
    ordered: BTreeSet<PendingEntry>,
    by_id: HashMap<JobId, PendingEntry>,
}

impl InMemoryPendingQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PendingQueue for InMemoryPendingQueue {
    fn enqueue(&mut self, entry: PendingEntry) -> bool {
        if self.by_id.contains_key(&entry.job_id) {
            return false;
        }
        self.by_id.insert(entry.job_id, entry.clone());
        self.ordered.insert(entry);
        true
    }

    fn remove(&mut self, job_id: JobId) -> Option<PendingEntry> {
        let entry = self.by_id.remove(&job_id)?;
        self.ordered.remove(&entry);
        Some(entry)
    }

    fn contains(&self, job_id: JobId) -> bool {
        self.by_id.contains_key(&job_id)
    }

    fn ordered(&self) -> Vec<PendingEntry> {
        self.ordered.iter().cloned().collect()
    }

    fn clear(&mut self) {
        self.ordered.clear();
        self.by_id.clear();
    }

    fn len(&self) -> usize {
        self.by_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::serde::PriorityClass;
    use uuid::Uuid;

    fn entry(priority: PriorityClass, submitted_at_ms: u128) -> PendingEntry {
        PendingEntry {
            job_id: Uuid::new_v4(),
            pool: "p".into(),
            priority,
            submitted_at_ms,
        }
    }

    #[test]
    fn test_priority_then_fifo() {
        let mut queue = InMemoryPendingQueue::new();
        let low = entry(PriorityClass::Low, 1);
        let normal_late = entry(PriorityClass::Normal, 20);
        let normal_early = entry(PriorityClass::Normal, 10);
        let critical = entry(PriorityClass::Critical, 30);
        for e in [&low, &normal_late, &normal_early, &critical] {
            assert!(queue.enqueue(e.clone()));
        }
        let order: Vec<JobId> = queue.ordered().into_iter().map(|e| e.job_id).collect();
        assert_eq!(
            order,
            vec![critical.job_id, normal_early.job_id, normal_late.job_id, low.job_id]
        );
    }

    #[test]
    fn test_duplicate_and_remove() {
        let mut queue = InMemoryPendingQueue::new();
        let e = entry(PriorityClass::Normal, 1);
        assert!(queue.enqueue(e.clone()));
        assert!(!queue.enqueue(e.clone()));
        assert_eq!(queue.len(), 1);
        assert!(queue.contains(e.job_id));
        assert_eq!(queue.remove(e.job_id), Some(e.clone()));
        assert!(queue.remove(e.job_id).is_none());
        assert!(queue.is_empty());
    }
}
