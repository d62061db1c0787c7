//! Pending-queue abstraction for jobs waiting on admission.

use std::cmp::Ordering;

use crate::core::job::Job;
use crate::util::serde::{JobId, PriorityClass};

/// Queue entry for a `QUEUED` job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Job id.
    pub job_id: JobId,
    /// Queue pool charged on admission.
    pub pool: String,
    /// Priority class.
    pub priority: PriorityClass,
    /// Original submission time; preserved across preemption.
    pub submitted_at_ms: u128,
}

impl PendingEntry {
    /// Entry for a job.
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            pool: job.pool.clone(),
            priority: job.policy.priority,
            submitted_at_ms: job.created_at_ms,
        }
    }
}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEntry {
    /// Admission order: higher class first, then earlier submission, then id.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.submitted_at_ms.cmp(&other.submitted_at_ms))
            .then_with(|| self.job_id.cmp(&other.job_id))
    }
}

/// Jobs waiting for admission on one cluster.
pub trait PendingQueue: Send {
    /// Insert an entry; returns false if the job was already queued.
    fn enqueue(&mut self, entry: PendingEntry) -> bool;
    /// Remove a job.
    fn remove(&mut self, job_id: JobId) -> Option<PendingEntry>;
    /// True when the job is queued.
    fn contains(&self, job_id: JobId) -> bool;
    /// Entries in admission order.
    fn ordered(&self) -> Vec<PendingEntry>;
    /// Drop every entry.
    fn clear(&mut self);
    /// Current depth.
    fn len(&self) -> usize;
    /// True when nothing is queued.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
