//! In-memory job store.

use parking_lot::Mutex;

use crate::core::job::{Job, JobPatch, NewJob};
use crate::core::store::{CreateOutcome, JobFilter, JobStore, StatusChange, StatusUpdate};
use crate::core::SchedulerError;
use crate::infra::store::table::JobTable;
use crate::util::clock::now_ms;
use crate::util::serde::JobId;

/// Process-local store; state is lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    table: Mutex<JobTable>,
}

impl InMemoryJobStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs, terminal ones included.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }
}

impl JobStore for InMemoryJobStore {
    fn create_job(&self, new: NewJob) -> Result<CreateOutcome, SchedulerError> {
        Ok(self.table.lock().create(new, now_ms()))
    }

    fn get(&self, id: JobId) -> Result<Option<Job>, SchedulerError> {
        Ok(self.table.lock().get(id).cloned())
    }

    fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Job>, SchedulerError> {
        Ok(self.table.lock().by_key(key).cloned())
    }

    fn update_status(&self, id: JobId, update: StatusUpdate) -> Result<StatusChange, SchedulerError> {
        self.table.lock().update_status(id, update, now_ms())
    }

    fn patch(
        &self,
        id: JobId,
        expected_version: Option<u64>,
        patch: JobPatch,
    ) -> Result<Job, SchedulerError> {
        self.table.lock().patch(id, expected_version, patch, now_ms())
    }

    fn active_jobs(&self, cluster: &str) -> Result<Vec<Job>, SchedulerError> {
        Ok(self.table.lock().active(cluster))
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, SchedulerError> {
        Ok(self.table.lock().list(filter))
    }

    fn purge_terminal(&self, finished_before_ms: u128) -> Result<usize, SchedulerError> {
        let mut table = self.table.lock();
        let expired = table.expired(finished_before_ms);
        for id in &expired {
            table.remove(*id);
        }
        Ok(expired.len())
    }
}
