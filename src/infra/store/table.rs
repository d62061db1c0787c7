//! Job table shared by the store backends.

use std::collections::HashMap;

use uuid::Uuid;

use crate::core::job::{Job, JobPatch, JobStatus, NewJob};
use crate::core::lifecycle::check_transition;
use crate::core::store::{CreateOutcome, JobFilter, StatusChange, StatusUpdate};
use crate::core::SchedulerError;
use crate::util::serde::JobId;

/// Jobs keyed by id plus the unique idempotency-key index.
///
/// Callers wrap the table in a lock; every method here assumes exclusive access.
/// Creation timestamps are strictly increasing so submission order is total.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: HashMap<JobId, Job>,
    by_key: HashMap<String, JobId>,
    last_created_ms: u128,
}

impl JobTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// True when no jobs are stored.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Insert or replace a job verbatim; used when replaying a log.
    pub fn put(&mut self, job: Job) {
        self.last_created_ms = self.last_created_ms.max(job.created_at_ms);
        if let Some(key) = &job.idempotency_key {
            self.by_key.insert(key.clone(), job.id);
        }
        self.jobs.insert(job.id, job);
    }

    /// Remove a job and its key.
    pub fn remove(&mut self, id: JobId) -> Option<Job> {
        let job = self.jobs.remove(&id)?;
        if let Some(key) = &job.idempotency_key {
            self.by_key.remove(key);
        }
        Some(job)
    }

    /// Create a job or return the owner of its idempotency key.
    pub fn create(&mut self, new: NewJob, now_ms: u128) -> CreateOutcome {
        if let Some(existing) = new
            .idempotency_key
            .as_ref()
            .and_then(|key| self.by_key.get(key))
            .and_then(|id| self.jobs.get(id))
        {
            return CreateOutcome {
                job: existing.clone(),
                created: false,
            };
        }
        let created_at_ms = now_ms.max(self.last_created_ms + 1);
        let job = Job::from_new(Uuid::new_v4(), new, created_at_ms);
        self.put(job.clone());
        CreateOutcome { job, created: true }
    }

    /// Fetch a job.
    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    /// Owner of an idempotency key.
    pub fn by_key(&self, key: &str) -> Option<&Job> {
        self.by_key.get(key).and_then(|id| self.jobs.get(id))
    }

    fn entry(&mut self, id: JobId, expected_version: Option<u64>) -> Result<&mut Job, SchedulerError> {
        let job = self.jobs.get_mut(&id).ok_or(SchedulerError::JobNotFound(id))?;
        if let Some(expected) = expected_version {
            if job.version != expected {
                return Err(SchedulerError::VersionConflict {
                    job_id: id,
                    expected,
                    found: job.version,
                });
            }
        }
        Ok(job)
    }

    /// Validated, versioned status change.
    pub fn update_status(
        &mut self,
        id: JobId,
        update: StatusUpdate,
        now_ms: u128,
    ) -> Result<StatusChange, SchedulerError> {
        let StatusUpdate {
            to,
            expected_version,
            reason,
            patch,
        } = update;
        let job = self.entry(id, expected_version)?;
        check_transition(id, job.status, to)?;
        if to == JobStatus::Admitted && job.admission.is_none() && !matches!(patch.admission, Some(Some(_))) {
            return Err(SchedulerError::Backend(format!(
                "job {id} cannot enter ADMITTED without an admission record"
            )));
        }

        let previous = job.status;
        patch.apply(job);
        job.status = to;
        if !to.holds_admission() {
            job.admission = None;
        }
        job.status_message = reason;
        job.stamp_status(now_ms);
        job.version += 1;
        job.updated_at_ms = now_ms;
        Ok(StatusChange {
            previous,
            job: job.clone(),
        })
    }

    /// Versioned non-status change.
    pub fn patch(
        &mut self,
        id: JobId,
        expected_version: Option<u64>,
        patch: JobPatch,
        now_ms: u128,
    ) -> Result<Job, SchedulerError> {
        let job = self.entry(id, expected_version)?;
        if patch.touches_spec() && job.is_terminal() {
            return Err(SchedulerError::JobTerminal(id));
        }
        patch.apply(job);
        job.version += 1;
        job.updated_at_ms = now_ms;
        Ok(job.clone())
    }

    /// Matching jobs, oldest first.
    pub fn list(&self, filter: &JobFilter) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.values().filter(|j| filter.matches(j)).cloned().collect();
        sort_oldest_first(&mut jobs);
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        jobs
    }

    /// Non-terminal jobs on a cluster, oldest first.
    pub fn active(&self, cluster: &str) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .values()
            .filter(|j| j.cluster == cluster && !j.is_terminal())
            .cloned()
            .collect();
        sort_oldest_first(&mut jobs);
        jobs
    }

    /// Ids of terminal jobs finished before the cutoff.
    pub fn expired(&self, finished_before_ms: u128) -> Vec<JobId> {
        self.jobs
            .values()
            .filter(|j| j.is_terminal() && j.finished_at_ms.is_some_and(|t| t < finished_before_ms))
            .map(|j| j.id)
            .collect()
    }
}

fn sort_oldest_first(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms).then_with(|| a.id.cmp(&b.id)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::{AdmissionRecord, JobSpec, JobType, ResourceRequest};
    use crate::util::serde::ResourceVector;

    fn new_job(key: Option<&str>) -> NewJob {
        NewJob {
            spec: JobSpec::new("j", "ns", JobType::Batch, ResourceRequest::gpus("a100", 1)),
            idempotency_key: key.map(str::to_string),
            cluster: "c1".into(),
            pool: "p".into(),
        }
    }

    fn record() -> AdmissionRecord {
        AdmissionRecord {
            cluster: "c1".into(),
            pool: "p".into(),
            flavor: "a100".into(),
            usage: ResourceVector::new(1, 0, 0),
            borrowed: ResourceVector::ZERO,
            admitted_at_ms: 5,
        }
    }

    #[test]
    fn test_idempotent_create() {
        let mut table = JobTable::new();
        let first = table.create(new_job(Some("k")), 1);
        let second = table.create(new_job(Some("k")), 2);
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.job.id, second.job.id);
        assert_eq!(table.len(), 1);
        let third = table.create(new_job(None), 1).job;
        assert_eq!(table.len(), 2);
        assert!(third.created_at_ms > first.job.created_at_ms);
    }

    #[test]
    fn test_version_conflict() {
        let mut table = JobTable::new();
        let job = table.create(new_job(None), 1).job;
        table
            .update_status(job.id, StatusUpdate::to(JobStatus::Queued).expect_version(1), 2)
            .unwrap();
        let err = table
            .update_status(job.id, StatusUpdate::to(JobStatus::Cancelled).expect_version(1), 3)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::VersionConflict { expected: 1, found: 2, .. }));
    }

    #[test]
    fn test_admitted_requires_record_and_exit_clears_it() {
        let mut table = JobTable::new();
        let job = table.create(new_job(None), 1).job;
        table.update_status(job.id, StatusUpdate::to(JobStatus::Queued), 2).unwrap();
        assert!(table.update_status(job.id, StatusUpdate::to(JobStatus::Admitted), 3).is_err());

        let admitted = table
            .update_status(
                job.id,
                StatusUpdate::to(JobStatus::Admitted).patch(JobPatch::new().admission(Some(record()))),
                4,
            )
            .unwrap();
        assert_eq!(admitted.previous, JobStatus::Queued);
        assert!(admitted.job.admission.is_some());

        let cancelled = table
            .update_status(job.id, StatusUpdate::to(JobStatus::Cancelled).reason("user"), 5)
            .unwrap();
        assert!(cancelled.job.admission.is_none());
        assert_eq!(cancelled.job.finished_at_ms, Some(5));
        assert_eq!(cancelled.job.status_message.as_deref(), Some("user"));
    }

    #[test]
    fn test_policy_patch_rejected_when_terminal() {
        let mut table = JobTable::new();
        let job = table.create(new_job(None), 1).job;
        table.update_status(job.id, StatusUpdate::to(JobStatus::Cancelled), 2).unwrap();
        let err = table
            .patch(job.id, None, JobPatch::new().policy(job.policy.clone()), 3)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::JobTerminal(_)));
        assert!(table.patch(job.id, None, JobPatch::new().tracking_ref(None), 3).is_ok());
    }

    #[test]
    fn test_expired_uses_finish_time() {
        let mut table = JobTable::new();
        let done = table.create(new_job(Some("a")), 1).job;
        let live = table.create(new_job(Some("b")), 1).job;
        table.update_status(done.id, StatusUpdate::to(JobStatus::Failed), 10).unwrap();
        assert_eq!(table.expired(11), vec![done.id]);
        assert!(table.expired(10).is_empty());
        table.remove(done.id);
        assert!(table.by_key("a").is_none());
        assert_eq!(table.active("c1").len(), 1);
        assert_eq!(table.active("c1")[0].id, live.id);
    }
}
