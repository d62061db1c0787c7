//! Job store abstraction.
//!
//! The store is the durable record of every job and the only place status
//! changes are written. Writes are compare-and-swap on [`Job::version`].

use serde::{Deserialize, Serialize};

use crate::core::job::{Job, JobPatch, JobStatus, JobType, NewJob};
use crate::core::SchedulerError;
use crate::util::serde::JobId;

/// Requested status change.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    /// Target status.
    pub to: JobStatus,
    /// Version the caller read; `None` skips the check.
    pub expected_version: Option<u64>,
    /// Human-readable reason recorded as the status message.
    pub reason: Option<String>,
    /// Field changes written atomically with the status.
    pub patch: JobPatch,
}

impl StatusUpdate {
    /// Move to `status`.
    pub fn to(status: JobStatus) -> Self {
        Self {
            to: status,
            expected_version: None,
            reason: None,
            patch: JobPatch::default(),
        }
    }

    /// Require the stored version to equal `version`.
    #[must_use]
    pub const fn expect_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    /// Attach a reason.
    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attach field changes.
    #[must_use]
    pub fn patch(mut self, patch: JobPatch) -> Self {
        self.patch = patch;
        self
    }
}

/// Result of a successful status write.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    /// Status before the write.
    pub previous: JobStatus,
    /// Job after the write.
    pub job: Job,
}

/// Result of [`JobStore::create_job`].
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOutcome {
    /// The new job, or the existing one owning the idempotency key.
    pub job: Job,
    /// False when the idempotency key already existed.
    pub created: bool,
}

/// Listing filter; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    /// Tenant namespace.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Cluster.
    #[serde(default)]
    pub cluster: Option<String>,
    /// Queue pool.
    #[serde(default)]
    pub pool: Option<String>,
    /// Accepted statuses.
    #[serde(default)]
    pub statuses: Vec<JobStatus>,
    /// Workload type.
    #[serde(default)]
    pub job_type: Option<JobType>,
    /// Maximum results.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl JobFilter {
    /// Match-all filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to a namespace.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Restrict to a cluster.
    #[must_use]
    pub fn cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    /// Restrict to a queue pool.
    #[must_use]
    pub fn pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    /// Add an accepted status.
    #[must_use]
    pub fn status(mut self, status: JobStatus) -> Self {
        self.statuses.push(status);
        self
    }

    /// Restrict to a workload type.
    #[must_use]
    pub const fn job_type(mut self, job_type: JobType) -> Self {
        self.job_type = Some(job_type);
        self
    }

    /// Cap the result count.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// True when `job` passes every set criterion.
    pub fn matches(&self, job: &Job) -> bool {
        self.namespace.as_ref().is_none_or(|ns| &job.namespace == ns)
            && self.cluster.as_ref().is_none_or(|c| &job.cluster == c)
            && self.pool.as_ref().is_none_or(|p| &job.pool == p)
            && (self.statuses.is_empty() || self.statuses.contains(&job.status))
            && self.job_type.is_none_or(|t| job.job_type == t)
    }
}

/// Durable job repository.
pub trait JobStore: Send + Sync {
    /// Persist a new `PENDING` job, or return the job already owning the
    /// idempotency key unchanged.
    fn create_job(&self, new: NewJob) -> Result<CreateOutcome, SchedulerError>;

    /// Fetch a job.
    fn get(&self, id: JobId) -> Result<Option<Job>, SchedulerError>;

    /// Fetch the job owning an idempotency key.
    fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Job>, SchedulerError>;

    /// Change status. Validates the transition and the expected version, applies
    /// the patch, and bumps the version, atomically.
    fn update_status(&self, id: JobId, update: StatusUpdate) -> Result<StatusChange, SchedulerError>;

    /// Change non-status fields under an optional version check.
    fn patch(
        &self,
        id: JobId,
        expected_version: Option<u64>,
        patch: JobPatch,
    ) -> Result<Job, SchedulerError>;

    /// All non-terminal jobs on a cluster, oldest first.
    fn active_jobs(&self, cluster: &str) -> Result<Vec<Job>, SchedulerError>;

    /// Jobs matching a filter, oldest first.
    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, SchedulerError>;

    /// Delete terminal jobs that finished before `finished_before_ms`.
    fn purge_terminal(&self, finished_before_ms: u128) -> Result<usize, SchedulerError>;
}
