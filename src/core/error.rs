//! Error types for scheduler operations.

use thiserror::Error;

use crate::core::job::JobStatus;
use crate::core::substrate::SubstrateError;
use crate::util::serde::JobId;

/// Errors produced by scheduler components.
///
/// Quota exhaustion and infeasible preemption are not errors: they surface as
/// [`crate::core::AdmissionOutcome::Queued`].
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Malformed or inconsistent job spec, rejected before it reaches the store.
    #[error("validation failed: {0}")]
    Validation(String),
    /// No cluster survived filtering.
    #[error("no cluster available: {0}")]
    NoClusterAvailable(String),
    /// Substrate calls kept failing after the retry budget was spent.
    #[error("substrate unavailable: {0}")]
    SubstrateUnavailable(String),
    /// Job id unknown to the store.
    #[error("job not found: {0}")]
    JobNotFound(JobId),
    /// Status change not allowed by the lifecycle state machine.
    #[error("invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        /// Job being transitioned.
        job_id: JobId,
        /// Current status.
        from: JobStatus,
        /// Requested status.
        to: JobStatus,
    },
    /// Optimistic version check failed; a newer write won.
    #[error("version conflict for job {job_id}: expected {expected}, found {found}")]
    VersionConflict {
        /// Job being written.
        job_id: JobId,
        /// Version the writer read.
        expected: u64,
        /// Version currently stored.
        found: u64,
    },
    /// Policy or intent update attempted on a terminal job.
    #[error("job {0} is terminal")]
    JobTerminal(JobId),
    /// Queue name does not resolve in the job's namespace.
    #[error("unknown queue `{queue}` in namespace `{namespace}`")]
    UnknownQueue {
        /// Tenant namespace.
        namespace: String,
        /// Requested queue.
        queue: String,
    },
    /// Queue pool not present in configuration.
    #[error("unknown queue pool: {0}")]
    UnknownPool(String),
    /// Cluster not managed by this scheduler.
    #[error("unknown cluster: {0}")]
    UnknownCluster(String),
    /// Accept called without a pending topology offer.
    #[error("no topology offer pending for job {0}")]
    NoTopologyOffer(JobId),
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
    /// Storage backend failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<SubstrateError> for SchedulerError {
    fn from(err: SubstrateError) -> Self {
        Self::SubstrateUnavailable(err.to_string())
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
