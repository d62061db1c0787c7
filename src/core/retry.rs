//! Failure classification and bounded retry.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::job::{Job, JobType};
use crate::core::substrate::FailureCause;
use crate::util::clock::after_ms;
use crate::util::serde::TopologyLevel;

/// Why a job stopped running, from the scheduler's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum FailureKind {
    /// Node memory or disk pressure.
    ResourcePressure,
    /// Node lost.
    NodeFailure,
    /// Image could not be pulled.
    ImagePull,
    /// Evicted by the substrate.
    Preempted,
    /// Substrate calls exhausted their retry budget.
    SubstrateUnavailable,
    /// Workload exited with an error.
    Application(String),
    /// Substrate objects vanished outside the scheduler.
    ResourceMissingExternally,
    /// Deadline passed before completion.
    DeadlineExceeded,
    /// Ran longer than its maximum runtime.
    MaxRuntimeExceeded,
    /// No topology level can place the job.
    TopologyInfeasible(TopologyLevel),
    /// Anything else; terminal.
    Other(String),
}

impl FailureKind {
    /// Map a substrate failure cause.
    pub fn from_cause(cause: &FailureCause) -> Self {
        match cause {
            FailureCause::ResourcePressure => Self::ResourcePressure,
            FailureCause::NodeFailure => Self::NodeFailure,
            FailureCause::ImagePull => Self::ImagePull,
            FailureCause::Preempted => Self::Preempted,
            FailureCause::Application(msg) => Self::Application(msg.clone()),
            FailureCause::Other(msg) => Self::Other(msg.clone()),
        }
    }

    /// Whether a job of `job_type` may be retried after this failure.
    pub const fn is_retryable(&self, job_type: JobType) -> bool {
        match self {
            Self::ResourcePressure
            | Self::NodeFailure
            | Self::ImagePull
            | Self::Preempted
            | Self::SubstrateUnavailable => true,
            Self::Application(_) => matches!(job_type, JobType::Service),
            Self::ResourceMissingExternally
            | Self::DeadlineExceeded
            | Self::MaxRuntimeExceeded
            | Self::TopologyInfeasible(_)
            | Self::Other(_) => false,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourcePressure => f.write_str("evicted under resource pressure"),
            Self::NodeFailure => f.write_str("node failure"),
            Self::ImagePull => f.write_str("image pull failed"),
            Self::Preempted => f.write_str("preempted by substrate"),
            Self::SubstrateUnavailable => f.write_str("substrate unavailable"),
            Self::Application(msg) => write!(f, "application failed: {msg}"),
            Self::ResourceMissingExternally => f.write_str("resource missing externally"),
            Self::DeadlineExceeded => f.write_str("deadline exceeded"),
            Self::MaxRuntimeExceeded => f.write_str("max runtime exceeded"),
            Self::TopologyInfeasible(level) => {
                write!(f, "topology infeasible: no placement at {level} or any looser level")
            }
            Self::Other(msg) => f.write_str(msg),
        }
    }
}

/// What to do with a failed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reset to `PENDING` and resubmit once `not_before_ms` passes.
    Retry {
        /// Retry count after this attempt.
        attempt: u32,
        /// Earliest resubmission time.
        not_before_ms: u128,
    },
    /// Fail permanently.
    Fail {
        /// Reason recorded on the job.
        reason: String,
    },
}

/// Apply the job's retry policy to a failure.
pub fn decide_retry(job: &Job, kind: &FailureKind, now_ms: u128) -> RetryDecision {
    if !kind.is_retryable(job.job_type) {
        return RetryDecision::Fail {
            reason: kind.to_string(),
        };
    }
    if job.retry_count >= job.policy.max_retries {
        return RetryDecision::Fail {
            reason: format!("{kind} (retries exhausted after {})", job.retry_count),
        };
    }
    RetryDecision::Retry {
        attempt: job.retry_count + 1,
        not_before_ms: after_ms(now_ms, job.policy.retry_delay()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::{JobSpec, NewJob, ResourceRequest};

    fn job(job_type: JobType, retries: u32) -> Job {
        let spec = JobSpec::new("j", "ns", job_type, ResourceRequest::gpus("a100", 1)).with_retries(2, 10);
        let mut job = Job::from_new(
            uuid::Uuid::new_v4(),
            NewJob {
                spec,
                idempotency_key: None,
                cluster: "c1".into(),
                pool: "p".into(),
            },
            0,
        );
        job.retry_count = retries;
        job
    }

    #[test]
    fn test_retryable_within_budget() {
        let decision = decide_retry(&job(JobType::Batch, 0), &FailureKind::NodeFailure, 1_000);
        assert_eq!(
            decision,
            RetryDecision::Retry {
                attempt: 1,
                not_before_ms: 11_000
            }
        );
    }

    #[test]
    fn test_budget_exhausted() {
        let decision = decide_retry(&job(JobType::Batch, 2), &FailureKind::NodeFailure, 0);
        assert!(matches!(decision, RetryDecision::Fail { reason } if reason.contains("exhausted")));
    }

    #[test]
    fn test_application_failure_restarts_only_services() {
        let kind = FailureKind::Application("exit 1".into());
        assert!(matches!(decide_retry(&job(JobType::Batch, 0), &kind, 0), RetryDecision::Fail { .. }));
        assert!(matches!(decide_retry(&job(JobType::Service, 0), &kind, 0), RetryDecision::Retry { .. }));
    }

    #[test]
    fn test_terminal_kinds_have_readable_reasons() {
        assert_eq!(FailureKind::ResourceMissingExternally.to_string(), "resource missing externally");
        assert!(FailureKind::TopologyInfeasible(TopologyLevel::Node).to_string().starts_with("topology"));
        assert!(!FailureKind::DeadlineExceeded.is_retryable(JobType::Service));
    }
}
