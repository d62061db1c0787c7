//! Execution-substrate boundary: the traits the scheduler drives and observes.
//!
//! The substrate owns two kinds of object per job: the execution resource that
//! actually runs the workload, and the admission-tracking object that mirrors the
//! scheduler's admission decision. Both are labelled with [`MANAGED_BY_LABEL`] and
//! [`JOB_ID_LABEL`] so the reconciler can find them again.
//!
//! [`MANAGED_BY_LABEL`]: crate::util::serde::MANAGED_BY_LABEL
//! [`JOB_ID_LABEL`]: crate::util::serde::JOB_ID_LABEL

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::job::{Job, JobType, ResourceRequest};
use crate::util::serde::{
    ClusterId, JobId, ResourceVector, TopologyLevel, JOB_ID_LABEL, MANAGED_BY_LABEL,
    MANAGED_BY_VALUE,
};

/// Errors returned by substrate and capacity-feed calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubstrateError {
    /// Substrate could not be reached.
    #[error("substrate unavailable: {0}")]
    Unavailable(String),
    /// Call did not complete within its timeout.
    #[error("substrate call timed out after {0:?}")]
    Timeout(Duration),
    /// Referenced object does not exist.
    #[error("substrate object not found: {0}")]
    NotFound(String),
    /// Substrate refused the request.
    #[error("substrate rejected request: {0}")]
    Rejected(String),
}

impl SubstrateError {
    /// Transient errors are retried with backoff.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

/// Why the substrate reports a workload as failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "cause", content = "detail")]
pub enum FailureCause {
    /// Evicted by the node for memory or disk pressure.
    ResourcePressure,
    /// Node went away.
    NodeFailure,
    /// Image could not be pulled.
    ImagePull,
    /// Substrate-level preemption.
    Preempted,
    /// Workload exited with an error.
    Application(String),
    /// Anything else.
    Other(String),
}

/// Workload state as reported by the substrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Accepted, not yet executing.
    Pending,
    /// Executing.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with a failure.
    Failed(FailureCause),
}

/// State of an admission-tracking object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    /// Waiting for admission.
    NotAdmitted,
    /// Capacity reserved.
    Admitted,
    /// Capacity released by preemption; object retained for re-admission.
    Evicted,
}

/// Which substrate object a [`ManagedObject`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// Execution resource.
    Resource,
    /// Admission-tracking object.
    Tracking,
}

/// Substrate object returned by a label-selector listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedObject {
    /// Object kind.
    pub kind: ObjectKind,
    /// Opaque handle.
    pub handle: String,
    /// Labels on the object.
    pub labels: BTreeMap<String, String>,
}

impl ManagedObject {
    /// Owning job id parsed from [`JOB_ID_LABEL`], if present and well-formed.
    pub fn job_id(&self) -> Option<JobId> {
        self.labels
            .get(JOB_ID_LABEL)
            .and_then(|raw| JobId::parse_str(raw).ok())
    }
}

/// Label selector: every pair must match.
pub type LabelSelector = BTreeMap<String, String>;

/// Selector matching every object this scheduler created.
pub fn managed_selector() -> LabelSelector {
    BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string())])
}

/// Labels stamped on objects owned by `job_id`.
pub fn job_labels(job_id: JobId) -> BTreeMap<String, String> {
    let mut labels = managed_selector();
    labels.insert(JOB_ID_LABEL.to_string(), job_id.to_string());
    labels
}

/// Everything the substrate needs to create an execution resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceTemplate {
    /// Owning job; creation is idempotent on this key.
    pub job_id: JobId,
    /// Job name.
    pub name: String,
    /// Tenant namespace.
    pub namespace: String,
    /// Workload type.
    pub job_type: JobType,
    /// Assigned flavor.
    pub flavor: String,
    /// Resource request.
    pub resources: ResourceRequest,
    /// Topology constraint in force.
    pub topology: Option<TopologyLevel>,
    /// Labels to stamp.
    pub labels: BTreeMap<String, String>,
    /// Opaque workload template.
    pub template: serde_json::Value,
}

impl ResourceTemplate {
    /// Template for an admitted job on `flavor`.
    pub fn for_job(job: &Job, flavor: impl Into<String>) -> Self {
        Self {
            job_id: job.id,
            name: job.name.clone(),
            namespace: job.namespace.clone(),
            job_type: job.job_type,
            flavor: flavor.into(),
            resources: job.resources.clone(),
            topology: job.policy.topology,
            labels: job_labels(job.id),
            template: job.template.clone(),
        }
    }
}

/// Execution substrate of one cluster.
#[async_trait]
pub trait Substrate: Send + Sync {
    /// Create the execution resource. Returns the existing handle if one already
    /// exists for `template.job_id`.
    async fn create_resource(&self, template: &ResourceTemplate) -> Result<String, SubstrateError>;

    /// Current state, or `None` when the resource no longer exists.
    async fn resource_status(&self, handle: &str) -> Result<Option<RunState>, SubstrateError>;

    /// Delete the resource, giving the workload `grace` to shut down.
    async fn delete_resource(&self, handle: &str, grace: Duration) -> Result<(), SubstrateError>;

    /// Create the tracking object for a job (idempotent on job id).
    async fn create_tracking(
        &self,
        job_id: JobId,
        labels: &BTreeMap<String, String>,
    ) -> Result<String, SubstrateError>;

    /// Tracking state, or `None` when the object no longer exists.
    async fn tracking_state(&self, handle: &str) -> Result<Option<TrackingState>, SubstrateError>;

    /// Mark the tracking object admitted on `flavor`.
    async fn set_tracking_admitted(&self, handle: &str, flavor: &str) -> Result<(), SubstrateError>;

    /// Mark the tracking object evicted.
    async fn evict_tracking(&self, handle: &str) -> Result<(), SubstrateError>;

    /// Delete the tracking object.
    async fn delete_tracking(&self, handle: &str) -> Result<(), SubstrateError>;

    /// List objects whose labels match every pair of `selector`.
    async fn list_managed(&self, selector: &LabelSelector) -> Result<Vec<ManagedObject>, SubstrateError>;

    /// Ask the workload to checkpoint; resolves once the checkpoint is saved.
    async fn request_checkpoint(&self, handle: &str) -> Result<(), SubstrateError>;
}

/// Free capacity of one flavor as seen by the capacity feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlavorCapacity {
    /// Free capacity across the flavor.
    pub available: ResourceVector,
    /// Largest contiguous free GPU block within one domain of each level.
    #[serde(default)]
    pub free_blocks: BTreeMap<TopologyLevel, u64>,
    /// Installed GPUs of the flavor, busy or free, when the feed reports it.
    #[serde(default)]
    pub installed_gpus: Option<u64>,
}

impl FlavorCapacity {
    /// Flavor with free capacity and no topology detail.
    pub fn new(available: ResourceVector) -> Self {
        Self {
            available,
            free_blocks: BTreeMap::new(),
            installed_gpus: None,
        }
    }

    /// Record the installed GPU count.
    #[must_use]
    pub fn with_installed_gpus(mut self, gpus: u64) -> Self {
        self.installed_gpus = Some(gpus);
        self
    }

    /// Record the largest free GPU block at `level`.
    #[must_use]
    pub fn with_block(mut self, level: TopologyLevel, gpus: u64) -> Self {
        self.free_blocks.insert(level, gpus);
        self
    }

    /// Largest placeable GPU count at `level`; unknown levels fall back to the total.
    pub fn block_at(&self, level: TopologyLevel) -> u64 {
        self.free_blocks
            .get(&level)
            .copied()
            .unwrap_or(self.available.gpu)
            .min(self.available.gpu)
    }
}

/// Capacity snapshot of a cluster, keyed by flavor name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterCapacity {
    /// Per-flavor free capacity.
    pub flavors: BTreeMap<String, FlavorCapacity>,
}

impl ClusterCapacity {
    /// Add a flavor entry.
    #[must_use]
    pub fn with_flavor(mut self, flavor: impl Into<String>, capacity: FlavorCapacity) -> Self {
        self.flavors.insert(flavor.into(), capacity);
        self
    }

    /// Capacity of one flavor.
    pub fn flavor(&self, name: &str) -> Option<&FlavorCapacity> {
        self.flavors.get(name)
    }
}

/// Read-only capacity feed consumed by the cluster selector and topology checks.
#[async_trait]
pub trait CapacityFeed: Send + Sync {
    /// Free capacity per flavor in `cluster`.
    async fn cluster_capacity(&self, cluster: &ClusterId) -> Result<ClusterCapacity, SubstrateError>;
}

/// Bounds for substrate calls: per-call timeout and exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Attempts including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Delay ceiling.
    pub max_delay: Duration,
    /// Timeout applied to each attempt.
    pub call_timeout: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Run `call` until it succeeds, fails permanently, or the attempts run out.
pub async fn with_backoff<T, F, Fut>(
    policy: &BackoffPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, SubstrateError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SubstrateError>>,
{
    let mut delay = policy.base_delay;
    let mut attempt = 0_u32;
    loop {
        attempt += 1;
        let result = match tokio::time::timeout(policy.call_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(SubstrateError::Timeout(policy.call_timeout)),
        };
        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                tracing::warn!(operation, attempt, error = %err, "substrate call failed; backing off");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2).min(policy.max_delay);
            }
            Err(err) => {
                tracing::error!(operation, attempt, error = %err, "substrate call failed");
                return Err(err);
            }
        }
    }
}
