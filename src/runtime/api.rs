//! API-facing request/response models and thin handlers over the scheduler.

use serde::{Deserialize, Serialize};

use crate::config::QueueingStrategy;
use crate::core::job::{Job, JobSpec, JobStatus, JobType, TopologyOffer};
use crate::core::scheduler::AdmissionScheduler;
use crate::core::store::JobFilter;
use crate::core::SchedulerError;
use crate::util::serde::{ClusterId, JobId, PriorityClass, ResourceVector};

/// Job submission payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Job to run.
    pub spec: JobSpec,
    /// Optional idempotency key.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Submission result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// The job as stored after the first admission pass.
    pub job: JobView,
    /// False when an existing job owned the idempotency key.
    pub created: bool,
}

/// External view of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    /// Job id.
    pub id: JobId,
    /// Job name.
    pub name: String,
    /// Tenant namespace.
    pub namespace: String,
    /// Workload type.
    pub job_type: JobType,
    /// Current status.
    pub status: JobStatus,
    /// Reason attached to the latest transition.
    pub status_message: Option<String>,
    /// Priority class.
    pub priority: PriorityClass,
    /// Target cluster.
    pub cluster: ClusterId,
    /// Queue pool.
    pub pool: String,
    /// Flavor assigned while admitted.
    pub flavor: Option<String>,
    /// Retries consumed.
    pub retry_count: u32,
    /// Pending topology relaxation offer.
    pub topology_offer: Option<TopologyOffer>,
    /// Creation time.
    pub created_at_ms: u128,
    /// Start time.
    pub started_at_ms: Option<u128>,
    /// End time.
    pub finished_at_ms: Option<u128>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            name: job.name.clone(),
            namespace: job.namespace.clone(),
            job_type: job.job_type,
            status: job.status,
            status_message: job.status_message.clone(),
            priority: job.policy.priority,
            cluster: job.cluster.clone(),
            pool: job.pool.clone(),
            flavor: job.admission.as_ref().map(|a| a.flavor.clone()),
            retry_count: job.retry_count,
            topology_offer: job.topology_offer,
            created_at_ms: job.created_at_ms,
            started_at_ms: job.started_at_ms,
            finished_at_ms: job.finished_at_ms,
        }
    }
}

/// Error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl From<SchedulerError> for ErrorResponse {
    fn from(err: SchedulerError) -> Self {
        let code = match &err {
            SchedulerError::Validation(_) => "validation",
            SchedulerError::NoClusterAvailable(_) => "no_cluster_available",
            SchedulerError::SubstrateUnavailable(_) => "substrate_unavailable",
            SchedulerError::JobNotFound(_) => "not_found",
            SchedulerError::InvalidTransition { .. } => "invalid_transition",
            SchedulerError::VersionConflict { .. } => "conflict",
            SchedulerError::JobTerminal(_) => "terminal",
            SchedulerError::UnknownQueue { .. } => "unknown_queue",
            SchedulerError::UnknownPool(_) => "unknown_pool",
            SchedulerError::UnknownCluster(_) => "unknown_cluster",
            SchedulerError::NoTopologyOffer(_) => "no_topology_offer",
            SchedulerError::Config(_) => "config",
            SchedulerError::Backend(_) => "backend",
        };
        Self {
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

/// Usage of one pool on one flavor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlavorUsageView {
    /// Flavor name.
    pub flavor: String,
    /// Guaranteed quota.
    pub nominal: ResourceVector,
    /// Current usage.
    pub used: ResourceVector,
    /// Usage above nominal.
    pub borrowed: ResourceVector,
}

/// Pool listing entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Cluster.
    pub cluster: ClusterId,
    /// Cohort the pool shares quota with.
    pub cohort: String,
    /// Pool name.
    pub name: String,
    /// Fair-share weight.
    pub weight: u32,
    /// Queueing strategy.
    pub strategy: QueueingStrategy,
    /// Per-flavor usage.
    pub flavors: Vec<FlavorUsageView>,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
    /// Managed clusters.
    pub clusters: usize,
    /// Jobs waiting for admission across clusters.
    pub queued: usize,
}

/// Submit a job.
pub async fn submit_job(
    scheduler: &AdmissionScheduler,
    req: SubmitRequest,
) -> Result<SubmitResponse, ErrorResponse> {
    let outcome = scheduler.submit(req.spec, req.idempotency_key).await?;
    Ok(SubmitResponse {
        job: JobView::from(&outcome.job),
        created: outcome.created,
    })
}

/// Fetch one job.
pub fn get_job(scheduler: &AdmissionScheduler, id: JobId) -> Result<JobView, ErrorResponse> {
    Ok(JobView::from(&scheduler.get_job(id)?))
}

/// List jobs matching a filter.
pub fn list_jobs(scheduler: &AdmissionScheduler, filter: &JobFilter) -> Result<Vec<JobView>, ErrorResponse> {
    Ok(scheduler.list_jobs(filter)?.iter().map(JobView::from).collect())
}

/// Cancel a job.
pub async fn cancel_job(scheduler: &AdmissionScheduler, id: JobId) -> Result<JobView, ErrorResponse> {
    Ok(JobView::from(&scheduler.cancel_job(id).await?))
}

/// Accept a pending topology offer.
pub async fn accept_topology_offer(scheduler: &AdmissionScheduler, id: JobId) -> Result<JobView, ErrorResponse> {
    Ok(JobView::from(&scheduler.accept_topology_offer(id).await?))
}

/// Pool usage across every cluster.
pub fn list_pools(scheduler: &AdmissionScheduler) -> Vec<PoolSnapshot> {
    let mut pools = Vec::new();
    for cluster in scheduler.cluster_ids() {
        let Ok(cohorts) = scheduler.pool_usage(&cluster) else {
            continue;
        };
        for cohort in cohorts {
            for pool in cohort.pools {
                pools.push(PoolSnapshot {
                    cluster: cluster.clone(),
                    cohort: cohort.name.clone(),
                    name: pool.name,
                    weight: pool.weight,
                    strategy: pool.strategy,
                    flavors: pool
                        .slots
                        .iter()
                        .map(|slot| FlavorUsageView {
                            flavor: slot.flavor.clone(),
                            nominal: slot.nominal,
                            used: slot.used,
                            borrowed: slot.borrowed(),
                        })
                        .collect(),
                });
            }
        }
    }
    pools
}

/// Health payload.
pub fn health(scheduler: &AdmissionScheduler) -> Health {
    let ids = scheduler.cluster_ids();
    let queued = ids
        .iter()
        .filter_map(|id| scheduler.runtime(id).ok())
        .map(|rt| rt.queue_depth())
        .sum();
    Health {
        ok: true,
        clusters: ids.len(),
        queued,
    }
}
