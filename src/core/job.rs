//! Job data model.
//!
//! A job is split along three axes:
//!
//! - **Type** ([`JobType`]): closed variant, fixed at creation, drives restart rules.
//! - **Policy** ([`JobPolicy`]): scheduling inputs read by the admission controller.
//! - **Intent** ([`JobIntent`]): optimization hints read by the cluster selector and
//!   the retry handler, never by quota math.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::SchedulerError;
use crate::util::clock::after_ms;
use crate::util::serde::{ClusterId, JobId, PriorityClass, ResourceVector, TopologyLevel};

/// Workload type. Never changes after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Long-running replicated service; restarted on application failure.
    Service,
    /// Run-to-completion batch work.
    Batch,
    /// Model training; checkpointed before eviction.
    Training,
}

impl JobType {
    /// Default priority class for the type. Services default to `High`, which keeps
    /// them out of reach of the common `Normal` preemptors.
    pub const fn default_priority(self) -> PriorityClass {
        match self {
            Self::Service => PriorityClass::High,
            Self::Batch | Self::Training => PriorityClass::Normal,
        }
    }

    /// Default preemptible flag for the type.
    pub const fn default_preemptible(self) -> bool {
        !matches!(self, Self::Service)
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service => f.write_str("service"),
            Self::Batch => f.write_str("batch"),
            Self::Training => f.write_str("training"),
        }
    }
}

/// Lifecycle status. Valid transitions live in [`crate::core::lifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Persisted, not yet handed to admission.
    Pending,
    /// Waiting for capacity.
    Queued,
    /// Holds ledger usage; substrate resource requested.
    Admitted,
    /// Substrate confirmed execution.
    Running,
    /// Completed successfully.
    Succeeded,
    /// Failed permanently.
    Failed,
    /// Cancelled by the user.
    Cancelled,
    /// Evicted to make room for higher-priority work.
    Preempted,
}

impl JobStatus {
    /// Terminal states never change again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// States in which the job holds ledger usage.
    pub const fn holds_admission(self) -> bool {
        matches!(self, Self::Admitted | Self::Running)
    }

    /// Stable uppercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Queued => "QUEUED",
            Self::Admitted => "ADMITTED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Preempted => "PREEMPTED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the submitter wants optimized when placing the job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationGoal {
    /// Prefer low-latency clusters.
    Latency,
    /// Prefer clusters with the most free capacity.
    Throughput,
    /// Prefer cheap clusters.
    Cost,
    /// No particular preference.
    #[default]
    Balanced,
}

/// Scheduling policy consumed by the admission controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPolicy {
    /// Priority class.
    pub priority: PriorityClass,
    /// Whether the job may be evicted by higher-priority work.
    pub preemptible: bool,
    /// Grace period passed to the substrate on graceful shutdown.
    pub preemption_grace_secs: u64,
    /// Namespace-scoped queue; `None` selects the tenant default pool.
    #[serde(default)]
    pub queue_name: Option<String>,
    /// Expected cohort; must match the resolved pool's cohort when set.
    #[serde(default)]
    pub cohort: Option<String>,
    /// Locality requirement for multi-GPU jobs.
    #[serde(default)]
    pub topology: Option<TopologyLevel>,
    /// Absolute deadline (ms since epoch).
    #[serde(default)]
    pub deadline_ms: Option<u128>,
    /// Maximum wall-clock runtime once running.
    #[serde(default)]
    pub max_runtime_secs: Option<u64>,
    /// Retry budget for retryable failures.
    pub max_retries: u32,
    /// Delay before a retried job is resubmitted.
    pub retry_delay_secs: u64,
    /// Minimum replicas (services only).
    #[serde(default)]
    pub min_replicas: Option<u32>,
    /// Maximum replicas (services only).
    #[serde(default)]
    pub max_replicas: Option<u32>,
    /// Compliance labels a target cluster must carry (e.g. data residency).
    #[serde(default)]
    pub required_labels: BTreeMap<String, String>,
}

impl JobPolicy {
    /// Defaults for a job type.
    pub fn for_type(job_type: JobType) -> Self {
        Self {
            priority: job_type.default_priority(),
            preemptible: job_type.default_preemptible(),
            preemption_grace_secs: 30,
            queue_name: None,
            cohort: None,
            topology: None,
            deadline_ms: None,
            max_runtime_secs: None,
            max_retries: 3,
            retry_delay_secs: 30,
            min_replicas: None,
            max_replicas: None,
            required_labels: BTreeMap::new(),
        }
    }

    /// Grace period as a duration.
    pub const fn grace_period(&self) -> Duration {
        Duration::from_secs(self.preemption_grace_secs)
    }

    /// Retry delay as a duration.
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Optimization hints consumed by the cluster selector and retry handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobIntent {
    /// Placement objective.
    #[serde(default)]
    pub optimization_goal: OptimizationGoal,
    /// Job tolerates spot capacity.
    #[serde(default)]
    pub spot_eligible: bool,
    /// Maximum acceptable hourly cost.
    #[serde(default)]
    pub budget_cap_per_hour: Option<f64>,
    /// Free-form workload class (e.g. `inference`, `etl`).
    #[serde(default)]
    pub workload_class: Option<String>,
    /// Explicit latency sensitivity.
    #[serde(default)]
    pub latency_sensitive: bool,
}

impl JobIntent {
    /// Latency fitness is scored only for latency-sensitive jobs.
    pub fn is_latency_sensitive(&self) -> bool {
        self.latency_sensitive || self.optimization_goal == OptimizationGoal::Latency
    }
}

/// Requested compute resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// GPU hardware class; `None` with a non-zero count accepts any GPU flavor.
    #[serde(default)]
    pub gpu_type: Option<String>,
    /// Number of GPUs.
    #[serde(default)]
    pub gpu_count: u32,
    /// CPU request in millicores.
    #[serde(default)]
    pub cpu_request_millis: u64,
    /// CPU limit in millicores.
    #[serde(default)]
    pub cpu_limit_millis: Option<u64>,
    /// Memory request in MiB.
    #[serde(default)]
    pub memory_request_mib: u64,
    /// Memory limit in MiB.
    #[serde(default)]
    pub memory_limit_mib: Option<u64>,
}

impl ResourceRequest {
    /// Request `count` GPUs of `gpu_type`.
    pub fn gpus(gpu_type: impl Into<String>, count: u32) -> Self {
        Self {
            gpu_type: Some(gpu_type.into()),
            gpu_count: count,
            ..Self::default()
        }
    }

    /// Request CPU and memory only.
    pub fn cpu(cpu_request_millis: u64, memory_request_mib: u64) -> Self {
        Self {
            cpu_request_millis,
            memory_request_mib,
            ..Self::default()
        }
    }

    /// Set CPU request and limit.
    #[must_use]
    pub const fn with_cpu(mut self, request_millis: u64, limit_millis: Option<u64>) -> Self {
        self.cpu_request_millis = request_millis;
        self.cpu_limit_millis = limit_millis;
        self
    }

    /// Set memory request and limit.
    #[must_use]
    pub const fn with_memory(mut self, request_mib: u64, limit_mib: Option<u64>) -> Self {
        self.memory_request_mib = request_mib;
        self.memory_limit_mib = limit_mib;
        self
    }

    /// Quantities charged against quota (requests, not limits).
    pub fn quota_vector(&self) -> ResourceVector {
        ResourceVector::new(
            u64::from(self.gpu_count),
            self.cpu_request_millis,
            self.memory_request_mib,
        )
    }

    fn validate(&self) -> Result<(), SchedulerError> {
        if self.quota_vector().is_zero() {
            return Err(SchedulerError::Validation(
                "resource request must ask for at least one resource".into(),
            ));
        }
        if self.gpu_type.is_some() && self.gpu_count == 0 {
            return Err(SchedulerError::Validation(
                "gpu_type set but gpu_count is 0".into(),
            ));
        }
        if let Some(limit) = self.cpu_limit_millis {
            if limit < self.cpu_request_millis {
                return Err(SchedulerError::Validation(format!(
                    "cpu limit {limit}m below request {}m",
                    self.cpu_request_millis
                )));
            }
        }
        if let Some(limit) = self.memory_limit_mib {
            if limit < self.memory_request_mib {
                return Err(SchedulerError::Validation(format!(
                    "memory limit {limit}Mi below request {}Mi",
                    self.memory_request_mib
                )));
            }
        }
        Ok(())
    }
}

/// Opaque origin of a job, kept for cost and audit attribution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLink {
    /// Source kind (`pipeline`, `use_case`, `direct`, ...).
    pub kind: String,
    /// Source identifier, uninterpreted.
    pub id: String,
}

/// Submission payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Human-readable name.
    pub name: String,
    /// Tenant namespace.
    pub namespace: String,
    /// Workload type.
    pub job_type: JobType,
    /// Scheduling policy.
    pub policy: JobPolicy,
    /// Optimization intent.
    #[serde(default)]
    pub intent: JobIntent,
    /// Resource request.
    pub resources: ResourceRequest,
    /// Source linkage.
    #[serde(default)]
    pub source: Option<SourceLink>,
    /// Substrate-specific workload template, passed through untouched.
    #[serde(default)]
    pub template: serde_json::Value,
}

impl JobSpec {
    /// New spec with type-default policy and intent.
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        job_type: JobType,
        resources: ResourceRequest,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            job_type,
            policy: JobPolicy::for_type(job_type),
            intent: JobIntent::default(),
            resources,
            source: None,
            template: serde_json::Value::Null,
        }
    }

    /// Replace the whole policy.
    #[must_use]
    pub fn with_policy(mut self, policy: JobPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the intent.
    #[must_use]
    pub fn with_intent(mut self, intent: JobIntent) -> Self {
        self.intent = intent;
        self
    }

    /// Set the priority class.
    #[must_use]
    pub const fn with_priority(mut self, priority: PriorityClass) -> Self {
        self.policy.priority = priority;
        self
    }

    /// Set the preemptible flag.
    #[must_use]
    pub const fn with_preemptible(mut self, preemptible: bool) -> Self {
        self.policy.preemptible = preemptible;
        self
    }

    /// Submit through a named queue.
    #[must_use]
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.policy.queue_name = Some(queue.into());
        self
    }

    /// Set retry bounds.
    #[must_use]
    pub const fn with_retries(mut self, max_retries: u32, retry_delay_secs: u64) -> Self {
        self.policy.max_retries = max_retries;
        self.policy.retry_delay_secs = retry_delay_secs;
        self
    }

    /// Require a topology level.
    #[must_use]
    pub const fn with_topology(mut self, level: TopologyLevel) -> Self {
        self.policy.topology = Some(level);
        self
    }

    /// Set an absolute deadline.
    #[must_use]
    pub const fn with_deadline_ms(mut self, deadline_ms: u128) -> Self {
        self.policy.deadline_ms = Some(deadline_ms);
        self
    }

    /// Set the maximum runtime.
    #[must_use]
    pub const fn with_max_runtime_secs(mut self, secs: u64) -> Self {
        self.policy.max_runtime_secs = Some(secs);
        self
    }

    /// Require a compliance label on the target cluster.
    #[must_use]
    pub fn with_required_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.policy.required_labels.insert(key.into(), value.into());
        self
    }

    /// Attach source linkage.
    #[must_use]
    pub fn with_source(mut self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        self.source = Some(SourceLink {
            kind: kind.into(),
            id: id.into(),
        });
        self
    }

    /// Attach a workload template.
    #[must_use]
    pub fn with_template(mut self, template: serde_json::Value) -> Self {
        self.template = template;
        self
    }

    /// Reject malformed or inconsistent specs.
    pub fn validate(&self, now_ms: u128) -> Result<(), SchedulerError> {
        if self.name.trim().is_empty() {
            return Err(SchedulerError::Validation("job name must not be empty".into()));
        }
        if self.namespace.trim().is_empty() {
            return Err(SchedulerError::Validation("namespace must not be empty".into()));
        }
        self.resources.validate()?;
        validate_policy(self.job_type, &self.policy, &self.resources, now_ms)?;
        if let Some(cap) = self.intent.budget_cap_per_hour {
            if !cap.is_finite() || cap <= 0.0 {
                return Err(SchedulerError::Validation(format!(
                    "budget cap must be a positive number, got {cap}"
                )));
            }
        }
        Ok(())
    }
}

fn validate_policy(
    job_type: JobType,
    policy: &JobPolicy,
    resources: &ResourceRequest,
    now_ms: u128,
) -> Result<(), SchedulerError> {
    if policy.min_replicas.is_some() || policy.max_replicas.is_some() {
        if job_type != JobType::Service {
            return Err(SchedulerError::Validation(
                "replica bounds are only valid for service jobs".into(),
            ));
        }
        let min = policy.min_replicas.unwrap_or(1);
        let max = policy.max_replicas.unwrap_or(min);
        if min == 0 || min > max {
            return Err(SchedulerError::Validation(format!(
                "invalid replica bounds: min={min} max={max}"
            )));
        }
    }
    if policy.topology.is_some() && resources.gpu_count == 0 {
        return Err(SchedulerError::Validation(
            "topology constraint requires a GPU request".into(),
        ));
    }
    if let Some(deadline) = policy.deadline_ms {
        if deadline <= now_ms {
            return Err(SchedulerError::Validation("deadline is in the past".into()));
        }
    }
    if policy.max_runtime_secs == Some(0) {
        return Err(SchedulerError::Validation("max runtime must be positive".into()));
    }
    Ok(())
}

/// Opaque handles into the execution substrate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstrateRefs {
    /// Handle of the execution resource.
    #[serde(default)]
    pub resource: Option<String>,
    /// Handle of the admission-tracking object.
    #[serde(default)]
    pub tracking: Option<String>,
}

/// Ledger usage held by an admitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionRecord {
    /// Cluster whose ledger holds the usage.
    pub cluster: ClusterId,
    /// Queue pool charged.
    pub pool: String,
    /// Flavor assigned.
    pub flavor: String,
    /// Total usage charged.
    pub usage: ResourceVector,
    /// Portion of `usage` above the pool's nominal quota at admission time.
    pub borrowed: ResourceVector,
    /// Admission timestamp (ms since epoch).
    pub admitted_at_ms: u128,
}

impl AdmissionRecord {
    /// True when part of the usage was borrowed from the cohort.
    pub const fn is_borrowing(&self) -> bool {
        !self.borrowed.is_zero()
    }
}

/// Relaxed topology proposed when the requested one is fragmented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyOffer {
    /// Level the user asked for.
    pub requested: TopologyLevel,
    /// Feasible looser level; `None` means no locality constraint.
    pub offered: Option<TopologyLevel>,
    /// When the offer was made.
    pub offered_at_ms: u128,
}

/// Input to [`crate::core::JobStore::create_job`].
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Validated spec.
    pub spec: JobSpec,
    /// Optional idempotency key.
    pub idempotency_key: Option<String>,
    /// Target cluster.
    pub cluster: ClusterId,
    /// Resolved queue pool.
    pub pool: String,
}

/// The atomic schedulable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique id.
    pub id: JobId,
    /// Human-readable name.
    pub name: String,
    /// Tenant namespace.
    pub namespace: String,
    /// Idempotency key, unique across the store.
    pub idempotency_key: Option<String>,
    /// Workload type.
    pub job_type: JobType,
    /// Scheduling policy.
    pub policy: JobPolicy,
    /// Optimization intent.
    pub intent: JobIntent,
    /// Resource request.
    pub resources: ResourceRequest,
    /// Workload template.
    pub template: serde_json::Value,
    /// Current status.
    pub status: JobStatus,
    /// Reason attached to the latest transition.
    pub status_message: Option<String>,
    /// Retries consumed.
    pub retry_count: u32,
    /// Checkpoint outcome of the last eviction or runtime expiry.
    pub checkpoint_saved: Option<bool>,
    /// Pending topology relaxation offer.
    pub topology_offer: Option<TopologyOffer>,
    /// Target cluster.
    pub cluster: ClusterId,
    /// Resolved queue pool.
    pub pool: String,
    /// Substrate handles.
    pub refs: SubstrateRefs,
    /// Live admission, present exactly while ledger usage is held.
    pub admission: Option<AdmissionRecord>,
    /// Source linkage.
    pub source: Option<SourceLink>,
    /// Earliest time a pending retry may be resubmitted.
    pub not_before_ms: Option<u128>,
    /// Creation time.
    pub created_at_ms: u128,
    /// Last write time.
    pub updated_at_ms: u128,
    /// Estimated start.
    pub estimated_start_ms: Option<u128>,
    /// Estimated end.
    pub estimated_end_ms: Option<u128>,
    /// Actual start.
    pub started_at_ms: Option<u128>,
    /// Actual end.
    pub finished_at_ms: Option<u128>,
    /// Write counter for compare-and-swap.
    pub version: u64,
}

impl Job {
    /// Materialize a fresh `PENDING` job.
    pub fn from_new(id: JobId, new: NewJob, now_ms: u128) -> Self {
        let NewJob {
            spec,
            idempotency_key,
            cluster,
            pool,
        } = new;
        Self {
            id,
            name: spec.name,
            namespace: spec.namespace,
            idempotency_key,
            job_type: spec.job_type,
            policy: spec.policy,
            intent: spec.intent,
            resources: spec.resources,
            template: spec.template,
            status: JobStatus::Pending,
            status_message: None,
            retry_count: 0,
            checkpoint_saved: None,
            topology_offer: None,
            cluster,
            pool,
            refs: SubstrateRefs::default(),
            admission: None,
            source: spec.source,
            not_before_ms: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            estimated_start_ms: None,
            estimated_end_ms: None,
            started_at_ms: None,
            finished_at_ms: None,
            version: 1,
        }
    }

    /// Terminal jobs never change again.
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Priority class.
    pub const fn priority(&self) -> PriorityClass {
        self.policy.priority
    }

    /// Stamp timestamps implied by entering `status`.
    pub(crate) fn stamp_status(&mut self, now_ms: u128) {
        match self.status {
            JobStatus::Admitted => {
                self.estimated_start_ms = Some(now_ms);
                self.estimated_end_ms = self
                    .policy
                    .max_runtime_secs
                    .map(|secs| after_ms(now_ms, Duration::from_secs(secs)));
            }
            JobStatus::Running => {
                self.started_at_ms = Some(now_ms);
                if let Some(secs) = self.policy.max_runtime_secs {
                    self.estimated_end_ms = Some(after_ms(now_ms, Duration::from_secs(secs)));
                }
            }
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled => {
                self.finished_at_ms = Some(now_ms);
            }
            JobStatus::Pending | JobStatus::Queued | JobStatus::Preempted => {
                self.estimated_start_ms = None;
            }
        }
    }
}

/// Non-status field changes. `Some(value)` overwrites, `None` keeps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    /// Execution resource handle.
    pub resource_ref: Option<Option<String>>,
    /// Tracking object handle.
    pub tracking_ref: Option<Option<String>>,
    /// Admission record.
    pub admission: Option<Option<AdmissionRecord>>,
    /// Retry counter.
    pub retry_count: Option<u32>,
    /// Checkpoint outcome.
    pub checkpoint_saved: Option<Option<bool>>,
    /// Retry not-before time.
    pub not_before_ms: Option<Option<u128>>,
    /// Topology offer.
    pub topology_offer: Option<Option<TopologyOffer>>,
    /// Replacement policy; only allowed while non-terminal.
    pub policy: Option<JobPolicy>,
    /// Replacement intent; only allowed while non-terminal.
    pub intent: Option<JobIntent>,
}

impl JobPatch {
    /// Empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the admission record.
    #[must_use]
    pub fn admission(mut self, record: Option<AdmissionRecord>) -> Self {
        self.admission = Some(record);
        self
    }

    /// Set the execution resource handle.
    #[must_use]
    pub fn resource_ref(mut self, handle: Option<String>) -> Self {
        self.resource_ref = Some(handle);
        self
    }

    /// Set the tracking object handle.
    #[must_use]
    pub fn tracking_ref(mut self, handle: Option<String>) -> Self {
        self.tracking_ref = Some(handle);
        self
    }

    /// Set the retry counter.
    #[must_use]
    pub const fn retry_count(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    /// Set the checkpoint outcome.
    #[must_use]
    pub const fn checkpoint_saved(mut self, saved: Option<bool>) -> Self {
        self.checkpoint_saved = Some(saved);
        self
    }

    /// Set the retry not-before time.
    #[must_use]
    pub const fn not_before_ms(mut self, at: Option<u128>) -> Self {
        self.not_before_ms = Some(at);
        self
    }

    /// Set the topology offer.
    #[must_use]
    pub const fn topology_offer(mut self, offer: Option<TopologyOffer>) -> Self {
        self.topology_offer = Some(offer);
        self
    }

    /// Replace the policy.
    #[must_use]
    pub fn policy(mut self, policy: JobPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Replace the intent.
    #[must_use]
    pub fn intent(mut self, intent: JobIntent) -> Self {
        self.intent = Some(intent);
        self
    }

    /// True when the patch rewrites policy or intent.
    pub const fn touches_spec(&self) -> bool {
        self.policy.is_some() || self.intent.is_some()
    }

    /// Apply to a job in place.
    pub fn apply(self, job: &mut Job) {
        if let Some(v) = self.resource_ref {
            job.refs.resource = v;
        }
        if let Some(v) = self.tracking_ref {
            job.refs.tracking = v;
        }
        if let Some(v) = self.admission {
            job.admission = v;
        }
        if let Some(v) = self.retry_count {
            job.retry_count = v;
        }
        if let Some(v) = self.checkpoint_saved {
            job.checkpoint_saved = v;
        }
        if let Some(v) = self.not_before_ms {
            job.not_before_ms = v;
        }
        if let Some(v) = self.topology_offer {
            job.topology_offer = v;
        }
        if let Some(v) = self.policy {
            job.policy = v;
        }
        if let Some(v) = self.intent {
            job.intent = v;
        }
    }
}
