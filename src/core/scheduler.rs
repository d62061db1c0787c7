//! Admission scheduler: submission, admission passes, eviction and failure handling.
//!
//! Every usage change happens under the owning cohort's lock together with the
//! status write that justifies it. Substrate calls run after the lock is dropped,
//! bounded by [`BackoffPolicy`]. Only public entry points start an admission pass;
//! internal helpers never do.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::{ClusterConfig, QueueingStrategy, SchedulerConfig};
use crate::core::admission::{decide, topology_fit, AdmissionDecision, AdmissionOutcome, QueueReason, TopologyFit};
use crate::core::audit::EventBus;
use crate::core::job::{
    AdmissionRecord, Job, JobIntent, JobPatch, JobPolicy, JobSpec, JobStatus, JobType, NewJob, TopologyOffer,
};
use crate::core::ledger::{Assignment, CohortUsage, ResourceLedger};
use crate::core::lifecycle::Lifecycle;
use crate::core::preemption::{Candidate, Preemptor, PriorityTable};
use crate::core::queue::{PendingEntry, PendingQueue};
use crate::core::retry::{decide_retry, FailureKind, RetryDecision};
use crate::core::selector::{select_cluster, ClusterView};
use crate::core::store::{CreateOutcome, JobFilter, JobStore, StatusUpdate};
use crate::core::substrate::{
    job_labels, with_backoff, BackoffPolicy, CapacityFeed, ClusterCapacity, ResourceTemplate, RunState, Substrate,
    SubstrateError,
};
use crate::core::SchedulerError;
use crate::util::clock::now_ms;
use crate::util::serde::{ClusterId, JobId, ResourceKind};

const MAX_CAS_ATTEMPTS: usize = 8;

/// Per-cluster scheduling state.
pub struct ClusterRuntime {
    pub(crate) config: ClusterConfig,
    pub(crate) ledger: ResourceLedger,
    pub(crate) pending: Mutex<Box<dyn PendingQueue>>,
    pub(crate) substrate: Arc<dyn Substrate>,
    pub(crate) pass_lock: tokio::sync::Mutex<()>,
}

impl ClusterRuntime {
    /// Runtime with an empty ledger built from `config`.
    pub fn new(
        config: ClusterConfig,
        substrate: Arc<dyn Substrate>,
        pending: Box<dyn PendingQueue>,
    ) -> Result<Self, SchedulerError> {
        let ledger = ResourceLedger::from_config(&config)?;
        Ok(Self {
            config,
            ledger,
            pending: Mutex::new(pending),
            substrate,
            pass_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Cluster configuration.
    pub const fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Quota ledger.
    pub const fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    /// Number of queued jobs.
    pub fn queue_depth(&self) -> usize {
        self.pending.lock().len()
    }
}

enum Next {
    Done(AdmissionOutcome),
    Evict(Vec<JobId>),
}

/// Admission controller and lifecycle driver for a set of clusters.
pub struct AdmissionScheduler {
    pub(crate) config: SchedulerConfig,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) feed: Arc<dyn CapacityFeed>,
    pub(crate) clusters: BTreeMap<ClusterId, ClusterRuntime>,
    pub(crate) priorities: PriorityTable,
    pub(crate) backoff: BackoffPolicy,
    pub(crate) checkpoint_timeout: Duration,
}

impl AdmissionScheduler {
    /// Assemble a scheduler. Prefer [`crate::builders::SchedulerBuilder`].
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn JobStore>,
        events: Arc<EventBus>,
        feed: Arc<dyn CapacityFeed>,
        clusters: BTreeMap<ClusterId, ClusterRuntime>,
    ) -> Self {
        let priorities = PriorityTable::new(config.priority_table());
        let backoff = BackoffPolicy {
            max_attempts: config.retry.substrate_attempts,
            base_delay: Duration::from_millis(config.retry.substrate_backoff_ms),
            max_delay: Duration::from_millis(config.retry.substrate_max_backoff_ms),
            call_timeout: Duration::from_millis(config.retry.substrate_call_timeout_ms),
        };
        let checkpoint_timeout = config.retry.checkpoint_timeout();
        Self {
            config,
            lifecycle: Lifecycle::new(store, events),
            feed,
            clusters,
            priorities,
            backoff,
            checkpoint_timeout,
        }
    }

    /// Scheduler configuration.
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Job store.
    pub fn store(&self) -> &Arc<dyn JobStore> {
        self.lifecycle.store()
    }

    /// Status event bus.
    pub fn events(&self) -> &Arc<EventBus> {
        self.lifecycle.events()
    }

    /// Managed cluster ids, sorted.
    pub fn cluster_ids(&self) -> Vec<ClusterId> {
        self.clusters.keys().cloned().collect()
    }

    /// Runtime of one cluster.
    pub fn runtime(&self, cluster: &str) -> Result<&ClusterRuntime, SchedulerError> {
        self.clusters
            .get(cluster)
            .ok_or_else(|| SchedulerError::UnknownCluster(cluster.to_string()))
    }

    /// Usage snapshot of every cohort in a cluster.
    pub fn pool_usage(&self, cluster: &str) -> Result<Vec<CohortUsage>, SchedulerError> {
        Ok(self.runtime(cluster)?.ledger.snapshot())
    }

    /// Fetch a job.
    pub fn get_job(&self, id: JobId) -> Result<Job, SchedulerError> {
        self.store().get(id)?.ok_or(SchedulerError::JobNotFound(id))
    }

    /// List jobs matching a filter.
    pub fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, SchedulerError> {
        self.store().list(filter)
    }

    /// Submit a job.
    ///
    /// A known idempotency key returns the existing job unchanged with no
    /// admission attempt. Otherwise the job is persisted `PENDING`, placed on a
    /// cluster, moved to `QUEUED` once its tracking object exists, and offered to
    /// an admission pass. If the tracking object cannot be created the job stays
    /// `PENDING` and the next tick retries.
    pub async fn submit(&self, spec: JobSpec, idempotency_key: Option<String>) -> Result<CreateOutcome, SchedulerError> {
        spec.validate(now_ms())?;
        if let Some(key) = idempotency_key.as_deref() {
            if let Some(job) = self.store().find_by_idempotency_key(key)? {
                tracing::debug!(job_id = %job.id, key, "idempotent resubmission");
                return Ok(CreateOutcome { job, created: false });
            }
        }

        let pool = self.resolve_pool(&spec)?;
        let cluster = self.place(&spec, &pool).await?;
        let rt = self.runtime(&cluster)?;
        self.check_pool(rt, &spec, &pool)?;

        let outcome = self.store().create_job(NewJob {
            spec,
            idempotency_key,
            cluster: cluster.clone(),
            pool,
        })?;
        if !outcome.created {
            return Ok(outcome);
        }
        let job = outcome.job;
        tracing::info!(
            job_id = %job.id,
            name = %job.name,
            namespace = %job.namespace,
            cluster = %cluster,
            pool = %job.pool,
            priority = %job.policy.priority,
            "job submitted"
        );

        let job_id = job.id;
        match self.promote(rt, job, "awaiting admission").await {
            Ok(_) | Err(SchedulerError::VersionConflict { .. }) => {}
            Err(err) => {
                tracing::warn!(%job_id, error = %err, "job left pending; tracking object not created");
            }
        }
        self.schedule_pending(&cluster).await?;
        Ok(CreateOutcome {
            job: self.get_job(job_id)?,
            created: true,
        })
    }

    fn resolve_pool(&self, spec: &JobSpec) -> Result<String, SchedulerError> {
        match &spec.policy.queue_name {
            Some(queue) => self
                .config
                .queues
                .iter()
                .find(|q| q.namespace == spec.namespace && &q.name == queue)
                .map(|q| q.pool.clone())
                .ok_or_else(|| SchedulerError::UnknownQueue {
                    namespace: spec.namespace.clone(),
                    queue: queue.clone(),
                }),
            None => self
                .config
                .default_pools
                .get(&spec.namespace)
                .or(self.config.default_pool.as_ref())
                .cloned()
                .ok_or_else(|| SchedulerError::UnknownQueue {
                    namespace: spec.namespace.clone(),
                    queue: "<default>".into(),
                }),
        }
    }

    fn check_pool(&self, rt: &ClusterRuntime, spec: &JobSpec, pool: &str) -> Result<(), SchedulerError> {
        let pool_cfg = rt
            .config
            .pool(pool)
            .ok_or_else(|| SchedulerError::UnknownPool(pool.to_string()))?;
        if let Some(expected) = &spec.policy.cohort {
            if pool_cfg.cohort.as_deref() != Some(expected.as_str()) {
                return Err(SchedulerError::Validation(format!(
                    "pool `{pool}` is not in cohort `{expected}`"
                )));
            }
        }
        let fits = rt.ledger.lock_pool(pool)?.can_ever_fit(pool, &spec.resources);
        if fits {
            Ok(())
        } else {
            Err(SchedulerError::Validation(format!(
                "request {} can never fit pool `{pool}`",
                spec.resources.quota_vector()
            )))
        }
    }

    async fn place(&self, spec: &JobSpec, pool: &str) -> Result<ClusterId, SchedulerError> {
        if self.clusters.len() == 1 {
            return self
                .clusters
                .keys()
                .next()
                .cloned()
                .ok_or_else(|| SchedulerError::NoClusterAvailable("no clusters configured".into()));
        }
        let kind = if spec.resources.gpu_count > 0 {
            ResourceKind::Gpu
        } else {
            ResourceKind::Cpu
        };
        let mut views = Vec::with_capacity(self.clusters.len());
        for (id, rt) in &self.clusters {
            let capacity = match self.feed.cluster_capacity(id).await {
                Ok(capacity) => Some(capacity),
                Err(err) => {
                    tracing::warn!(cluster = %id, error = %err, "capacity feed failed");
                    None
                }
            };
            views.push(ClusterView {
                config: &rt.config,
                capacity,
                ledger_fits: rt.ledger.has_pool(pool) && rt.ledger.can_fit_now(pool, &spec.resources),
                utilization: rt.ledger.utilization(kind),
            });
        }
        let chosen = select_cluster(&views, spec, &self.config.selector)?;
        tracing::info!(cluster = %chosen.cluster, score = chosen.total, "cluster selected");
        Ok(chosen.cluster)
    }

    /// Create the tracking object if needed and move a `PENDING` job to `QUEUED`.
    pub(crate) async fn promote(&self, rt: &ClusterRuntime, job: Job, reason: &str) -> Result<Job, SchedulerError> {
        let tracking = match job.refs.tracking.clone() {
            Some(handle) => handle,
            None => {
                let substrate = &rt.substrate;
                let labels = job_labels(job.id);
                let labels = &labels;
                let id = job.id;
                with_backoff(&self.backoff, "create_tracking", move || substrate.create_tracking(id, labels)).await?
            }
        };
        let queued = self.lifecycle.transition(
            job.id,
            StatusUpdate::to(JobStatus::Queued)
                .expect_version(job.version)
                .reason(reason)
                .patch(JobPatch::new().tracking_ref(Some(tracking)).not_before_ms(None)),
        )?;
        rt.pending.lock().enqueue(PendingEntry::from_job(&queued));
        Ok(queued)
    }

    /// Run one admission pass over the cluster's pending queue.
    ///
    /// Jobs are visited in priority-then-FIFO order. In a strict-FIFO pool the
    /// first job that stays queued blocks every later job of that pool. A job
    /// holding an unanswered topology offer does not block.
    pub async fn schedule_pending(&self, cluster: &str) -> Result<Vec<(JobId, AdmissionOutcome)>, SchedulerError> {
        let rt = self.runtime(cluster)?;
        let _pass = rt.pass_lock.lock().await;
        let capacity = match self.feed.cluster_capacity(&rt.config.id).await {
            Ok(capacity) => Some(capacity),
            Err(err) => {
                tracing::warn!(cluster, error = %err, "capacity feed failed; topology checks deferred");
                None
            }
        };
        let entries = rt.pending.lock().ordered();
        let mut blocked: HashSet<String> = HashSet::new();
        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            if blocked.contains(&entry.pool) {
                outcomes.push((entry.job_id, AdmissionOutcome::Queued(QueueReason::BlockedByHead)));
                continue;
            }
            let job = match self.store().get(entry.job_id)? {
                Some(job) if job.status == JobStatus::Queued => job,
                _ => {
                    rt.pending.lock().remove(entry.job_id);
                    continue;
                }
            };
            let outcome = if let Some(offer) = job.topology_offer {
                AdmissionOutcome::TopologyOffered(offer)
            } else {
                match self.try_admit(rt, &job, capacity.as_ref()).await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        tracing::warn!(job_id = %job.id, error = %err, "admission attempt failed");
                        AdmissionOutcome::Skipped
                    }
                }
            };
            let waiting = matches!(outcome, AdmissionOutcome::Queued(_));
            if waiting && rt.ledger.strategy(&entry.pool) == Some(QueueingStrategy::StrictFifo) {
                blocked.insert(entry.pool.clone());
            }
            outcomes.push((entry.job_id, outcome));
        }
        Ok(outcomes)
    }

    fn candidates(&self, rt: &ClusterRuntime, job: &Job) -> Result<Vec<Candidate>, SchedulerError> {
        let cohort = rt.ledger.cohort_of(&job.pool);
        Ok(self
            .store()
            .active_jobs(&rt.config.id)?
            .iter()
            .filter(|other| other.id != job.id && rt.ledger.cohort_of(&other.pool) == cohort)
            .filter_map(|other| Candidate::from_job(other, &self.priorities))
            .collect())
    }

    fn preemptor<'a>(&self, job: &'a Job) -> Preemptor<'a> {
        Preemptor {
            job_id: job.id,
            pool: &job.pool,
            resources: &job.resources,
            priority_value: self.priorities.value(job.policy.priority),
            can_preempt: self.priorities.can_preempt(job.policy.priority),
        }
    }

    async fn try_admit(
        &self,
        rt: &ClusterRuntime,
        job: &Job,
        capacity: Option<&ClusterCapacity>,
    ) -> Result<AdmissionOutcome, SchedulerError> {
        let candidates = self.candidates(rt, job)?;
        let who = self.preemptor(job);
        let next = {
            let mut cohort = rt.ledger.lock_pool(&job.pool)?;
            match decide(&cohort, &who, &candidates, true) {
                AdmissionDecision::Admit(assignment) => match self.topology_gate(job, &assignment.flavor, capacity)? {
                    Some(outcome) => Next::Done(outcome),
                    None => Next::Done(self.commit_locked(&mut cohort, job, &assignment)?),
                },
                AdmissionDecision::Preempt { assignment, victims } => {
                    match self.topology_gate(job, &assignment.flavor, capacity)? {
                        Some(outcome) => Next::Done(outcome),
                        None => Next::Evict(victims),
                    }
                }
                AdmissionDecision::Queue(reason) => Next::Done(AdmissionOutcome::Queued(reason)),
            }
        };
        let outcome = match next {
            Next::Done(outcome) => outcome,
            Next::Evict(victims) => self.preempt_for(rt, job, &victims, capacity).await?,
        };
        match &outcome {
            AdmissionOutcome::Queued(reason) => {
                tracing::debug!(job_id = %job.id, pool = %job.pool, reason = reason.message(), "job stays queued");
            }
            AdmissionOutcome::Admitted(_) => {
                rt.pending.lock().remove(job.id);
                self.launch(rt, job.id).await?;
            }
            AdmissionOutcome::Failed(_) => {
                rt.pending.lock().remove(job.id);
                self.cleanup_substrate(rt, job, true).await;
            }
            AdmissionOutcome::TopologyOffered(_) | AdmissionOutcome::Skipped => {}
        }
        Ok(outcome)
    }

    async fn preempt_for(
        &self,
        rt: &ClusterRuntime,
        job: &Job,
        victims: &[JobId],
        capacity: Option<&ClusterCapacity>,
    ) -> Result<AdmissionOutcome, SchedulerError> {
        tracing::info!(
            job_id = %job.id,
            priority = %job.policy.priority,
            victims = victims.len(),
            "preempting to admit job"
        );
        let reason = format!("preempted by job {}", job.id);
        for victim in victims {
            if let Err(err) = self.evict(rt, *victim, &reason).await {
                tracing::warn!(job_id = %victim, error = %err, "eviction failed");
            }
        }
        let fresh = match self.store().get(job.id)? {
            Some(fresh) if fresh.status == JobStatus::Queued => fresh,
            _ => return Ok(AdmissionOutcome::Skipped),
        };
        let who = self.preemptor(&fresh);
        let mut cohort = rt.ledger.lock_pool(&fresh.pool)?;
        match decide(&cohort, &who, &[], false) {
            AdmissionDecision::Admit(assignment) => match self.topology_gate(&fresh, &assignment.flavor, capacity)? {
                Some(outcome) => Ok(outcome),
                None => self.commit_locked(&mut cohort, &fresh, &assignment),
            },
            _ => Ok(AdmissionOutcome::Queued(QueueReason::PreemptionInfeasible)),
        }
    }

    /// Physical placement check for a topology-constrained job on `flavor`.
    ///
    /// `None` means the job may proceed. Otherwise the returned outcome has been
    /// applied: an offer recorded on the job, or the job failed. Runs before any
    /// eviction; the capacity snapshot predates eviction, so a fit stays a fit.
    fn topology_gate(
        &self,
        job: &Job,
        flavor: &str,
        capacity: Option<&ClusterCapacity>,
    ) -> Result<Option<AdmissionOutcome>, SchedulerError> {
        let Some(level) = job.policy.topology else {
            return Ok(None);
        };
        let now = now_ms();
        let gpus = u64::from(job.resources.gpu_count);
        match topology_fit(level, gpus, capacity.and_then(|c| c.flavor(flavor))) {
            TopologyFit::Fits => Ok(None),
            TopologyFit::Unknown => Ok(Some(AdmissionOutcome::Queued(QueueReason::CapacityUnknown))),
            TopologyFit::Insufficient => Ok(Some(AdmissionOutcome::Queued(QueueReason::CapacityPressure))),
            TopologyFit::Relaxed(offered) => {
                let offer = TopologyOffer {
                    requested: level,
                    offered,
                    offered_at_ms: now,
                };
                self.store().patch(
                    job.id,
                    Some(job.version),
                    JobPatch::new().topology_offer(Some(offer)),
                )?;
                tracing::info!(job_id = %job.id, requested = %level, ?offered, "topology relaxation offered");
                Ok(Some(AdmissionOutcome::TopologyOffered(offer)))
            }
            TopologyFit::Infeasible => {
                let reason = FailureKind::TopologyInfeasible(level).to_string();
                self.lifecycle.transition(
                    job.id,
                    StatusUpdate::to(JobStatus::Failed)
                        .expect_version(job.version)
                        .reason(reason.clone()),
                )?;
                tracing::warn!(job_id = %job.id, requested = %level, "topology infeasible");
                Ok(Some(AdmissionOutcome::Failed(reason)))
            }
        }
    }

    /// Charge usage and write `ADMITTED`. Caller holds the cohort lock.
    fn commit_locked(
        &self,
        cohort: &mut CohortUsage,
        job: &Job,
        assignment: &Assignment,
    ) -> Result<AdmissionOutcome, SchedulerError> {
        let now = now_ms();
        let record = AdmissionRecord {
            cluster: job.cluster.clone(),
            pool: assignment.pool.clone(),
            flavor: assignment.flavor.clone(),
            usage: assignment.usage,
            borrowed: assignment.borrowed,
            admitted_at_ms: now,
        };
        let message = if record.is_borrowing() {
            format!("admitted to {}/{} borrowing {}", record.pool, record.flavor, record.borrowed)
        } else {
            format!("admitted to {}/{}", record.pool, record.flavor)
        };
        cohort.charge(&record.pool, &record.flavor, &record.usage)?;
        let written = self.lifecycle.transition(
            job.id,
            StatusUpdate::to(JobStatus::Admitted)
                .expect_version(job.version)
                .reason(message)
                .patch(JobPatch::new().admission(Some(record.clone()))),
        );
        match written {
            Ok(_) => {
                tracing::info!(
                    job_id = %job.id,
                    pool = %record.pool,
                    flavor = %record.flavor,
                    usage = %record.usage,
                    borrowed = %record.borrowed,
                    "job admitted"
                );
                Ok(AdmissionOutcome::Admitted(record))
            }
            Err(SchedulerError::VersionConflict { .. }) => {
                cohort.release_record(&record)?;
                Ok(AdmissionOutcome::Skipped)
            }
            Err(err) => {
                cohort.release_record(&record)?;
                Err(err)
            }
        }
    }

    /// Mark tracking admitted and create the execution resource of an admitted job.
    pub(crate) async fn launch(&self, rt: &ClusterRuntime, id: JobId) -> Result<(), SchedulerError> {
        let Some(job) = self.store().get(id)? else {
            return Ok(());
        };
        let Some(record) = job.admission.clone() else {
            return Ok(());
        };
        if job.status != JobStatus::Admitted {
            return Ok(());
        }
        let substrate = &rt.substrate;
        let flavor = record.flavor.as_str();
        if let Some(handle) = job.refs.tracking.as_deref() {
            self.best_effort(id, "set_tracking_admitted", move || {
                substrate.set_tracking_admitted(handle, flavor)
            })
            .await;
        }
        let template = ResourceTemplate::for_job(&job, flavor);
        let template = &template;
        match with_backoff(&self.backoff, "create_resource", move || substrate.create_resource(template)).await {
            Ok(handle) => {
                self.store()
                    .patch(id, None, JobPatch::new().resource_ref(Some(handle)))?;
                Ok(())
            }
            Err(err) => {
                tracing::error!(job_id = %id, error = %err, "resource creation exhausted retries");
                self.handle_failure(rt, id, FailureKind::SubstrateUnavailable).await?;
                Ok(())
            }
        }
    }

    pub(crate) async fn checkpoint(&self, rt: &ClusterRuntime, job: &Job) -> bool {
        let Some(handle) = job.refs.resource.as_deref() else {
            return false;
        };
        match tokio::time::timeout(self.checkpoint_timeout, rt.substrate.request_checkpoint(handle)).await {
            Ok(Ok(())) => {
                tracing::info!(job_id = %job.id, "checkpoint saved");
                true
            }
            Ok(Err(err)) => {
                tracing::warn!(job_id = %job.id, error = %err, "checkpoint failed");
                false
            }
            Err(_) => {
                tracing::warn!(job_id = %job.id, timeout = ?self.checkpoint_timeout, "checkpoint timed out");
                false
            }
        }
    }

    /// Evict an admitted job: checkpoint (training), delete the resource with the
    /// grace period, release usage through `PREEMPTED`, and requeue. Retry budget
    /// is untouched.
    pub(crate) async fn evict(&self, rt: &ClusterRuntime, id: JobId, reason: &str) -> Result<bool, SchedulerError> {
        let Some(job) = self.store().get(id)? else {
            return Ok(false);
        };
        if !job.status.holds_admission() {
            return Ok(false);
        }
        let checkpoint_saved = if job.job_type == JobType::Training {
            Some(self.checkpoint(rt, &job).await)
        } else {
            None
        };
        if let Some(handle) = job.refs.resource.as_deref() {
            let substrate = &rt.substrate;
            let grace = job.policy.grace_period();
            self.best_effort(id, "delete_resource", move || substrate.delete_resource(handle, grace))
                .await;
        }
        tracing::info!(job_id = %id, ?checkpoint_saved, reason, "job evicted");
        Ok(self.release_and_requeue(rt, id, reason, checkpoint_saved).await?.is_some())
    }

    /// Move an admission-holding job through `PREEMPTED` back to `QUEUED`.
    pub(crate) async fn release_and_requeue(
        &self,
        rt: &ClusterRuntime,
        id: JobId,
        reason: &str,
        checkpoint_saved: Option<bool>,
    ) -> Result<Option<Job>, SchedulerError> {
        let preempted = {
            let Some(job) = self.store().get(id)? else {
                return Ok(None);
            };
            let mut cohort = rt.ledger.lock_pool(&job.pool)?;
            let current = self.get_job(id)?;
            if !current.status.holds_admission() {
                return Ok(None);
            }
            let preempted = self.lifecycle.transition(
                id,
                StatusUpdate::to(JobStatus::Preempted)
                    .expect_version(current.version)
                    .reason(reason)
                    .patch(
                        JobPatch::new()
                            .admission(None)
                            .resource_ref(None)
                            .checkpoint_saved(checkpoint_saved),
                    ),
            )?;
            if let Some(record) = &current.admission {
                cohort.release_record(record)?;
            }
            preempted
        };
        if let Some(handle) = preempted.refs.tracking.as_deref() {
            let substrate = &rt.substrate;
            self.best_effort(id, "evict_tracking", move || substrate.evict_tracking(handle))
                .await;
        }
        self.requeue(rt, &preempted).map(Some)
    }

    /// `PREEMPTED -> QUEUED`, keeping the original submission time.
    pub(crate) fn requeue(&self, rt: &ClusterRuntime, job: &Job) -> Result<Job, SchedulerError> {
        let queued = self.lifecycle.transition(
            job.id,
            StatusUpdate::to(JobStatus::Queued)
                .expect_version(job.version)
                .reason("requeued after preemption"),
        )?;
        rt.pending.lock().enqueue(PendingEntry::from_job(&queued));
        Ok(queued)
    }

    /// Apply the retry policy to a failed job and release its usage.
    pub(crate) async fn handle_failure(
        &self,
        rt: &ClusterRuntime,
        id: JobId,
        kind: FailureKind,
    ) -> Result<Job, SchedulerError> {
        self.handle_failure_with(rt, id, kind, None).await
    }

    pub(crate) async fn handle_failure_with(
        &self,
        rt: &ClusterRuntime,
        id: JobId,
        kind: FailureKind,
        checkpoint_saved: Option<bool>,
    ) -> Result<Job, SchedulerError> {
        let (previous, updated, retried) = {
            let Some(job) = self.store().get(id)? else {
                return Err(SchedulerError::JobNotFound(id));
            };
            if job.is_terminal() {
                return Ok(job);
            }
            let mut cohort = rt.ledger.lock_pool(&job.pool)?;
            let current = self.get_job(id)?;
            let decision = if current.status.holds_admission() {
                decide_retry(&current, &kind, now_ms())
            } else {
                RetryDecision::Fail {
                    reason: kind.to_string(),
                }
            };
            let retried = matches!(decision, RetryDecision::Retry { .. });
            let update = match decision {
                RetryDecision::Retry { attempt, not_before_ms } => {
                    tracing::info!(job_id = %id, attempt, max = current.policy.max_retries, failure = %kind, "retrying job");
                    StatusUpdate::to(JobStatus::Pending)
                        .reason(format!("{kind}; retry {attempt} of {}", current.policy.max_retries))
                        .patch(
                            JobPatch::new()
                                .admission(None)
                                .resource_ref(None)
                                .retry_count(attempt)
                                .not_before_ms(Some(not_before_ms)),
                        )
                }
                RetryDecision::Fail { reason } => {
                    tracing::warn!(job_id = %id, %reason, "job failed");
                    let mut patch = JobPatch::new().admission(None);
                    if checkpoint_saved.is_some() {
                        patch = patch.checkpoint_saved(checkpoint_saved);
                    }
                    StatusUpdate::to(JobStatus::Failed).reason(reason).patch(patch)
                }
            };
            let updated = self
                .lifecycle
                .transition(id, update.expect_version(current.version))?;
            if let Some(record) = &current.admission {
                cohort.release_record(record)?;
            }
            (current, updated, retried)
        };
        rt.pending.lock().remove(id);
        if let Some(handle) = previous.refs.resource.as_deref() {
            let substrate = &rt.substrate;
            self.best_effort(id, "delete_resource", move || substrate.delete_resource(handle, Duration::ZERO))
                .await;
        }
        if let Some(handle) = previous.refs.tracking.as_deref() {
            let substrate = &rt.substrate;
            if retried {
                self.best_effort(id, "evict_tracking", move || substrate.evict_tracking(handle))
                    .await;
            } else {
                self.best_effort(id, "delete_tracking", move || substrate.delete_tracking(handle))
                    .await;
            }
        }
        Ok(updated)
    }

    /// Delete the substrate objects of a job that left the scheduler's care.
    pub(crate) async fn cleanup_substrate(&self, rt: &ClusterRuntime, job: &Job, tracking: bool) {
        let substrate = &rt.substrate;
        if let Some(handle) = job.refs.resource.as_deref() {
            let grace = job.policy.grace_period();
            self.best_effort(job.id, "delete_resource", move || substrate.delete_resource(handle, grace))
                .await;
        }
        if tracking {
            if let Some(handle) = job.refs.tracking.as_deref() {
                self.best_effort(job.id, "delete_tracking", move || substrate.delete_tracking(handle))
                    .await;
            }
        }
    }

    pub(crate) async fn best_effort<F, Fut>(&self, job_id: JobId, operation: &str, call: F)
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<(), SubstrateError>> + Send,
    {
        if let Err(err) = with_backoff(&self.backoff, operation, call).await {
            tracing::warn!(%job_id, operation, error = %err, "substrate call abandoned; reconciler will retry");
        }
    }

    /// Apply a substrate run state to a job. Returns the job after any change.
    pub(crate) async fn apply_run_state(
        &self,
        rt: &ClusterRuntime,
        job: Job,
        state: RunState,
    ) -> Result<Job, SchedulerError> {
        match state {
            RunState::Pending => Ok(job),
            RunState::Running if job.status == JobStatus::Admitted => self.lifecycle.transition(
                job.id,
                StatusUpdate::to(JobStatus::Running)
                    .expect_version(job.version)
                    .reason("running"),
            ),
            RunState::Running => Ok(job),
            RunState::Succeeded => self.complete(rt, job).await,
            RunState::Failed(cause) => {
                if !job.status.holds_admission() {
                    return Ok(job);
                }
                self.handle_failure(rt, job.id, FailureKind::from_cause(&cause)).await
            }
        }
    }

    async fn complete(&self, rt: &ClusterRuntime, job: Job) -> Result<Job, SchedulerError> {
        if !job.status.holds_admission() {
            return Ok(job);
        }
        let job = if job.status == JobStatus::Admitted {
            self.lifecycle.transition(
                job.id,
                StatusUpdate::to(JobStatus::Running)
                    .expect_version(job.version)
                    .reason("running"),
            )?
        } else {
            job
        };
        let done = {
            let mut cohort = rt.ledger.lock_pool(&job.pool)?;
            let done = self.lifecycle.transition(
                job.id,
                StatusUpdate::to(JobStatus::Succeeded)
                    .expect_version(job.version)
                    .reason("completed")
                    .patch(JobPatch::new().admission(None)),
            )?;
            if let Some(record) = &job.admission {
                cohort.release_record(record)?;
            }
            done
        };
        tracing::info!(job_id = %job.id, "job succeeded");
        self.cleanup_substrate(rt, &job, true).await;
        Ok(done)
    }

    /// Feed a substrate status report for a job, then run an admission pass.
    pub async fn on_substrate_status(&self, id: JobId, state: RunState) -> Result<Job, SchedulerError> {
        let job = self.get_job(id)?;
        let rt = self.runtime(&job.cluster)?;
        let cluster = job.cluster.clone();
        let updated = self.apply_run_state(rt, job, state).await?;
        self.schedule_pending(&cluster).await?;
        Ok(updated)
    }

    /// Cancel a non-terminal job, releasing its usage under the cohort lock.
    pub async fn cancel_job(&self, id: JobId) -> Result<Job, SchedulerError> {
        let mut last_err = None;
        for _ in 0..MAX_CAS_ATTEMPTS {
            let job = self.get_job(id)?;
            if job.is_terminal() {
                return Err(SchedulerError::InvalidTransition {
                    job_id: id,
                    from: job.status,
                    to: JobStatus::Cancelled,
                });
            }
            let rt = self.runtime(&job.cluster)?;
            let written = {
                let mut cohort = rt.ledger.lock_pool(&job.pool)?;
                let written = self.lifecycle.transition(
                    id,
                    StatusUpdate::to(JobStatus::Cancelled)
                        .expect_version(job.version)
                        .reason("cancelled by user")
                        .patch(JobPatch::new().admission(None)),
                );
                if written.is_ok() {
                    if let Some(record) = &job.admission {
                        cohort.release_record(record)?;
                    }
                }
                written
            };
            match written {
                Ok(cancelled) => {
                    tracing::info!(job_id = %id, from = %job.status, "job cancelled");
                    rt.pending.lock().remove(id);
                    self.cleanup_substrate(rt, &job, true).await;
                    self.schedule_pending(&job.cluster).await?;
                    return Ok(cancelled);
                }
                Err(err @ SchedulerError::VersionConflict { .. }) => last_err = Some(err),
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or(SchedulerError::JobNotFound(id)))
    }

    /// Accept a pending topology offer: adopt the offered level and retry admission.
    pub async fn accept_topology_offer(&self, id: JobId) -> Result<Job, SchedulerError> {
        let job = self.get_job(id)?;
        if job.is_terminal() {
            return Err(SchedulerError::JobTerminal(id));
        }
        let offer = job.topology_offer.ok_or(SchedulerError::NoTopologyOffer(id))?;
        let mut policy = job.policy.clone();
        policy.topology = offer.offered;
        self.store().patch(
            id,
            Some(job.version),
            JobPatch::new().policy(policy).topology_offer(None),
        )?;
        tracing::info!(job_id = %id, offered = ?offer.offered, "topology offer accepted");
        self.schedule_pending(&job.cluster).await?;
        self.get_job(id)
    }

    /// Replace a non-terminal job's policy and, optionally, its intent.
    ///
    /// The queue and cohort are fixed at submission; a policy naming a different
    /// one is rejected.
    pub async fn update_policy(
        &self,
        id: JobId,
        policy: JobPolicy,
        intent: Option<JobIntent>,
    ) -> Result<Job, SchedulerError> {
        let job = self.get_job(id)?;
        if job.is_terminal() {
            return Err(SchedulerError::JobTerminal(id));
        }
        if policy.queue_name != job.policy.queue_name || policy.cohort != job.policy.cohort {
            return Err(SchedulerError::Validation(format!(
                "job {id} is bound to pool `{}`; cancel and resubmit to change its queue or cohort",
                job.pool
            )));
        }
        let candidate = JobSpec {
            name: job.name.clone(),
            namespace: job.namespace.clone(),
            job_type: job.job_type,
            policy: policy.clone(),
            intent: intent.clone().unwrap_or_else(|| job.intent.clone()),
            resources: job.resources.clone(),
            source: job.source.clone(),
            template: serde_json::Value::Null,
        };
        candidate.validate(now_ms())?;
        let mut patch = JobPatch::new().policy(policy);
        if let Some(intent) = intent {
            patch = patch.intent(intent);
        }
        let updated = self.store().patch(id, Some(job.version), patch)?;
        let rt = self.runtime(&updated.cluster)?;
        {
            let mut pending = rt.pending.lock();
            if pending.remove(id).is_some() {
                pending.enqueue(PendingEntry::from_job(&updated));
            }
        }
        tracing::info!(job_id = %id, priority = %updated.policy.priority, "policy updated");
        self.schedule_pending(&updated.cluster).await?;
        self.get_job(id)
    }

    /// Resubmit due retries and run an admission pass on every cluster.
    /// Returns the number of jobs admitted.
    pub async fn tick(&self) -> Result<usize, SchedulerError> {
        let mut admitted = 0;
        for id in self.clusters.keys() {
            admitted += self.tick_cluster(id).await?;
        }
        Ok(admitted)
    }

    /// One control-loop tick for a single cluster; returns the number admitted.
    pub async fn tick_cluster(&self, cluster: &str) -> Result<usize, SchedulerError> {
        let rt = self.runtime(cluster)?;
        self.promote_due(rt, now_ms()).await?;
        Ok(self
            .schedule_pending(cluster)
            .await?
            .iter()
            .filter(|(_, outcome)| matches!(outcome, AdmissionOutcome::Admitted(_)))
            .count())
    }

    /// Promote `PENDING` jobs whose retry delay has passed.
    pub(crate) async fn promote_due(&self, rt: &ClusterRuntime, now: u128) -> Result<usize, SchedulerError> {
        let due = self
            .store()
            .list(&JobFilter::new().cluster(rt.config.id.clone()).status(JobStatus::Pending))?;
        let mut promoted = 0;
        for job in due {
            if job.not_before_ms.is_some_and(|at| at > now) {
                continue;
            }
            let job_id = job.id;
            match self.promote(rt, job, "retry due").await {
                Ok(_) => promoted += 1,
                Err(SchedulerError::VersionConflict { .. }) => {}
                Err(err) => tracing::warn!(%job_id, error = %err, "could not promote pending job"),
            }
        }
        Ok(promoted)
    }
}
