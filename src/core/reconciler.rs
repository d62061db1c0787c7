//! Drift repair between the job store, the ledger and the substrate.
//!
//! A full pass rebuilds ledger usage and the pending queue from admission
//! records, then runs the per-job pass and the orphan sweep. The incremental
//! pass skips the rebuild and also purges terminal jobs past retention. Both are
//! idempotent: a second pass over an unchanged world writes nothing.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::core::job::{Job, JobPatch, JobStatus, JobType};
use crate::core::queue::PendingEntry;
use crate::core::retry::FailureKind;
use crate::core::scheduler::{AdmissionScheduler, ClusterRuntime};
use crate::core::substrate::{
    job_labels, managed_selector, with_backoff, ObjectKind, ResourceTemplate, RunState, TrackingState,
};
use crate::core::SchedulerError;
use crate::util::clock::{after_ms, now_ms};
use crate::util::serde::{ClusterId, JobId};

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Cluster reconciled.
    pub cluster: ClusterId,
    /// Non-terminal jobs examined.
    pub examined: usize,
    /// Status corrected from substrate state.
    pub synced: usize,
    /// Jobs put back on the pending queue.
    pub requeued: usize,
    /// Substrate objects recreated.
    pub recreated: usize,
    /// Jobs failed (missing resources, deadlines, max runtime).
    pub failed: usize,
    /// Jobs skipped because a concurrent write won.
    pub conflicts: usize,
    /// Jobs whose repair errored.
    pub errors: usize,
    /// Orphaned substrate objects deleted.
    pub orphans_deleted: usize,
    /// Terminal jobs purged.
    pub purged: usize,
}

impl ReconcileReport {
    fn new(cluster: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
            ..Self::default()
        }
    }

    fn record(&mut self, job_id: JobId, result: Result<Repair, SchedulerError>) {
        match result {
            Ok(Repair::Unchanged) => {}
            Ok(Repair::Synced) => self.synced += 1,
            Ok(Repair::Requeued) => self.requeued += 1,
            Ok(Repair::Recreated) => self.recreated += 1,
            Ok(Repair::Failed) => self.failed += 1,
            Err(SchedulerError::VersionConflict { .. }) => self.conflicts += 1,
            Err(err) => {
                tracing::warn!(%job_id, error = %err, "reconcile failed for job");
                self.errors += 1;
            }
        }
    }

    /// True when the pass changed nothing.
    pub const fn is_clean(&self) -> bool {
        self.synced == 0
            && self.requeued == 0
            && self.recreated == 0
            && self.failed == 0
            && self.orphans_deleted == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Repair {
    Unchanged,
    Synced,
    Requeued,
    Recreated,
    Failed,
}

impl AdmissionScheduler {
    /// Full pass: rebuild usage and queue from the store, repair every job,
    /// sweep orphans, then run an admission pass.
    ///
    /// Holds the cluster's admission pass lock until the admission pass, and
    /// every cohort lock while usage is rebuilt.
    pub async fn reconcile_full(&self, cluster: &str) -> Result<ReconcileReport, SchedulerError> {
        let rt = self.runtime(cluster)?;
        let report = {
            let _pass = rt.pass_lock.lock().await;
            let restored = self.rebuild(rt)?;
            tracing::info!(cluster, jobs = restored, "ledger and pending queue rebuilt");
            self.repair(rt).await?
        };
        self.schedule_pending(cluster).await?;
        Ok(report)
    }

    /// Incremental pass: enforce time limits, repair drift, sweep orphans and
    /// purge expired terminal jobs.
    pub async fn reconcile_incremental(&self, cluster: &str) -> Result<ReconcileReport, SchedulerError> {
        let rt = self.runtime(cluster)?;
        let mut report = {
            let _pass = rt.pass_lock.lock().await;
            self.repair(rt).await?
        };
        let retention = self.config.reconciler.retention();
        let cutoff = now_ms().saturating_sub(retention.as_millis());
        report.purged = self.store().purge_terminal(cutoff)?;
        self.schedule_pending(cluster).await?;
        Ok(report)
    }

    /// Cluster came back after a disconnect: rebuild from scratch.
    pub async fn reconnect(&self, cluster: &str) -> Result<ReconcileReport, SchedulerError> {
        tracing::info!(cluster, "cluster reconnected; running full reconciliation");
        self.reconcile_full(cluster).await
    }

    /// Recharge usage from admission records and refill the pending queue.
    fn rebuild(&self, rt: &ClusterRuntime) -> Result<usize, SchedulerError> {
        let mut ledger = rt.ledger.lock_all();
        let jobs = self.store().active_jobs(&rt.config.id)?;
        ledger.reset();
        let mut pending = rt.pending.lock();
        pending.clear();
        for job in &jobs {
            if let (true, Some(record)) = (job.status.holds_admission(), &job.admission) {
                if let Err(err) = ledger.charge(record) {
                    tracing::warn!(job_id = %job.id, error = %err, "could not restore admission usage");
                }
            }
            if job.status == JobStatus::Queued {
                pending.enqueue(PendingEntry::from_job(job));
            }
        }
        Ok(jobs.len())
    }

    /// Per-job pass and orphan sweep. Caller holds the cluster's pass lock, so
    /// no admission is half-launched while jobs are read.
    async fn repair(&self, rt: &ClusterRuntime) -> Result<ReconcileReport, SchedulerError> {
        let jobs = self.store().active_jobs(&rt.config.id)?;
        let mut report = ReconcileReport::new(&rt.config.id);
        report.examined = jobs.len();
        let now = now_ms();
        let concurrency = self.config.reconciler.effective_concurrency();
        let results: Vec<(JobId, Result<Repair, SchedulerError>)> = stream::iter(jobs)
            .map(|job| async move {
                let id = job.id;
                (id, self.reconcile_job(rt, job, now).await)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        for (job_id, result) in results {
            report.record(job_id, result);
        }
        match self.sweep_orphans(rt).await {
            Ok(deleted) => report.orphans_deleted = deleted,
            Err(err) => {
                tracing::warn!(cluster = %rt.config.id, error = %err, "orphan sweep failed");
                report.errors += 1;
            }
        }
        tracing::info!(
            cluster = %report.cluster,
            examined = report.examined,
            synced = report.synced,
            requeued = report.requeued,
            recreated = report.recreated,
            failed = report.failed,
            orphans = report.orphans_deleted,
            "reconciliation pass finished"
        );
        Ok(report)
    }

    async fn reconcile_job(&self, rt: &ClusterRuntime, job: Job, now: u128) -> Result<Repair, SchedulerError> {
        if let Some(kind) = time_limit_exceeded(&job, now) {
            return self.expire(rt, job, kind).await;
        }
        match job.status {
            JobStatus::Pending => {
                if job.not_before_ms.is_some_and(|at| at > now) {
                    return Ok(Repair::Unchanged);
                }
                self.promote(rt, job, "resubmitted by reconciler").await?;
                Ok(Repair::Requeued)
            }
            JobStatus::Preempted => {
                self.requeue(rt, &job)?;
                Ok(Repair::Requeued)
            }
            JobStatus::Queued => self.reconcile_queued(rt, job).await,
            JobStatus::Admitted | JobStatus::Running => self.reconcile_admitted(rt, job).await,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled => Ok(Repair::Unchanged),
        }
    }

    async fn expire(&self, rt: &ClusterRuntime, job: Job, kind: FailureKind) -> Result<Repair, SchedulerError> {
        if job.status == JobStatus::Preempted {
            self.requeue(rt, &job)?;
            return Ok(Repair::Requeued);
        }
        let checkpoint_saved = if job.job_type == JobType::Training && job.status == JobStatus::Running {
            Some(self.checkpoint(rt, &job).await)
        } else {
            None
        };
        tracing::warn!(job_id = %job.id, failure = %kind, ?checkpoint_saved, "time limit exceeded");
        self.handle_failure_with(rt, job.id, kind, checkpoint_saved).await?;
        Ok(Repair::Failed)
    }

    async fn reconcile_queued(&self, rt: &ClusterRuntime, job: Job) -> Result<Repair, SchedulerError> {
        let substrate = &rt.substrate;
        let Some(handle) = job.refs.tracking.as_deref() else {
            let labels = job_labels(job.id);
            let labels = &labels;
            let id = job.id;
            let created =
                with_backoff(&self.backoff, "create_tracking", move || substrate.create_tracking(id, labels)).await?;
            self.store()
                .patch(job.id, Some(job.version), JobPatch::new().tracking_ref(Some(created)))?;
            return Ok(Repair::Recreated);
        };
        let state = with_backoff(&self.backoff, "tracking_state", move || substrate.tracking_state(handle)).await?;
        if state.is_none() {
            self.handle_failure(rt, job.id, FailureKind::ResourceMissingExternally).await?;
            return Ok(Repair::Failed);
        }
        if rt.pending.lock().enqueue(PendingEntry::from_job(&job)) {
            return Ok(Repair::Requeued);
        }
        Ok(Repair::Unchanged)
    }

    async fn reconcile_admitted(&self, rt: &ClusterRuntime, job: Job) -> Result<Repair, SchedulerError> {
        let substrate = &rt.substrate;
        let tracking = match job.refs.tracking.as_deref() {
            Some(handle) => {
                with_backoff(&self.backoff, "tracking_state", move || substrate.tracking_state(handle)).await?
            }
            None => None,
        };
        let resource = match job.refs.resource.as_deref() {
            Some(handle) => {
                with_backoff(&self.backoff, "resource_status", move || substrate.resource_status(handle)).await?
            }
            None => None,
        };
        let Some(record) = job.admission.clone() else {
            return Err(SchedulerError::Backend(format!(
                "job {} is {} without an admission record",
                job.id, job.status
            )));
        };

        match (tracking, resource) {
            (None, None) => {
                self.handle_failure(rt, job.id, FailureKind::ResourceMissingExternally).await?;
                Ok(Repair::Failed)
            }
            (Some(TrackingState::NotAdmitted | TrackingState::Evicted), _) => {
                self.cleanup_substrate(rt, &job, false).await;
                self.release_and_requeue(rt, job.id, "admission revoked by substrate", None)
                    .await?;
                Ok(Repair::Requeued)
            }
            (Some(TrackingState::Admitted), None) => {
                let template = ResourceTemplate::for_job(&job, &record.flavor);
                let template = &template;
                let handle =
                    with_backoff(&self.backoff, "create_resource", move || substrate.create_resource(template))
                        .await?;
                if job.refs.resource.as_deref() != Some(handle.as_str()) {
                    self.store()
                        .patch(job.id, Some(job.version), JobPatch::new().resource_ref(Some(handle)))?;
                }
                tracing::info!(job_id = %job.id, "execution resource recreated");
                Ok(Repair::Recreated)
            }
            (None, Some(state)) => {
                let id = job.id;
                let labels = job_labels(id);
                let labels = &labels;
                let handle =
                    with_backoff(&self.backoff, "create_tracking", move || substrate.create_tracking(id, labels))
                        .await?;
                let flavor = record.flavor.as_str();
                let tracking = handle.as_str();
                with_backoff(&self.backoff, "set_tracking_admitted", move || {
                    substrate.set_tracking_admitted(tracking, flavor)
                })
                .await?;
                let job = self
                    .store()
                    .patch(id, Some(job.version), JobPatch::new().tracking_ref(Some(handle.clone())))?;
                tracing::info!(job_id = %id, "tracking object recreated");
                self.sync_run_state(rt, job, state).await?;
                Ok(Repair::Recreated)
            }
            (Some(TrackingState::Admitted), Some(state)) => self.sync_run_state(rt, job, state).await,
        }
    }

    async fn sync_run_state(&self, rt: &ClusterRuntime, job: Job, state: RunState) -> Result<Repair, SchedulerError> {
        let changes = match &state {
            RunState::Pending => false,
            RunState::Running => job.status == JobStatus::Admitted,
            RunState::Succeeded | RunState::Failed(_) => true,
        };
        if !changes {
            return Ok(Repair::Unchanged);
        }
        let failed = matches!(state, RunState::Failed(_));
        self.apply_run_state(rt, job, state).await?;
        Ok(if failed { Repair::Failed } else { Repair::Synced })
    }

    /// Delete managed objects whose job is unknown, terminal, or no longer owns them.
    async fn sweep_orphans(&self, rt: &ClusterRuntime) -> Result<usize, SchedulerError> {
        let substrate = &rt.substrate;
        let selector = managed_selector();
        let selector = &selector;
        let objects = with_backoff(&self.backoff, "list_managed", move || substrate.list_managed(selector)).await?;
        let mut deleted = 0;
        for object in objects {
            let Some(job_id) = object.job_id() else {
                continue;
            };
            let owner = self.store().get(job_id)?;
            let orphan = match (&owner, object.kind) {
                (None, _) => true,
                (Some(job), _) if job.is_terminal() => true,
                (Some(job), ObjectKind::Resource) => {
                    !job.status.holds_admission()
                        || job
                            .refs
                            .resource
                            .as_deref()
                            .is_some_and(|owned| owned != object.handle)
                }
                (Some(job), ObjectKind::Tracking) => job
                    .refs
                    .tracking
                    .as_deref()
                    .is_some_and(|owned| owned != object.handle),
            };
            if !orphan {
                continue;
            }
            let handle = object.handle.as_str();
            let result = match object.kind {
                ObjectKind::Resource => {
                    with_backoff(&self.backoff, "delete_resource", move || {
                        substrate.delete_resource(handle, Duration::ZERO)
                    })
                    .await
                }
                ObjectKind::Tracking => {
                    with_backoff(&self.backoff, "delete_tracking", move || substrate.delete_tracking(handle)).await
                }
            };
            match result {
                Ok(()) => {
                    tracing::info!(%job_id, handle, kind = ?object.kind, "orphaned object deleted");
                    deleted += 1;
                }
                Err(err) => tracing::warn!(%job_id, handle, error = %err, "orphan deletion failed"),
            }
        }
        Ok(deleted)
    }
}

fn time_limit_exceeded(job: &Job, now: u128) -> Option<FailureKind> {
    if job.is_terminal() {
        return None;
    }
    if job.policy.deadline_ms.is_some_and(|deadline| now >= deadline) {
        return Some(FailureKind::DeadlineExceeded);
    }
    let started = job.started_at_ms?;
    let limit = job.policy.max_runtime_secs?;
    if job.status == JobStatus::Running && now >= after_ms(started, Duration::from_secs(limit)) {
        return Some(FailureKind::MaxRuntimeExceeded);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::{JobSpec, NewJob, ResourceRequest};

    fn job() -> Job {
        let spec = JobSpec::new("j", "ns", JobType::Training, ResourceRequest::gpus("a100", 1))
            .with_deadline_ms(10_000)
            .with_max_runtime_secs(5);
        Job::from_new(
            uuid::Uuid::new_v4(),
            NewJob {
                spec,
                idempotency_key: None,
                cluster: "c1".into(),
                pool: "p".into(),
            },
            0,
        )
    }

    #[test]
    fn test_deadline_detected() {
        assert_eq!(time_limit_exceeded(&job(), 9_999), None);
        assert_eq!(time_limit_exceeded(&job(), 10_000), Some(FailureKind::DeadlineExceeded));
    }

    #[test]
    fn test_max_runtime_only_while_running() {
        let mut j = job();
        j.started_at_ms = Some(1_000);
        assert_eq!(time_limit_exceeded(&j, 7_000), None);
        j.status = JobStatus::Running;
        assert_eq!(time_limit_exceeded(&j, 5_999), None);
        assert_eq!(time_limit_exceeded(&j, 6_000), Some(FailureKind::MaxRuntimeExceeded));
    }

    #[test]
    fn test_report_counts() {
        let mut report = ReconcileReport::new("c1");
        let id = uuid::Uuid::new_v4();
        report.record(id, Ok(Repair::Unchanged));
        assert!(report.is_clean());
        report.record(id, Ok(Repair::Recreated));
        report.record(
            id,
            Err(SchedulerError::VersionConflict {
                job_id: id,
                expected: 1,
                found: 2,
            }),
        );
        assert_eq!(report.recreated, 1);
        assert_eq!(report.conflicts, 1);
        assert!(!report.is_clean());
    }
}
