//! Drift repair between the job store, the ledger and the substrate.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use prometheus_admission::builders::SchedulerBuilder;
use prometheus_admission::config::{
    ClusterConfig, FlavorConfig, FlavorQuotaConfig, QueuePoolConfig, RetryConfig, SchedulerConfig,
};
use async_trait::async_trait;
use prometheus_admission::core::substrate::{
    job_labels, LabelSelector, ManagedObject, ObjectKind, ResourceTemplate, SubstrateError,
};
use prometheus_admission::core::{
    AdmissionScheduler, JobFilter, JobSpec, JobStatus, JobStore, JobType, ResourceRequest, RunState, Substrate,
    TrackingState,
};
use prometheus_admission::infra::{FileJobStore, InMemorySubstrate};
use prometheus_admission::util::clock::now_ms;
use prometheus_admission::util::serde::{JobId, ResourceVector};

fn config() -> SchedulerConfig {
    let cluster = ClusterConfig::new("c1")
        .with_flavor(FlavorConfig::gpu("a100", "a100"))
        .with_pool(
            QueuePoolConfig::new("research")
                .with_flavor(FlavorQuotaConfig::new("a100", ResourceVector::new(8, 0, 0))),
        );
    SchedulerConfig::new(cluster)
        .with_fallback_pool("research")
        .with_retry(RetryConfig {
            checkpoint_timeout_secs: 5,
            substrate_attempts: 2,
            substrate_backoff_ms: 1,
            substrate_max_backoff_ms: 2,
            substrate_call_timeout_ms: 1_000,
        })
}

fn build(substrate: &Arc<InMemorySubstrate>, store: Option<Arc<dyn JobStore>>) -> AdmissionScheduler {
    let mut builder = SchedulerBuilder::new(config()).with_substrate("c1", substrate.clone());
    if let Some(store) = store {
        builder = builder.with_store(store);
    }
    builder.build().expect("scheduler builds")
}

fn spec(name: &str, count: u32) -> JobSpec {
    JobSpec::new(name, "team-a", JobType::Batch, ResourceRequest::gpus("a100", count))
}

fn used(scheduler: &AdmissionScheduler) -> u64 {
    scheduler
        .runtime("c1")
        .unwrap()
        .ledger()
        .usage("research", "a100")
        .unwrap()
        .gpu
}

#[tokio::test]
async fn test_orphans_are_deleted_and_foreign_objects_untouched() {
    let substrate = Arc::new(InMemorySubstrate::new());
    let scheduler = build(&substrate, None);
    let job = scheduler.submit(spec("live", 2), None).await.unwrap().job;

    let orphan = substrate.insert_orphan(ObjectKind::Resource, job_labels(JobId::new_v4()));
    substrate.insert_orphan(ObjectKind::Tracking, job_labels(JobId::new_v4()));
    let foreign = substrate.insert_orphan(
        ObjectKind::Resource,
        BTreeMap::from([("app".to_string(), "someone-else".to_string())]),
    );

    let report = scheduler.reconcile_incremental("c1").await.unwrap();
    assert_eq!(report.orphans_deleted, 2);
    assert_eq!(substrate.resource_count(), 2);
    assert_eq!(substrate.tracking_count(), 1);
    assert!(substrate.remove_resource(&foreign));
    assert!(!substrate.remove_resource(&orphan));
    assert_eq!(scheduler.get_job(job.id).unwrap().status, JobStatus::Admitted);
}

#[tokio::test]
async fn test_objects_of_terminal_jobs_are_orphans() {
    let substrate = Arc::new(InMemorySubstrate::new());
    let scheduler = build(&substrate, None);
    let job = scheduler.submit(spec("done", 2), None).await.unwrap().job;
    scheduler.cancel_job(job.id).await.unwrap();
    let stray = substrate.insert_orphan(ObjectKind::Resource, job_labels(job.id));

    let report = scheduler.reconcile_incremental("c1").await.unwrap();
    assert_eq!(report.orphans_deleted, 1);
    assert!(!substrate.remove_resource(&stray));
}

#[tokio::test]
async fn test_both_objects_missing_fails_job() {
    let substrate = Arc::new(InMemorySubstrate::new());
    let scheduler = build(&substrate, None);
    let job = scheduler.submit(spec("gone", 4), None).await.unwrap().job;
    assert!(substrate.remove_resource(&substrate.resource_of(job.id).unwrap()));
    assert!(substrate.remove_tracking(&substrate.tracking_of(job.id).unwrap()));

    let report = scheduler.reconcile_incremental("c1").await.unwrap();
    assert_eq!(report.failed, 1);
    let job = scheduler.get_job(job.id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.status_message.as_deref(), Some("resource missing externally"));
    assert_eq!(used(&scheduler), 0);
}

#[tokio::test]
async fn test_missing_resource_is_recreated() {
    let substrate = Arc::new(InMemorySubstrate::new());
    let scheduler = build(&substrate, None);
    let job = scheduler.submit(spec("lost", 4), None).await.unwrap().job;
    let old = substrate.resource_of(job.id).unwrap();
    assert!(substrate.remove_resource(&old));

    let report = scheduler.reconcile_incremental("c1").await.unwrap();
    assert_eq!(report.recreated, 1);
    let job = scheduler.get_job(job.id).unwrap();
    assert_eq!(job.status, JobStatus::Admitted);
    let new = substrate.resource_of(job.id).unwrap();
    assert_ne!(new, old);
    assert_eq!(job.refs.resource.as_deref(), Some(new.as_str()));
    assert_eq!(used(&scheduler), 4);
}

#[tokio::test]
async fn test_missing_tracking_is_recreated() {
    let substrate = Arc::new(InMemorySubstrate::new());
    let scheduler = build(&substrate, None);
    let job = scheduler.submit(spec("untracked", 4), None).await.unwrap().job;
    assert!(substrate.remove_tracking(&substrate.tracking_of(job.id).unwrap()));

    let report = scheduler.reconcile_incremental("c1").await.unwrap();
    assert_eq!(report.recreated, 1);
    assert_eq!(substrate.tracking_state_of(job.id), Some(TrackingState::Admitted));
    assert_eq!(scheduler.get_job(job.id).unwrap().status, JobStatus::Admitted);
}

#[tokio::test]
async fn test_evicted_tracking_requeues_then_readmits() {
    let substrate = Arc::new(InMemorySubstrate::new());
    let scheduler = build(&substrate, None);
    let job = scheduler.submit(spec("evicted", 4), None).await.unwrap().job;
    let tracking = substrate.tracking_of(job.id).unwrap();
    substrate.evict_tracking(&tracking).await.unwrap();

    let report = scheduler.reconcile_incremental("c1").await.unwrap();
    assert_eq!(report.requeued, 1);
    let path: Vec<JobStatus> = scheduler
        .events()
        .recent()
        .iter()
        .filter(|e| e.job_id == job.id)
        .map(|e| e.to)
        .collect();
    assert!(path.ends_with(&[JobStatus::Preempted, JobStatus::Queued, JobStatus::Admitted]));
    assert_eq!(scheduler.get_job(job.id).unwrap().status, JobStatus::Admitted);
    assert_eq!(used(&scheduler), 4);
    assert_eq!(substrate.resource_count(), 1);
}

#[tokio::test]
async fn test_second_pass_is_clean() {
    let substrate = Arc::new(InMemorySubstrate::new());
    let scheduler = build(&substrate, None);
    scheduler.submit(spec("a", 4), None).await.unwrap();
    scheduler.submit(spec("b", 8), None).await.unwrap();
    substrate.insert_orphan(ObjectKind::Tracking, job_labels(JobId::new_v4()));

    let first = scheduler.reconcile_incremental("c1").await.unwrap();
    assert!(!first.is_clean());
    let events = scheduler.events().recent().len();

    let second = scheduler.reconcile_incremental("c1").await.unwrap();
    assert!(second.is_clean(), "{second:?}");
    assert_eq!(second.examined, 2);
    assert_eq!(scheduler.events().recent().len(), events);
}

#[tokio::test]
async fn test_run_state_is_synced() {
    let substrate = Arc::new(InMemorySubstrate::new());
    let scheduler = build(&substrate, None);
    let job = scheduler.submit(spec("runner", 4), None).await.unwrap().job;
    let handle = substrate.resource_of(job.id).unwrap();

    substrate.set_run_state(&handle, RunState::Running).unwrap();
    let report = scheduler.reconcile_incremental("c1").await.unwrap();
    assert_eq!(report.synced, 1);
    assert_eq!(scheduler.get_job(job.id).unwrap().status, JobStatus::Running);

    substrate.set_run_state(&handle, RunState::Succeeded).unwrap();
    scheduler.reconcile_incremental("c1").await.unwrap();
    assert_eq!(scheduler.get_job(job.id).unwrap().status, JobStatus::Succeeded);
    assert_eq!(used(&scheduler), 0);
    assert_eq!(substrate.resource_count(), 0);
}

#[tokio::test]
async fn test_restart_restores_usage_from_file_store() {
    let dir = std::env::temp_dir().join(format!("admission-restart-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let substrate = Arc::new(InMemorySubstrate::new());

    let (admitted, queued) = {
        let store: Arc<dyn JobStore> = Arc::new(FileJobStore::open(&dir, "jobs").unwrap());
        let scheduler = build(&substrate, Some(store));
        let admitted = scheduler.submit(spec("a", 6), None).await.unwrap().job;
        let queued = scheduler.submit(spec("b", 4), None).await.unwrap().job;
        assert_eq!(queued.status, JobStatus::Queued);
        (admitted.id, queued.id)
    };

    let store: Arc<dyn JobStore> = Arc::new(FileJobStore::open(&dir, "jobs").unwrap());
    let scheduler = build(&substrate, Some(store));
    assert_eq!(used(&scheduler), 0);

    let report = scheduler.reconcile_full("c1").await.unwrap();
    assert_eq!(report.examined, 2);
    assert_eq!(used(&scheduler), 6);
    assert_eq!(scheduler.runtime("c1").unwrap().queue_depth(), 1);
    assert_eq!(scheduler.get_job(admitted).unwrap().status, JobStatus::Admitted);
    assert_eq!(scheduler.get_job(queued).unwrap().status, JobStatus::Queued);

    scheduler.cancel_job(admitted).await.unwrap();
    assert_eq!(scheduler.get_job(queued).unwrap().status, JobStatus::Admitted);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_deadline_expiry_fails_job() {
    let substrate = Arc::new(InMemorySubstrate::new());
    let scheduler = build(&substrate, None);
    let job = scheduler
        .submit(spec("late", 4).with_deadline_ms(now_ms() + 50), None)
        .await
        .unwrap()
        .job;
    assert_eq!(job.status, JobStatus::Admitted);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let report = scheduler.reconcile_incremental("c1").await.unwrap();
    assert_eq!(report.failed, 1);
    let job = scheduler.get_job(job.id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.status_message.as_deref(), Some("deadline exceeded"));
    assert_eq!(substrate.resource_count(), 0);
    assert_eq!(used(&scheduler), 0);
}

#[tokio::test]
async fn test_unavailable_substrate_leaves_job_pending_until_reconciled() {
    let substrate = Arc::new(InMemorySubstrate::new());
    let scheduler = build(&substrate, None);
    substrate.set_unavailable(true);

    let job = scheduler.submit(spec("early", 2), None).await.unwrap().job;
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(used(&scheduler), 0);

    substrate.set_unavailable(false);
    let report = scheduler.reconcile_incremental("c1").await.unwrap();
    assert_eq!(report.requeued, 1);
    assert_eq!(scheduler.get_job(job.id).unwrap().status, JobStatus::Admitted);
}

#[tokio::test]
async fn test_reconnect_rebuilds_state() {
    let substrate = Arc::new(InMemorySubstrate::new());
    let scheduler = build(&substrate, None);
    scheduler.submit(spec("a", 4), None).await.unwrap();
    let report = scheduler.reconnect("c1").await.unwrap();
    assert!(report.is_clean());
    assert_eq!(used(&scheduler), 4);
}

/// Substrate whose admission marking lags, so a launch stays in flight for a while.
struct LaggingSubstrate {
    inner: Arc<InMemorySubstrate>,
    lag: Duration,
}

#[async_trait]
impl Substrate for LaggingSubstrate {
    async fn create_resource(&self, template: &ResourceTemplate) -> Result<String, SubstrateError> {
        self.inner.create_resource(template).await
    }

    async fn resource_status(&self, handle: &str) -> Result<Option<RunState>, SubstrateError> {
        self.inner.resource_status(handle).await
    }

    async fn delete_resource(&self, handle: &str, grace: Duration) -> Result<(), SubstrateError> {
        self.inner.delete_resource(handle, grace).await
    }

    async fn create_tracking(
        &self,
        job_id: JobId,
        labels: &BTreeMap<String, String>,
    ) -> Result<String, SubstrateError> {
        self.inner.create_tracking(job_id, labels).await
    }

    async fn tracking_state(&self, handle: &str) -> Result<Option<TrackingState>, SubstrateError> {
        self.inner.tracking_state(handle).await
    }

    async fn set_tracking_admitted(&self, handle: &str, flavor: &str) -> Result<(), SubstrateError> {
        tokio::time::sleep(self.lag).await;
        self.inner.set_tracking_admitted(handle, flavor).await
    }

    async fn evict_tracking(&self, handle: &str) -> Result<(), SubstrateError> {
        self.inner.evict_tracking(handle).await
    }

    async fn delete_tracking(&self, handle: &str) -> Result<(), SubstrateError> {
        self.inner.delete_tracking(handle).await
    }

    async fn list_managed(&self, selector: &LabelSelector) -> Result<Vec<ManagedObject>, SubstrateError> {
        self.inner.list_managed(selector).await
    }

    async fn request_checkpoint(&self, handle: &str) -> Result<(), SubstrateError> {
        self.inner.request_checkpoint(handle).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reconcile_waits_for_in_flight_launch() {
    let inner = Arc::new(InMemorySubstrate::new());
    let lagging = Arc::new(LaggingSubstrate {
        inner: inner.clone(),
        lag: Duration::from_millis(200),
    });
    let mut cfg = config();
    cfg.retry.substrate_call_timeout_ms = 2_000;
    let scheduler = Arc::new(
        SchedulerBuilder::new(cfg)
            .with_substrate("c1", lagging)
            .build()
            .expect("scheduler builds"),
    );

    let submitting = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.submit(spec("slow-launch", 2), None).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let report = scheduler.reconcile_incremental("c1").await.unwrap();
    let job = submitting.await.unwrap().unwrap().job;

    assert_eq!(report.requeued, 0);
    let trail: Vec<(JobStatus, JobStatus)> = scheduler
        .events()
        .recent()
        .into_iter()
        .filter(|e| e.job_id == job.id)
        .map(|e| (e.from, e.to))
        .collect();
    assert_eq!(
        trail,
        vec![
            (JobStatus::Pending, JobStatus::Queued),
            (JobStatus::Queued, JobStatus::Admitted),
        ]
    );
    assert_eq!(inner.tracking_state_of(job.id), Some(TrackingState::Admitted));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_full_reconcile_during_traffic_keeps_usage_exact() {
    let substrate = Arc::new(InMemorySubstrate::new());
    let scheduler = Arc::new(build(&substrate, None));

    let mut workers = Vec::new();
    for worker in 0..4 {
        let scheduler = scheduler.clone();
        workers.push(tokio::spawn(async move {
            for round in 0..20 {
                let job = scheduler
                    .submit(spec(&format!("w{worker}-{round}"), 1), None)
                    .await
                    .unwrap()
                    .job;
                if round % 2 == 0 {
                    scheduler.cancel_job(job.id).await.unwrap();
                }
            }
        }));
    }
    let reconciling = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            for _ in 0..20 {
                scheduler.reconcile_full("c1").await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };
    for worker in workers {
        worker.await.unwrap();
    }
    reconciling.await.unwrap();

    let charged: u64 = scheduler
        .list_jobs(&JobFilter::new())
        .unwrap()
        .iter()
        .filter_map(|job| job.admission.as_ref())
        .map(|record| record.usage.gpu)
        .sum();
    assert_eq!(used(&scheduler), charged);
    assert!(charged <= 8);
}
