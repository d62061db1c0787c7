//! Tests for the API handlers and the control loop

use std::sync::Arc;
use std::time::Duration;

use prometheus_admission::builders::SchedulerBuilder;
use prometheus_admission::config::{ClusterConfig, FlavorConfig, FlavorQuotaConfig, QueuePoolConfig, SchedulerConfig};
use prometheus_admission::core::{
    AdmissionScheduler, FailureCause, JobFilter, JobSpec, JobStatus, JobType, ResourceRequest, RunState,
};
use prometheus_admission::infra::InMemorySubstrate;
use prometheus_admission::runtime::{
    cancel_job, get_job, health, list_jobs, list_pools, spawn_control_loop, submit_job, SubmitRequest,
};
use prometheus_admission::util::serde::ResourceVector;
use prometheus_admission::util::telemetry::init_tracing;

fn scheduler(tick_interval_ms: u64) -> Arc<AdmissionScheduler> {
    let mut config = SchedulerConfig::new(
        ClusterConfig::new("c1")
            .with_flavor(FlavorConfig::gpu("a100", "a100"))
            .with_pool(
                QueuePoolConfig::new("research")
                    .with_flavor(FlavorQuotaConfig::new("a100", ResourceVector::new(4, 0, 0))),
            ),
    )
    .with_fallback_pool("research");
    config.reconciler.tick_interval_ms = tick_interval_ms;
    Arc::new(
        SchedulerBuilder::new(config)
            .with_substrate("c1", Arc::new(InMemorySubstrate::new()))
            .build()
            .unwrap(),
    )
}

fn request(name: &str, gpus: u32) -> SubmitRequest {
    SubmitRequest {
        spec: JobSpec::new(name, "team-a", JobType::Batch, ResourceRequest::gpus("a100", gpus)),
        idempotency_key: None,
    }
}

#[tokio::test]
async fn test_api_round_trip() {
    let scheduler = scheduler(1_000);
    let submitted = submit_job(&scheduler, request("a", 4)).await.unwrap();
    assert!(submitted.created);
    assert_eq!(submitted.job.status, JobStatus::Admitted);
    assert_eq!(submitted.job.flavor.as_deref(), Some("a100"));

    let waiting = submit_job(&scheduler, request("b", 2)).await.unwrap();
    assert_eq!(waiting.job.status, JobStatus::Queued);
    assert_eq!(health(&scheduler).queued, 1);

    let pools = list_pools(&scheduler);
    assert_eq!(pools.len(), 1);
    assert_eq!(pools[0].flavors[0].used, ResourceVector::new(4, 0, 0));

    cancel_job(&scheduler, submitted.job.id).await.unwrap();
    assert_eq!(get_job(&scheduler, waiting.job.id).unwrap().status, JobStatus::Admitted);
    assert_eq!(list_jobs(&scheduler, &JobFilter::new()).unwrap().len(), 2);

    let err = cancel_job(&scheduler, submitted.job.id).await.unwrap_err();
    assert_eq!(err.code, "invalid_transition");
}

#[tokio::test]
async fn test_api_maps_not_found() {
    let scheduler = scheduler(1_000);
    let err = get_job(&scheduler, uuid::Uuid::new_v4()).unwrap_err();
    assert_eq!(err.code, "not_found");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_control_loop_resubmits_retries() {
    init_tracing();
    let scheduler = scheduler(10);
    let job = scheduler
        .submit(request("a", 2).spec.with_retries(1, 0), None)
        .await
        .unwrap()
        .job;
    let failed = scheduler
        .on_substrate_status(job.id, RunState::Failed(FailureCause::NodeFailure))
        .await
        .unwrap();
    assert_eq!(failed.status, JobStatus::Pending);

    let handle = spawn_control_loop(Arc::clone(&scheduler));
    assert_eq!(handle.loops(), 1);

    let mut readmitted = false;
    for _ in 0..100 {
        if scheduler.get_job(job.id).unwrap().status == JobStatus::Admitted {
            readmitted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(readmitted, "the loop should resubmit the retried job");
    handle.shutdown().await;
}
