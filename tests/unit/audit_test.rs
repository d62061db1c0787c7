//! Tests for status event sinks and the event bus

use prometheus_admission::core::audit::build_status_event;
use prometheus_admission::core::{
    EventBus, EventSink, InMemoryEventSink, Job, JobSpec, JobStatus, JobType, NewJob, ResourceRequest,
};

fn job(status: JobStatus) -> Job {
    let spec = JobSpec::new("train", "team-a", JobType::Training, ResourceRequest::gpus("a100", 2));
    let mut job = Job::from_new(
        uuid::Uuid::new_v4(),
        NewJob {
            spec,
            idempotency_key: None,
            cluster: "c1".into(),
            pool: "research".into(),
        },
        1_000,
    );
    job.status = status;
    job.status_message = Some("preempted by job x".into());
    job.checkpoint_saved = Some(true);
    job
}

#[test]
fn test_in_memory_event_sink() {
    let mut sink = InMemoryEventSink::new(10);
    let event = build_status_event(&job(JobStatus::Queued), JobStatus::Pending);
    sink.record(event.clone());

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_id, event.event_id);
    assert_eq!(events[0].from, JobStatus::Pending);
    assert_eq!(events[0].to, JobStatus::Queued);
}

#[test]
fn test_event_sink_overflow() {
    let mut sink = InMemoryEventSink::new(2);
    let j = job(JobStatus::Queued);
    let first = build_status_event(&j, JobStatus::Pending);
    let second = build_status_event(&j, JobStatus::Pending);
    let third = build_status_event(&j, JobStatus::Pending);
    sink.record(first);
    sink.record(second.clone());
    sink.record(third.clone());

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_id, second.event_id);
    assert_eq!(events[1].event_id, third.event_id);
}

#[test]
fn test_build_status_event() {
    let j = job(JobStatus::Preempted);
    let event = build_status_event(&j, JobStatus::Running);

    assert_eq!(event.job_id, j.id);
    assert_eq!(event.cluster, "c1");
    assert_eq!(event.to, JobStatus::Preempted);
    assert_eq!(event.reason.as_deref(), Some("preempted by job x"));
    assert_eq!(event.checkpoint_saved, Some(true));
    assert_eq!(event.version, j.version);
    assert!(event.at_ms > 0);
}

#[test]
fn test_checkpoint_flag_only_on_eviction_events() {
    let event = build_status_event(&job(JobStatus::Queued), JobStatus::Preempted);
    assert_eq!(event.checkpoint_saved, None);
}

#[test]
fn test_event_bus_fans_out() {
    let bus = EventBus::new(1);
    let rx = bus.subscribe();
    let j = job(JobStatus::Queued);
    bus.publish(build_status_event(&j, JobStatus::Pending));
    bus.publish(build_status_event(&j, JobStatus::Pending));

    assert_eq!(rx.try_iter().count(), 2);
    assert_eq!(bus.recent().len(), 1);
}
