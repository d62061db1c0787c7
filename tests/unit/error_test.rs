//! Tests for error types

use prometheus_admission::core::{JobStatus, SchedulerError, SubstrateError};
use prometheus_admission::runtime::ErrorResponse;

#[test]
fn test_validation_error() {
    let err = SchedulerError::Validation("job name must not be empty".to_string());
    assert_eq!(format!("{}", err), "validation failed: job name must not be empty");
}

#[test]
fn test_invalid_transition_error() {
    let id = uuid::Uuid::nil();
    let err = SchedulerError::InvalidTransition {
        job_id: id,
        from: JobStatus::Succeeded,
        to: JobStatus::Cancelled,
    };
    assert_eq!(
        format!("{}", err),
        format!("invalid transition for job {id}: SUCCEEDED -> CANCELLED")
    );
}

#[test]
fn test_backend_error() {
    let err = SchedulerError::Backend("connection failed".to_string());
    assert_eq!(format!("{}", err), "backend error: connection failed");
}

#[test]
fn test_substrate_error_converts() {
    let err: SchedulerError = SubstrateError::Unavailable("api down".into()).into();
    assert!(matches!(err, SchedulerError::SubstrateUnavailable(msg) if msg.contains("api down")));
}

#[test]
fn test_error_response_codes() {
    let response = ErrorResponse::from(SchedulerError::NoTopologyOffer(uuid::Uuid::nil()));
    assert_eq!(response.code, "no_topology_offer");
    let response = ErrorResponse::from(SchedulerError::UnknownQueue {
        namespace: "team-a".into(),
        queue: "fast".into(),
    });
    assert_eq!(response.code, "unknown_queue");
    assert_eq!(response.message, "unknown queue `fast` in namespace `team-a`");
}
