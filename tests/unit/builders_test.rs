//! Tests for builder modules

use std::sync::Arc;

use prometheus_admission::builders::SchedulerBuilder;
use prometheus_admission::config::{ClusterConfig, FlavorConfig, FlavorQuotaConfig, QueuePoolConfig, SchedulerConfig};
use prometheus_admission::core::{InMemoryEventSink, SchedulerError};
use prometheus_admission::infra::InMemorySubstrate;
use prometheus_admission::util::serde::ResourceVector;

fn config() -> SchedulerConfig {
    SchedulerConfig::new(
        ClusterConfig::new("c1")
            .with_flavor(FlavorConfig::gpu("a100", "a100"))
            .with_pool(
                QueuePoolConfig::new("research")
                    .with_flavor(FlavorQuotaConfig::new("a100", ResourceVector::new(8, 0, 0))),
            ),
    )
}

#[test]
fn test_builder_defaults() {
    let scheduler = SchedulerBuilder::new(config())
        .with_substrate("c1", Arc::new(InMemorySubstrate::new()))
        .with_event_sink(Box::new(InMemoryEventSink::new(16)))
        .build()
        .unwrap();
    assert_eq!(scheduler.cluster_ids(), vec!["c1".to_string()]);
    assert_eq!(scheduler.runtime("c1").unwrap().queue_depth(), 0);
    assert!(scheduler.events().recent().is_empty());
}

#[test]
fn test_builder_requires_substrate_per_cluster() {
    let err = SchedulerBuilder::new(config()).build().err().unwrap();
    assert!(matches!(err, SchedulerError::Config(_)));
}

#[test]
fn test_builder_rejects_unknown_substrate_cluster() {
    let err = SchedulerBuilder::new(config())
        .with_substrate("c1", Arc::new(InMemorySubstrate::new()))
        .with_substrate("c9", Arc::new(InMemorySubstrate::new()))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, SchedulerError::UnknownCluster(id) if id == "c9"));
}

#[test]
fn test_builder_rejects_invalid_config() {
    let mut cfg = config();
    cfg.retry.substrate_attempts = 0;
    let err = SchedulerBuilder::new(cfg)
        .with_substrate("c1", Arc::new(InMemorySubstrate::new()))
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, SchedulerError::Config(msg) if msg.starts_with("config invalid")));
}
