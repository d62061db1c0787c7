//! Tests for utility types

use std::time::Duration;

use prometheus_admission::util::{
    after_ms, now_ms, PriorityClass, ResourceKind, ResourceVector, TopologyLevel, JOB_ID_LABEL,
    MANAGED_BY_LABEL,
};

#[test]
fn test_priority_ordering() {
    assert!(PriorityClass::Critical > PriorityClass::High);
    assert!(PriorityClass::High > PriorityClass::Normal);
    assert!(PriorityClass::Normal > PriorityClass::Low);
}

#[test]
fn test_resource_vector() {
    let v = ResourceVector::new(4, 8_000, 32_768);
    assert_eq!(v.get(ResourceKind::Gpu), 4);
    assert_eq!(v.get(ResourceKind::Cpu), 8_000);
    assert_eq!(v.to_string(), "gpu=4 cpu=8000m memory=32768Mi");
    assert!(ResourceVector::ZERO.is_zero());
}

#[test]
fn test_topology_relaxation_order() {
    assert_eq!(TopologyLevel::Node.looser(), Some(TopologyLevel::Rack));
    assert_eq!(TopologyLevel::Rack.looser(), Some(TopologyLevel::Zone));
    assert_eq!(TopologyLevel::Zone.looser(), None);
}

#[test]
fn test_labels_and_clock() {
    assert_ne!(MANAGED_BY_LABEL, JOB_ID_LABEL);
    let now = now_ms();
    assert_eq!(after_ms(now, Duration::from_millis(250)), now + 250);
}

#[test]
fn test_priority_serde_names() {
    let json = serde_json::to_string(&PriorityClass::Critical).unwrap();
    assert_eq!(json, "\"critical\"");
    let parsed: TopologyLevel = serde_json::from_str("\"rack\"").unwrap();
    assert_eq!(parsed, TopologyLevel::Rack);
}
