//! Tests for configuration validation

use prometheus_admission::config::{
    ClusterConfig, FlavorConfig, FlavorQuotaConfig, PriorityClassConfig, QueuePoolConfig,
    QueueingStrategy, SchedulerConfig,
};
use prometheus_admission::util::serde::{PriorityClass, ResourceVector};

fn gpus(n: u64) -> ResourceVector {
    ResourceVector::new(n, 0, 0)
}

fn cluster() -> ClusterConfig {
    ClusterConfig::new("c1")
        .with_flavor(FlavorConfig::gpu("a100", "a100"))
        .with_cohort("research")
        .with_pool(
            QueuePoolConfig::new("team-a")
                .with_cohort("research")
                .with_flavor(FlavorQuotaConfig::new("a100", gpus(8))),
        )
}

#[test]
fn test_pool_config_validation() {
    let valid = QueuePoolConfig::new("team-a").with_flavor(FlavorQuotaConfig::new("a100", gpus(8)));
    assert!(valid.validate().is_ok());
}

#[test]
fn test_pool_config_invalid_weight() {
    let invalid = QueuePoolConfig::new("team-a")
        .with_weight(0)
        .with_flavor(FlavorQuotaConfig::new("a100", gpus(8)));
    assert!(invalid.validate().is_err());
}

#[test]
fn test_pool_config_requires_flavors() {
    assert!(QueuePoolConfig::new("team-a").validate().is_err());
}

#[test]
fn test_pool_config_lending_above_nominal() {
    let invalid = QueuePoolConfig::new("team-a")
        .with_flavor(FlavorQuotaConfig::new("a100", gpus(4)).with_lending_limit(gpus(6)));
    let err = invalid.validate().unwrap_err();
    assert!(err.contains("lending limit"));
}

#[test]
fn test_cluster_unknown_flavor_and_cohort() {
    let unknown_flavor = ClusterConfig::new("c1")
        .with_flavor(FlavorConfig::gpu("a100", "a100"))
        .with_pool(QueuePoolConfig::new("p").with_flavor(FlavorQuotaConfig::new("h100", gpus(8))));
    assert!(unknown_flavor.validate().unwrap_err().contains("unknown flavor"));

    let unknown_cohort = ClusterConfig::new("c1")
        .with_flavor(FlavorConfig::gpu("a100", "a100"))
        .with_pool(
            QueuePoolConfig::new("p")
                .with_cohort("missing")
                .with_flavor(FlavorQuotaConfig::new("a100", gpus(8))),
        );
    assert!(unknown_cohort.validate().unwrap_err().contains("unknown cohort"));
}

#[test]
fn test_scheduler_config_validation() {
    let config = SchedulerConfig::new(cluster())
        .with_queue("team-a", "default", "team-a")
        .with_default_pool("team-b", "team-a");
    assert!(config.validate().is_ok());
}

#[test]
fn test_scheduler_config_empty_clusters() {
    let mut config = SchedulerConfig::new(cluster());
    config.clusters.clear();
    assert!(config.validate().is_err());
}

#[test]
fn test_scheduler_config_unknown_queue_pool() {
    let config = SchedulerConfig::new(cluster()).with_queue("team-a", "default", "nope");
    assert!(config.validate().unwrap_err().contains("unknown pool"));
}

#[test]
fn test_scheduler_config_partial_priority_table() {
    let mut config = SchedulerConfig::new(cluster());
    config.priority_classes = vec![PriorityClassConfig {
        class: PriorityClass::Low,
        value: 0,
        can_preempt: false,
    }];
    assert!(config.validate().is_err());
    config.priority_classes = PriorityClassConfig::defaults();
    assert!(config.validate().is_ok());
}

#[test]
fn test_scheduler_config_from_json() {
    let json = r#"{
        "clusters": [{
            "id": "c1",
            "labels": { "region": "eu-west" },
            "cost_per_hour": 32.5,
            "flavors": [{ "name": "a100", "gpu_type": "a100" }],
            "cohorts": [{ "name": "research" }],
            "pools": [{
                "name": "team-a",
                "cohort": "research",
                "queueing_strategy": "best_effort_fifo",
                "flavors": [{
                    "flavor": "a100",
                    "nominal": { "gpu": 8 },
                    "borrowing_limit": { "gpu": 4 }
                }]
            }]
        }],
        "queues": [{ "namespace": "team-a", "name": "default", "pool": "team-a" }],
        "default_pool": "team-a",
        "retry": { "substrate_attempts": 3 }
    }"#;

    let config = SchedulerConfig::from_json_str(json).expect("valid config");
    let pool = config.clusters[0].pool("team-a").unwrap();
    assert_eq!(pool.queueing_strategy, QueueingStrategy::BestEffortFifo);
    assert_eq!(pool.weight, 1);
    assert_eq!(pool.flavors[0].borrowing_limit, gpus(4));
    assert_eq!(config.retry.substrate_attempts, 3);
    assert_eq!(config.retry.checkpoint_timeout_secs, 300);
    assert_eq!(config.event_history, 1_024);
    assert_eq!(config.priority_table().len(), 4);
}

#[test]
fn test_scheduler_config_from_json_rejects_invalid() {
    let json = r#"{ "clusters": [] }"#;
    assert!(SchedulerConfig::from_json_str(json).is_err());
}

#[test]
fn test_scheduler_config_from_env() {
    use prometheus_admission::config::CONFIG_PATH_ENV;

    let config = SchedulerConfig::new(cluster()).with_fallback_pool("team-a");
    let path = std::env::temp_dir().join(format!("admission-config-{}.json", uuid::Uuid::new_v4()));
    std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();

    std::env::set_var(CONFIG_PATH_ENV, &path);
    std::env::set_var("PROMETHEUS_ADMISSION_TICK_INTERVAL_MS", "250");
    let loaded = SchedulerConfig::from_env().expect("config loads");
    std::env::remove_var(CONFIG_PATH_ENV);
    std::env::remove_var("PROMETHEUS_ADMISSION_TICK_INTERVAL_MS");
    std::fs::remove_file(&path).unwrap();

    assert_eq!(loaded.reconciler.tick_interval_ms, 250);
    assert_eq!(loaded.default_pool.as_deref(), Some("team-a"));
    assert_eq!(loaded.clusters, config.clusters);
}
