//! Configuration models for clusters, pools, queues, and control-loop timing.

pub mod pool;
pub mod scheduler;

pub use pool::{
    ClusterConfig, CohortConfig, FlavorConfig, FlavorQuotaConfig, QueueConfig, QueuePoolConfig,
    QueueingStrategy,
};
pub use scheduler::{
    PriorityClassConfig, ReconcilerConfig, RetryConfig, SchedulerConfig, SelectorConfig,
    CONFIG_PATH_ENV,
};
