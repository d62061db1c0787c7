//! Root scheduler configuration and environment loading.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::config::pool::{ClusterConfig, QueueConfig};
use crate::core::AppResult;
use crate::util::serde::PriorityClass;

/// Env var naming the JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "PROMETHEUS_ADMISSION_CONFIG";
/// Env override for [`ReconcilerConfig::interval_secs`].
pub const RECONCILE_INTERVAL_ENV: &str = "PROMETHEUS_ADMISSION_RECONCILE_INTERVAL_SECS";
/// Env override for [`ReconcilerConfig::tick_interval_ms`].
pub const TICK_INTERVAL_ENV: &str = "PROMETHEUS_ADMISSION_TICK_INTERVAL_MS";

/// Numeric value and preemption policy of a priority class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityClassConfig {
    /// Class.
    pub class: PriorityClass,
    /// Numeric value; preemption requires a strictly lower value.
    pub value: i32,
    /// Whether jobs of this class may preempt lower classes.
    pub can_preempt: bool,
}

impl PriorityClassConfig {
    /// Built-in table.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self { class: PriorityClass::Low, value: 0, can_preempt: false },
            Self { class: PriorityClass::Normal, value: 100, can_preempt: true },
            Self { class: PriorityClass::High, value: 1_000, can_preempt: true },
            Self { class: PriorityClass::Critical, value: 10_000, can_preempt: true },
        ]
    }
}

/// Cluster-selector scoring parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Cost/hour at which the cost score reaches zero.
    pub max_cost_per_hour: f64,
    /// Headroom multiple (available / requested) at which availability saturates.
    pub availability_cap: f64,
    /// Latency at which the latency score reaches zero.
    pub max_latency_ms: u32,
    /// Weight of the cost score.
    pub cost_weight: f64,
    /// Weight of the availability score.
    pub availability_weight: f64,
    /// Weight of the latency score.
    pub latency_weight: f64,
    /// Weight of the utilization score.
    pub utilization_weight: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            max_cost_per_hour: 100.0,
            availability_cap: 4.0,
            max_latency_ms: 500,
            cost_weight: 0.4,
            availability_weight: 0.3,
            latency_weight: 0.2,
            utilization_weight: 0.1,
        }
    }
}

impl SelectorConfig {
    /// Validate scoring parameters.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.max_cost_per_hour.is_finite() && self.max_cost_per_hour > 0.0) {
            return Err("max_cost_per_hour must be positive".into());
        }
        if !(self.availability_cap.is_finite() && self.availability_cap > 0.0) {
            return Err("availability_cap must be positive".into());
        }
        if self.max_latency_ms == 0 {
            return Err("max_latency_ms must be greater than 0".into());
        }
        let weights = [
            self.cost_weight,
            self.availability_weight,
            self.latency_weight,
            self.utilization_weight,
        ];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err("score weights must be non-negative".into());
        }
        Ok(())
    }
}

/// Control-loop and reconciliation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Incremental reconciliation interval.
    pub interval_secs: u64,
    /// Admission tick interval (due retries and pending re-evaluation).
    pub tick_interval_ms: u64,
    /// Per-pass job concurrency; `None` uses the CPU count.
    pub concurrency: Option<usize>,
    /// How long terminal jobs are kept before purge.
    pub retention_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            tick_interval_ms: 1_000,
            concurrency: None,
            retention_secs: 7 * 24 * 3_600,
        }
    }
}

impl ReconcilerConfig {
    /// Incremental interval.
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Tick interval.
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Retention window.
    pub const fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// Effective concurrency.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.unwrap_or_else(num_cpus::get).max(1)
    }
}

/// Substrate retry and checkpoint parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// How long a TRAINING job may take to checkpoint before eviction.
    pub checkpoint_timeout_secs: u64,
    /// Attempts per substrate call.
    pub substrate_attempts: u32,
    /// Initial backoff between attempts.
    pub substrate_backoff_ms: u64,
    /// Backoff ceiling.
    pub substrate_max_backoff_ms: u64,
    /// Timeout of one substrate call.
    pub substrate_call_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            checkpoint_timeout_secs: 300,
            substrate_attempts: 5,
            substrate_backoff_ms: 100,
            substrate_max_backoff_ms: 5_000,
            substrate_call_timeout_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// Checkpoint timeout.
    pub const fn checkpoint_timeout(&self) -> Duration {
        Duration::from_secs(self.checkpoint_timeout_secs)
    }
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Managed clusters.
    pub clusters: Vec<ClusterConfig>,
    /// Named queues.
    #[serde(default)]
    pub queues: Vec<QueueConfig>,
    /// Pool used by a namespace when the job names no queue.
    #[serde(default)]
    pub default_pools: BTreeMap<String, String>,
    /// Pool used when the namespace has no default of its own.
    #[serde(default)]
    pub default_pool: Option<String>,
    /// Priority table; empty uses [`PriorityClassConfig::defaults`].
    #[serde(default)]
    pub priority_classes: Vec<PriorityClassConfig>,
    /// Cluster-selector parameters.
    #[serde(default)]
    pub selector: SelectorConfig,
    /// Reconciler parameters.
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    /// Retry parameters.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Status events kept in the recent-history buffer.
    #[serde(default = "default_event_history")]
    pub event_history: usize,
}

const fn default_event_history() -> usize {
    1_024
}

impl SchedulerConfig {
    /// Configuration with one cluster and defaults elsewhere.
    pub fn new(cluster: ClusterConfig) -> Self {
        Self {
            clusters: vec![cluster],
            queues: Vec::new(),
            default_pools: BTreeMap::new(),
            default_pool: None,
            priority_classes: Vec::new(),
            selector: SelectorConfig::default(),
            reconciler: ReconcilerConfig::default(),
            retry: RetryConfig::default(),
            event_history: default_event_history(),
        }
    }

    /// Add a cluster.
    #[must_use]
    pub fn with_cluster(mut self, cluster: ClusterConfig) -> Self {
        self.clusters.push(cluster);
        self
    }

    /// Add a named queue.
    #[must_use]
    pub fn with_queue(
        mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        pool: impl Into<String>,
    ) -> Self {
        self.queues.push(QueueConfig {
            namespace: namespace.into(),
            name: name.into(),
            pool: pool.into(),
        });
        self
    }

    /// Set a namespace's default pool.
    #[must_use]
    pub fn with_default_pool(mut self, namespace: impl Into<String>, pool: impl Into<String>) -> Self {
        self.default_pools.insert(namespace.into(), pool.into());
        self
    }

    /// Set the global fallback pool.
    #[must_use]
    pub fn with_fallback_pool(mut self, pool: impl Into<String>) -> Self {
        self.default_pool = Some(pool.into());
        self
    }

    /// Replace the retry parameters.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Effective priority table.
    pub fn priority_table(&self) -> Vec<PriorityClassConfig> {
        if self.priority_classes.is_empty() {
            PriorityClassConfig::defaults()
        } else {
            self.priority_classes.clone()
        }
    }

    fn pool_exists(&self, pool: &str) -> bool {
        self.clusters.iter().any(|c| c.pool(pool).is_some())
    }

    /// Validate every cluster and cross references.
    pub fn validate(&self) -> Result<(), String> {
        if self.clusters.is_empty() {
            return Err("at least one cluster must be defined".into());
        }
        let mut ids = BTreeSet::new();
        for cluster in &self.clusters {
            cluster
                .validate()
                .map_err(|e| format!("cluster `{}` invalid: {e}", cluster.id))?;
            if !ids.insert(cluster.id.as_str()) {
                return Err(format!("cluster `{}` defined twice", cluster.id));
            }
        }
        let mut queues = BTreeSet::new();
        for queue in &self.queues {
            if !queues.insert((queue.namespace.as_str(), queue.name.as_str())) {
                return Err(format!(
                    "queue `{}/{}` defined twice",
                    queue.namespace, queue.name
                ));
            }
            if !self.pool_exists(&queue.pool) {
                return Err(format!(
                    "queue `{}/{}` references unknown pool `{}`",
                    queue.namespace, queue.name, queue.pool
                ));
            }
        }
        for (namespace, pool) in &self.default_pools {
            if !self.pool_exists(pool) {
                return Err(format!(
                    "default pool of namespace `{namespace}` is unknown: `{pool}`"
                ));
            }
        }
        if let Some(pool) = &self.default_pool {
            if !self.pool_exists(pool) {
                return Err(format!("fallback pool `{pool}` is unknown"));
            }
        }
        let mut classes = BTreeSet::new();
        for entry in &self.priority_classes {
            if !classes.insert(entry.class) {
                return Err(format!("priority class `{}` defined twice", entry.class));
            }
        }
        if !self.priority_classes.is_empty() && classes.len() != PriorityClass::ALL.len() {
            return Err("priority table must define every class".into());
        }
        self.selector
            .validate()
            .map_err(|e| format!("selector invalid: {e}"))?;
        if self.reconciler.interval_secs == 0 || self.reconciler.tick_interval_ms == 0 {
            return Err("reconciler intervals must be greater than 0".into());
        }
        if self.retry.substrate_attempts == 0 {
            return Err("substrate_attempts must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `.env`, read the file named by [`CONFIG_PATH_ENV`], and apply interval overrides.
    pub fn from_env() -> AppResult<Self> {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                return Err(err).context("failed to load .env");
            }
        }
        let path = std::env::var(CONFIG_PATH_ENV)
            .with_context(|| format!("{CONFIG_PATH_ENV} is not set"))?;
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {path}"))?;
        let mut cfg: Self =
            serde_json::from_str(&raw).with_context(|| format!("failed to parse {path}"))?;
        if let Some(secs) = env_u64(RECONCILE_INTERVAL_ENV)? {
            cfg.reconciler.interval_secs = secs;
        }
        if let Some(ms) = env_u64(TICK_INTERVAL_ENV)? {
            cfg.reconciler.tick_interval_ms = ms;
        }
        cfg.validate().map_err(|e| anyhow::anyhow!("invalid config {path}: {e}"))?;
        tracing::info!(path = %path, clusters = cfg.clusters.len(), "loaded scheduler config");
        Ok(cfg)
    }
}

fn env_u64(name: &str) -> AppResult<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .with_context(|| format!("{name} must be an unsigned integer, got `{raw}`")),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("{name} is not valid unicode")),
    }
}
