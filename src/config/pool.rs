//! Cluster, flavor, queue-pool and queue configuration structures.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::util::serde::ResourceVector;

/// Named class of homogeneous capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlavorConfig {
    /// Flavor name, unique within a cluster.
    pub name: String,
    /// GPU hardware class; `None` for CPU-only flavors.
    #[serde(default)]
    pub gpu_type: Option<String>,
    /// Free-form labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl FlavorConfig {
    /// GPU flavor of `gpu_type`.
    pub fn gpu(name: impl Into<String>, gpu_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            gpu_type: Some(gpu_type.into()),
            labels: BTreeMap::new(),
        }
    }

    /// CPU-only flavor.
    pub fn cpu(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            gpu_type: None,
            labels: BTreeMap::new(),
        }
    }

    /// Add a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Quota a pool holds on one flavor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlavorQuotaConfig {
    /// Flavor name.
    pub flavor: String,
    /// Guaranteed quota.
    pub nominal: ResourceVector,
    /// Maximum usage above nominal, borrowed from the cohort.
    #[serde(default)]
    pub borrowing_limit: ResourceVector,
    /// Maximum of the unused nominal quota other pools may borrow; `None` lends all of it.
    #[serde(default)]
    pub lending_limit: Option<ResourceVector>,
}

impl FlavorQuotaConfig {
    /// Quota with no borrowing.
    pub fn new(flavor: impl Into<String>, nominal: ResourceVector) -> Self {
        Self {
            flavor: flavor.into(),
            nominal,
            borrowing_limit: ResourceVector::ZERO,
            lending_limit: None,
        }
    }

    /// Set the borrowing limit.
    #[must_use]
    pub const fn with_borrowing_limit(mut self, limit: ResourceVector) -> Self {
        self.borrowing_limit = limit;
        self
    }

    /// Set the lending limit.
    #[must_use]
    pub const fn with_lending_limit(mut self, limit: ResourceVector) -> Self {
        self.lending_limit = Some(limit);
        self
    }
}

/// Admission order within a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueingStrategy {
    /// A blocked head blocks every later job of the pool.
    #[default]
    StrictFifo,
    /// Later jobs may be admitted past a blocked head.
    BestEffortFifo,
}

/// Quota owner for one or more flavors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePoolConfig {
    /// Pool name, unique within a cluster.
    pub name: String,
    /// Cohort; `None` makes the pool its own singleton cohort.
    #[serde(default)]
    pub cohort: Option<String>,
    /// Fair-share weight among borrowing pools.
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Admission order within the pool.
    #[serde(default)]
    pub queueing_strategy: QueueingStrategy,
    /// Flavor quotas in preference order.
    pub flavors: Vec<FlavorQuotaConfig>,
}

const fn default_weight() -> u32 {
    1
}

impl QueuePoolConfig {
    /// Pool with no flavors and weight 1.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cohort: None,
            weight: default_weight(),
            queueing_strategy: QueueingStrategy::default(),
            flavors: Vec::new(),
        }
    }

    /// Join a cohort.
    #[must_use]
    pub fn with_cohort(mut self, cohort: impl Into<String>) -> Self {
        self.cohort = Some(cohort.into());
        self
    }

    /// Set the fair-share weight.
    #[must_use]
    pub const fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Set the queueing strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: QueueingStrategy) -> Self {
        self.queueing_strategy = strategy;
        self
    }

    /// Append a flavor quota.
    #[must_use]
    pub fn with_flavor(mut self, quota: FlavorQuotaConfig) -> Self {
        self.flavors.push(quota);
        self
    }

    /// Validate pool values.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("pool name must not be empty".into());
        }
        if self.weight == 0 {
            return Err("weight must be greater than 0".into());
        }
        if self.flavors.is_empty() {
            return Err("at least one flavor quota must be defined".into());
        }
        let mut seen = BTreeSet::new();
        for quota in &self.flavors {
            if !seen.insert(quota.flavor.as_str()) {
                return Err(format!("flavor `{}` listed twice", quota.flavor));
            }
            if let Some(lending) = quota.lending_limit {
                if !lending.fits_within(&quota.nominal) {
                    return Err(format!(
                        "flavor `{}` lending limit exceeds nominal quota",
                        quota.flavor
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Fair-share group of pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortConfig {
    /// Cohort name.
    pub name: String,
}

/// Namespace-scoped submission entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Tenant namespace.
    pub namespace: String,
    /// Queue name within the namespace.
    pub name: String,
    /// Pool the queue feeds.
    pub pool: String,
}

/// One managed cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster id.
    pub id: String,
    /// Compliance and placement labels (e.g. `region`).
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// On-demand cost per hour.
    #[serde(default)]
    pub cost_per_hour: f64,
    /// Spot cost per hour, when spot capacity exists.
    #[serde(default)]
    pub spot_cost_per_hour: Option<f64>,
    /// Typical request latency in milliseconds.
    #[serde(default)]
    pub latency_ms: u32,
    /// Flavors offered.
    pub flavors: Vec<FlavorConfig>,
    /// Cohorts.
    #[serde(default)]
    pub cohorts: Vec<CohortConfig>,
    /// Queue pools.
    pub pools: Vec<QueuePoolConfig>,
}

impl ClusterConfig {
    /// Empty cluster.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            labels: BTreeMap::new(),
            cost_per_hour: 0.0,
            spot_cost_per_hour: None,
            latency_ms: 0,
            flavors: Vec::new(),
            cohorts: Vec::new(),
            pools: Vec::new(),
        }
    }

    /// Add a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Set on-demand and spot cost.
    #[must_use]
    pub const fn with_cost(mut self, per_hour: f64, spot_per_hour: Option<f64>) -> Self {
        self.cost_per_hour = per_hour;
        self.spot_cost_per_hour = spot_per_hour;
        self
    }

    /// Set typical latency.
    #[must_use]
    pub const fn with_latency_ms(mut self, latency_ms: u32) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Add a flavor.
    #[must_use]
    pub fn with_flavor(mut self, flavor: FlavorConfig) -> Self {
        self.flavors.push(flavor);
        self
    }

    /// Add a cohort.
    #[must_use]
    pub fn with_cohort(mut self, name: impl Into<String>) -> Self {
        self.cohorts.push(CohortConfig { name: name.into() });
        self
    }

    /// Add a pool.
    #[must_use]
    pub fn with_pool(mut self, pool: QueuePoolConfig) -> Self {
        self.pools.push(pool);
        self
    }

    /// Flavor by name.
    pub fn flavor(&self, name: &str) -> Option<&FlavorConfig> {
        self.flavors.iter().find(|f| f.name == name)
    }

    /// Pool by name.
    pub fn pool(&self, name: &str) -> Option<&QueuePoolConfig> {
        self.pools.iter().find(|p| p.name == name)
    }

    /// Validate the cluster and every pool in it.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("cluster id must not be empty".into());
        }
        if !self.cost_per_hour.is_finite() || self.cost_per_hour < 0.0 {
            return Err("cost_per_hour must be a non-negative number".into());
        }
        if let Some(spot) = self.spot_cost_per_hour {
            if !spot.is_finite() || spot < 0.0 {
                return Err("spot_cost_per_hour must be a non-negative number".into());
            }
        }
        let mut flavors = BTreeSet::new();
        for flavor in &self.flavors {
            if !flavors.insert(flavor.name.as_str()) {
                return Err(format!("flavor `{}` defined twice", flavor.name));
            }
        }
        let cohorts: BTreeSet<&str> = self.cohorts.iter().map(|c| c.name.as_str()).collect();
        if self.pools.is_empty() {
            return Err("at least one pool must be defined".into());
        }
        let mut pools = BTreeSet::new();
        for pool in &self.pools {
            pool.validate()
                .map_err(|e| format!("pool `{}` invalid: {e}", pool.name))?;
            if !pools.insert(pool.name.as_str()) {
                return Err(format!("pool `{}` defined twice", pool.name));
            }
            if let Some(cohort) = &pool.cohort {
                if !cohorts.contains(cohort.as_str()) {
                    return Err(format!(
                        "pool `{}` references unknown cohort `{cohort}`",
                        pool.name
                    ));
                }
            }
            for quota in &pool.flavors {
                if !flavors.contains(quota.flavor.as_str()) {
                    return Err(format!(
                        "pool `{}` references unknown flavor `{}`",
                        pool.name, quota.flavor
                    ));
                }
            }
        }
        Ok(())
    }
}
