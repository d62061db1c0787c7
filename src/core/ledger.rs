//! Resource ledger: per-flavor quota usage of every queue pool in a cluster.
//!
//! Usage is grouped by cohort and each cohort sits behind its own lock. All usage
//! mutation, and the status write that accompanies it, happens while holding the
//! cohort lock returned by [`ResourceLedger::lock_pool`]. Lock order is ledger
//! first, store second; the lock is never held across an `.await`.

use std::collections::{BTreeMap, HashMap};

use parking_lot::{Mutex, MutexGuard};

use crate::config::{ClusterConfig, QueueingStrategy};
use crate::core::fair_share::{borrow_allowance, PoolShare};
use crate::core::job::{AdmissionRecord, ResourceRequest};
use crate::core::SchedulerError;
use crate::util::serde::{ClusterId, ResourceKind, ResourceVector};

const SINGLETON_COHORT_PREFIX: &str = "~pool/";

/// Quota and usage of one pool on one flavor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlavorSlot {
    /// Flavor name.
    pub flavor: String,
    /// GPU hardware class of the flavor.
    pub gpu_type: Option<String>,
    /// Guaranteed quota.
    pub nominal: ResourceVector,
    /// Maximum usage above nominal.
    pub borrowing_limit: ResourceVector,
    /// Cap on lent capacity.
    pub lending_limit: Option<ResourceVector>,
    /// Current usage.
    pub used: ResourceVector,
}

impl FlavorSlot {
    /// Usage above nominal.
    pub fn borrowed(&self) -> ResourceVector {
        self.used.saturating_sub(&self.nominal)
    }

    /// Whether the flavor's hardware class can serve the request.
    pub fn accepts(&self, request: &ResourceRequest) -> bool {
        match &self.gpu_type {
            Some(offered) => request
                .gpu_type
                .as_ref()
                .is_none_or(|wanted| wanted == offered),
            None => request.gpu_count == 0,
        }
    }

    fn ceiling(&self) -> ResourceVector {
        self.nominal.saturating_add(&self.borrowing_limit)
    }
}

/// Usage of one pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolUsage {
    /// Pool name.
    pub name: String,
    /// Fair-share weight.
    pub weight: u32,
    /// Admission order.
    pub strategy: QueueingStrategy,
    /// Flavor slots in preference order.
    pub slots: Vec<FlavorSlot>,
}

/// A pool-and-flavor placement for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// Pool charged.
    pub pool: String,
    /// Flavor charged.
    pub flavor: String,
    /// Quantity charged.
    pub usage: ResourceVector,
    /// Part of `usage` above the pool's nominal quota.
    pub borrowed: ResourceVector,
}

/// Usage of every pool in one cohort. Cloning gives a snapshot for simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortUsage {
    /// Cohort key.
    pub name: String,
    /// Member pools in configuration order.
    pub pools: Vec<PoolUsage>,
}

impl CohortUsage {
    /// Pool by name.
    pub fn pool(&self, name: &str) -> Option<&PoolUsage> {
        self.pools.iter().find(|p| p.name == name)
    }

    /// Slot of `pool` on `flavor`.
    pub fn slot(&self, pool: &str, flavor: &str) -> Option<&FlavorSlot> {
        self.pool(pool)?.slots.iter().find(|s| s.flavor == flavor)
    }

    fn slot_mut(&mut self, pool: &str, flavor: &str) -> Option<&mut FlavorSlot> {
        self.pools
            .iter_mut()
            .find(|p| p.name == pool)?
            .slots
            .iter_mut()
            .find(|s| s.flavor == flavor)
    }

    fn slots_on<'a>(&'a self, flavor: &'a str) -> impl Iterator<Item = (&'a PoolUsage, &'a FlavorSlot)> + 'a {
        self.pools.iter().filter_map(move |p| {
            p.slots
                .iter()
                .find(|s| s.flavor == flavor)
                .map(|s| (p, s))
        })
    }

    /// Cohort-wide `(used, nominal)` on a flavor.
    pub fn flavor_totals(&self, flavor: &str) -> (ResourceVector, ResourceVector) {
        self.slots_on(flavor)
            .fold((ResourceVector::ZERO, ResourceVector::ZERO), |(used, nominal), (_, s)| {
                (used.saturating_add(&s.used), nominal.saturating_add(&s.nominal))
            })
    }

    /// Fair-share inputs for every pool holding `flavor`.
    pub fn shares(&self, flavor: &str) -> Vec<PoolShare> {
        self.slots_on(flavor)
            .map(|(p, s)| PoolShare {
                pool: p.name.clone(),
                weight: p.weight,
                nominal: s.nominal,
                used: s.used,
                lending_limit: s.lending_limit,
                borrowing_limit: s.borrowing_limit,
            })
            .collect()
    }

    /// Names of `pool`'s flavors that can serve the request, in preference order.
    pub fn compatible_flavors(&self, pool: &str, request: &ResourceRequest) -> Vec<String> {
        self.pool(pool)
            .map(|p| {
                p.slots
                    .iter()
                    .filter(|s| s.accepts(request))
                    .map(|s| s.flavor.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Try to place `request` on one flavor of `pool` against current usage.
    ///
    /// Fits within nominal first; otherwise borrows within the borrowing limit and
    /// the fair-share allowance. The cohort's aggregate nominal is never exceeded.
    pub fn assign_on(&self, pool: &str, flavor: &str, request: ResourceVector) -> Option<Assignment> {
        let slot = self.slot(pool, flavor)?;
        let (cohort_used, cohort_nominal) = self.flavor_totals(flavor);
        if !cohort_used.saturating_add(&request).fits_within(&cohort_nominal) {
            return None;
        }
        let after = slot.used.saturating_add(&request);
        if after.fits_within(&slot.nominal) {
            return Some(Assignment {
                pool: pool.to_string(),
                flavor: flavor.to_string(),
                usage: request,
                borrowed: ResourceVector::ZERO,
            });
        }
        if !after.fits_within(&slot.ceiling()) {
            return None;
        }
        let extra = after.saturating_sub(&slot.nominal).saturating_sub(&slot.borrowed());
        let allowance = borrow_allowance(&self.shares(flavor), pool);
        if !extra.fits_within(&allowance) {
            return None;
        }
        Some(Assignment {
            pool: pool.to_string(),
            flavor: flavor.to_string(),
            usage: request,
            borrowed: extra,
        })
    }

    /// First compatible flavor of `pool` that admits the request now.
    pub fn assign(&self, pool: &str, request: &ResourceRequest) -> Option<Assignment> {
        let quantity = request.quota_vector();
        self.pool(pool)?
            .slots
            .iter()
            .filter(|s| s.accepts(request))
            .find_map(|s| self.assign_on(pool, &s.flavor, quantity))
    }

    /// Whether the request could fit on some flavor with the whole cohort idle.
    pub fn can_ever_fit(&self, pool: &str, request: &ResourceRequest) -> bool {
        let quantity = request.quota_vector();
        let Some(p) = self.pool(pool) else {
            return false;
        };
        p.slots.iter().filter(|s| s.accepts(request)).any(|s| {
            let (_, cohort_nominal) = self.flavor_totals(&s.flavor);
            quantity.fits_within(&s.ceiling()) && quantity.fits_within(&cohort_nominal)
        })
    }

    /// Add usage.
    pub fn charge(&mut self, pool: &str, flavor: &str, usage: &ResourceVector) -> Result<(), SchedulerError> {
        let slot = self
            .slot_mut(pool, flavor)
            .ok_or_else(|| SchedulerError::UnknownPool(format!("{pool}/{flavor}")))?;
        slot.used = slot.used.saturating_add(usage);
        Ok(())
    }

    /// Remove usage.
    pub fn release(&mut self, pool: &str, flavor: &str, usage: &ResourceVector) -> Result<(), SchedulerError> {
        let slot = self
            .slot_mut(pool, flavor)
            .ok_or_else(|| SchedulerError::UnknownPool(format!("{pool}/{flavor}")))?;
        if !usage.fits_within(&slot.used) {
            tracing::warn!(pool, flavor, used = %slot.used, release = %usage, "releasing more than recorded usage");
        }
        slot.used = slot.used.saturating_sub(usage);
        Ok(())
    }

    /// Remove an admission record's usage.
    pub fn release_record(&mut self, record: &AdmissionRecord) -> Result<(), SchedulerError> {
        self.release(&record.pool, &record.flavor, &record.usage)
    }

    /// True when every slot respects `nominal + borrowing_limit` and every flavor
    /// respects the cohort's aggregate nominal.
    pub fn within_limits(&self) -> bool {
        let slots_ok = self
            .pools
            .iter()
            .flat_map(|p| p.slots.iter())
            .all(|s| s.used.fits_within(&s.ceiling()));
        let cohort_ok = self
            .pools
            .iter()
            .flat_map(|p| p.slots.iter().map(|s| s.flavor.as_str()))
            .all(|flavor| {
                let (used, nominal) = self.flavor_totals(flavor);
                used.fits_within(&nominal)
            });
        slots_ok && cohort_ok
    }

    fn clear(&mut self) {
        for slot in self.pools.iter_mut().flat_map(|p| p.slots.iter_mut()) {
            slot.used = ResourceVector::ZERO;
        }
    }
}

/// Every cohort of a ledger, locked together. See [`ResourceLedger::lock_all`].
pub struct LedgerGuard<'a> {
    pool_cohort: &'a HashMap<String, String>,
    cohorts: BTreeMap<&'a str, MutexGuard<'a, CohortUsage>>,
}

impl LedgerGuard<'_> {
    /// Zero all usage.
    pub fn reset(&mut self) {
        for cohort in self.cohorts.values_mut() {
            cohort.clear();
        }
    }

    /// Charge an admission record.
    pub fn charge(&mut self, record: &AdmissionRecord) -> Result<(), SchedulerError> {
        let cohort = self
            .pool_cohort
            .get(&record.pool)
            .and_then(|key| self.cohorts.get_mut(key.as_str()))
            .ok_or_else(|| SchedulerError::UnknownPool(record.pool.clone()))?;
        cohort.charge(&record.pool, &record.flavor, &record.usage)
    }
}

/// All cohorts of one cluster.
pub struct ResourceLedger {
    cluster: ClusterId,
    cohorts: BTreeMap<String, Mutex<CohortUsage>>,
    pool_cohort: HashMap<String, String>,
}

impl ResourceLedger {
    /// Build an empty ledger from cluster configuration.
    pub fn from_config(cfg: &ClusterConfig) -> Result<Self, SchedulerError> {
        let mut cohorts: BTreeMap<String, CohortUsage> = BTreeMap::new();
        let mut pool_cohort = HashMap::new();
        for pool in &cfg.pools {
            let key = pool.cohort.clone().unwrap_or_else(|| format!("{SINGLETON_COHORT_PREFIX}{}", pool.name));
            let mut slots = Vec::with_capacity(pool.flavors.len());
            for quota in &pool.flavors {
                let flavor = cfg.flavor(&quota.flavor).ok_or_else(|| {
                    SchedulerError::Config(format!(
                        "pool `{}` references unknown flavor `{}`",
                        pool.name, quota.flavor
                    ))
                })?;
                slots.push(FlavorSlot {
                    flavor: flavor.name.clone(),
                    gpu_type: flavor.gpu_type.clone(),
                    nominal: quota.nominal,
                    borrowing_limit: quota.borrowing_limit,
                    lending_limit: quota.lending_limit,
                    used: ResourceVector::ZERO,
                });
            }
            cohorts
                .entry(key.clone())
                .or_insert_with(|| CohortUsage {
                    name: key.clone(),
                    pools: Vec::new(),
                })
                .pools
                .push(PoolUsage {
                    name: pool.name.clone(),
                    weight: pool.weight,
                    strategy: pool.queueing_strategy,
                    slots,
                });
            pool_cohort.insert(pool.name.clone(), key);
        }
        Ok(Self {
            cluster: cfg.id.clone(),
            cohorts: cohorts.into_iter().map(|(k, v)| (k, Mutex::new(v))).collect(),
            pool_cohort,
        })
    }

    /// Cluster the ledger belongs to.
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// True when the pool exists in this cluster.
    pub fn has_pool(&self, pool: &str) -> bool {
        self.pool_cohort.contains_key(pool)
    }

    /// Cohort key of a pool.
    pub fn cohort_of(&self, pool: &str) -> Option<&str> {
        self.pool_cohort.get(pool).map(String::as_str)
    }

    /// Lock the cohort owning `pool`.
    pub fn lock_pool(&self, pool: &str) -> Result<MutexGuard<'_, CohortUsage>, SchedulerError> {
        let key = self
            .pool_cohort
            .get(pool)
            .ok_or_else(|| SchedulerError::UnknownPool(pool.to_string()))?;
        let cohort = self
            .cohorts
            .get(key)
            .ok_or_else(|| SchedulerError::UnknownPool(pool.to_string()))?;
        Ok(cohort.lock())
    }

    /// Lock every cohort, in cohort-name order.
    ///
    /// Held across a whole-ledger rebuild so no admission, release or cancel
    /// lands between reading the store and recharging usage.
    pub fn lock_all(&self) -> LedgerGuard<'_> {
        LedgerGuard {
            pool_cohort: &self.pool_cohort,
            cohorts: self
                .cohorts
                .iter()
                .map(|(key, cohort)| (key.as_str(), cohort.lock()))
                .collect(),
        }
    }

    /// Copy of every cohort's usage.
    pub fn snapshot(&self) -> Vec<CohortUsage> {
        self.cohorts.values().map(|c| c.lock().clone()).collect()
    }

    /// Current usage of a pool on a flavor.
    pub fn usage(&self, pool: &str, flavor: &str) -> Option<ResourceVector> {
        self.lock_pool(pool).ok()?.slot(pool, flavor).map(|s| s.used)
    }

    /// Admission strategy of a pool.
    pub fn strategy(&self, pool: &str) -> Option<QueueingStrategy> {
        self.lock_pool(pool).ok()?.pool(pool).map(|p| p.strategy)
    }

    /// Whether the request fits in `pool` right now.
    pub fn can_fit_now(&self, pool: &str, request: &ResourceRequest) -> bool {
        self.lock_pool(pool)
            .map(|cohort| cohort.assign(pool, request).is_some())
            .unwrap_or(false)
    }

    /// Fraction of nominal quota in use in one dimension across the cluster.
    pub fn utilization(&self, kind: ResourceKind) -> f64 {
        let (used, nominal) = self
            .snapshot()
            .iter()
            .flat_map(|c| c.pools.iter().flat_map(|p| p.slots.iter()))
            .fold((0_u64, 0_u64), |(u, n), s| {
                (u.saturating_add(s.used.get(kind)), n.saturating_add(s.nominal.get(kind)))
            });
        if nominal == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = used as f64 / nominal as f64;
        ratio.min(1.0)
    }
}
