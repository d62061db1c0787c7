//! Multi-cluster placement: filter, score, pick.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{ClusterConfig, SelectorConfig};
use crate::core::job::JobSpec;
use crate::core::substrate::ClusterCapacity;
use crate::core::SchedulerError;
use crate::util::serde::{ClusterId, ResourceVector};

/// What the selector knows about one cluster when placing a job.
#[derive(Debug, Clone)]
pub struct ClusterView<'a> {
    /// Cluster configuration.
    pub config: &'a ClusterConfig,
    /// Free capacity from the feed; `None` when the feed failed.
    pub capacity: Option<ClusterCapacity>,
    /// Whether the tenant pool exists and its ledger can fit the request now.
    pub ledger_fits: bool,
    /// Fraction of nominal quota in use in the job's primary dimension.
    pub utilization: f64,
}

/// Score breakdown of a surviving cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterScore {
    /// Cluster id.
    pub cluster: ClusterId,
    /// Weighted total.
    pub total: f64,
    /// Cost component in `[0, 1]`.
    pub cost: f64,
    /// Availability component in `[0, 1]`.
    pub availability: f64,
    /// Latency component in `[0, 1]`.
    pub latency: f64,
    /// Utilization component in `[0, 1]`.
    pub utilization: f64,
}

/// Why a cluster was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// No flavor of the requested GPU type.
    GpuType,
    /// Feed failed or reports too little free capacity.
    Capacity,
    /// Tenant pool missing or full.
    Quota,
    /// A required label is missing or different.
    Compliance(String),
    /// Hourly cost above the budget cap.
    Budget,
}

fn offers_gpu_type(cluster: &ClusterConfig, spec: &JobSpec) -> bool {
    let request = &spec.resources;
    if request.gpu_count == 0 {
        return true;
    }
    cluster.flavors.iter().any(|f| match (&f.gpu_type, &request.gpu_type) {
        (Some(offered), Some(wanted)) => offered == wanted,
        (Some(_), None) => true,
        (None, _) => false,
    })
}

fn compatible_capacity(cluster: &ClusterConfig, capacity: &ClusterCapacity, spec: &JobSpec) -> ResourceVector {
    let request = &spec.resources;
    cluster
        .flavors
        .iter()
        .filter(|f| match (&f.gpu_type, &request.gpu_type) {
            (Some(offered), Some(wanted)) => offered == wanted,
            (Some(_), None) => true,
            (None, _) => request.gpu_count == 0,
        })
        .filter_map(|f| capacity.flavor(&f.name))
        .fold(ResourceVector::ZERO, |acc, c| acc.saturating_add(&c.available))
}

fn hourly_cost(cluster: &ClusterConfig, spec: &JobSpec) -> f64 {
    match cluster.spot_cost_per_hour {
        Some(spot) if spec.intent.spot_eligible => spot,
        _ => cluster.cost_per_hour,
    }
}

/// Reason `view` cannot host `spec`, if any.
pub fn reject(view: &ClusterView<'_>, spec: &JobSpec) -> Option<Rejection> {
    if !offers_gpu_type(view.config, spec) {
        return Some(Rejection::GpuType);
    }
    let Some(capacity) = &view.capacity else {
        return Some(Rejection::Capacity);
    };
    if !spec
        .resources
        .quota_vector()
        .fits_within(&compatible_capacity(view.config, capacity, spec))
    {
        return Some(Rejection::Capacity);
    }
    if !view.ledger_fits {
        return Some(Rejection::Quota);
    }
    for (key, value) in &spec.policy.required_labels {
        if view.config.labels.get(key) != Some(value) {
            return Some(Rejection::Compliance(key.clone()));
        }
    }
    if let Some(cap) = spec.intent.budget_cap_per_hour {
        if hourly_cost(view.config, spec) > cap {
            return Some(Rejection::Budget);
        }
    }
    None
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64
}

/// Score a cluster that passed [`reject`].
pub fn score(view: &ClusterView<'_>, spec: &JobSpec, cfg: &SelectorConfig) -> ClusterScore {
    let cost = 1.0 - (hourly_cost(view.config, spec) / cfg.max_cost_per_hour).clamp(0.0, 1.0);

    let request = spec.resources.quota_vector();
    let available = view
        .capacity
        .as_ref()
        .map(|c| compatible_capacity(view.config, c, spec))
        .unwrap_or_default();
    let headroom = if request.gpu > 0 {
        ratio(available.gpu, request.gpu)
    } else if request.cpu_millis > 0 {
        ratio(available.cpu_millis, request.cpu_millis)
    } else {
        ratio(available.memory_mib, request.memory_mib)
    };
    let availability = headroom.min(cfg.availability_cap) / cfg.availability_cap;

    let latency = if spec.intent.is_latency_sensitive() {
        1.0 - (f64::from(view.config.latency_ms) / f64::from(cfg.max_latency_ms)).clamp(0.0, 1.0)
    } else {
        1.0
    };

    let utilization = 1.0 - view.utilization.clamp(0.0, 1.0);

    let total = cfg.cost_weight * cost
        + cfg.availability_weight * availability
        + cfg.latency_weight * latency
        + cfg.utilization_weight * utilization;
    ClusterScore {
        cluster: view.config.id.clone(),
        total,
        cost,
        availability,
        latency,
        utilization,
    }
}

/// Pick the best cluster. Ties go to the lowest cluster id.
pub fn select_cluster(
    views: &[ClusterView<'_>],
    spec: &JobSpec,
    cfg: &SelectorConfig,
) -> Result<ClusterScore, SchedulerError> {
    let mut rejections: BTreeMap<&str, Rejection> = BTreeMap::new();
    let mut best: Option<ClusterScore> = None;
    let mut ordered: Vec<&ClusterView<'_>> = views.iter().collect();
    ordered.sort_by(|a, b| a.config.id.cmp(&b.config.id));
    for view in ordered {
        if let Some(reason) = reject(view, spec) {
            tracing::debug!(cluster = %view.config.id, ?reason, "cluster filtered out");
            rejections.insert(view.config.id.as_str(), reason);
            continue;
        }
        let scored = score(view, spec, cfg);
        tracing::debug!(cluster = %scored.cluster, total = scored.total, "cluster scored");
        if best.as_ref().is_none_or(|b| scored.total > b.total + f64::EPSILON) {
            best = Some(scored);
        }
    }
    best.ok_or_else(|| {
        let detail = rejections
            .iter()
            .map(|(id, reason)| format!("{id}: {reason:?}"))
            .collect::<Vec<_>>()
            .join(", ");
        SchedulerError::NoClusterAvailable(if detail.is_empty() {
            "no clusters configured".into()
        } else {
            detail
        })
    })
}
