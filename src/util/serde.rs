//! Serializable primitives shared by configuration and core scheduling types.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique job identifier.
pub type JobId = Uuid;

/// Cluster identifier.
pub type ClusterId = String;

/// Label applied to every substrate object this crate creates.
pub const MANAGED_BY_LABEL: &str = "prometheus.ai/managed-by";

/// Value of [`MANAGED_BY_LABEL`] for objects owned by this scheduler.
pub const MANAGED_BY_VALUE: &str = "prometheus-admission";

/// Label carrying the owning job id on substrate objects.
pub const JOB_ID_LABEL: &str = "prometheus.ai/job-id";

/// Priority class of a job. Ordering is `Critical > High > Normal > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    /// Best-effort work.
    Low,
    /// Default class for batch and training work.
    Normal,
    /// Latency-relevant work; default for services.
    High,
    /// Never preempted.
    Critical,
}

impl PriorityClass {
    /// All classes, lowest first.
    pub const ALL: [Self; 4] = [Self::Low, Self::Normal, Self::High, Self::Critical];

    /// Stable lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource dimension tracked by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Whole GPUs of the flavor's hardware class.
    Gpu,
    /// CPU in millicores.
    Cpu,
    /// Memory in MiB.
    Memory,
}

impl ResourceKind {
    /// All dimensions in ledger order.
    pub const ALL: [Self; 3] = [Self::Gpu, Self::Cpu, Self::Memory];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpu => f.write_str("gpu"),
            Self::Cpu => f.write_str("cpu"),
            Self::Memory => f.write_str("memory"),
        }
    }
}

/// Quantity per resource dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceVector {
    /// GPU count.
    #[serde(default)]
    pub gpu: u64,
    /// CPU millicores.
    #[serde(default)]
    pub cpu_millis: u64,
    /// Memory in MiB.
    #[serde(default)]
    pub memory_mib: u64,
}

impl ResourceVector {
    /// The empty vector.
    pub const ZERO: Self = Self::new(0, 0, 0);

    /// Build a vector from its components.
    pub const fn new(gpu: u64, cpu_millis: u64, memory_mib: u64) -> Self {
        Self {
            gpu,
            cpu_millis,
            memory_mib,
        }
    }

    /// Quantity for one dimension.
    pub const fn get(&self, kind: ResourceKind) -> u64 {
        match kind {
            ResourceKind::Gpu => self.gpu,
            ResourceKind::Cpu => self.cpu_millis,
            ResourceKind::Memory => self.memory_mib,
        }
    }

    /// Overwrite one dimension.
    pub fn set(&mut self, kind: ResourceKind, value: u64) {
        match kind {
            ResourceKind::Gpu => self.gpu = value,
            ResourceKind::Cpu => self.cpu_millis = value,
            ResourceKind::Memory => self.memory_mib = value,
        }
    }

    /// True when every dimension is zero.
    pub const fn is_zero(&self) -> bool {
        self.gpu == 0 && self.cpu_millis == 0 && self.memory_mib == 0
    }

    /// True when every dimension of `self` is `<=` the same dimension of `other`.
    pub const fn fits_within(&self, other: &Self) -> bool {
        self.gpu <= other.gpu
            && self.cpu_millis <= other.cpu_millis
            && self.memory_mib <= other.memory_mib
    }

    /// Per-dimension saturating addition.
    #[must_use]
    pub const fn saturating_add(&self, other: &Self) -> Self {
        Self::new(
            self.gpu.saturating_add(other.gpu),
            self.cpu_millis.saturating_add(other.cpu_millis),
            self.memory_mib.saturating_add(other.memory_mib),
        )
    }

    /// Per-dimension saturating subtraction.
    #[must_use]
    pub const fn saturating_sub(&self, other: &Self) -> Self {
        Self::new(
            self.gpu.saturating_sub(other.gpu),
            self.cpu_millis.saturating_sub(other.cpu_millis),
            self.memory_mib.saturating_sub(other.memory_mib),
        )
    }

    /// Iterate `(dimension, quantity)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (ResourceKind, u64)> + '_ {
        ResourceKind::ALL.into_iter().map(move |k| (k, self.get(k)))
    }
}

impl fmt::Display for ResourceVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gpu={} cpu={}m memory={}Mi",
            self.gpu, self.cpu_millis, self.memory_mib
        )
    }
}

/// Placement locality for multi-GPU jobs, tightest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyLevel {
    /// All GPUs on one node.
    Node,
    /// All GPUs within one rack.
    Rack,
    /// All GPUs within one zone.
    Zone,
}

impl TopologyLevel {
    /// Next looser level, if any.
    pub const fn looser(self) -> Option<Self> {
        match self {
            Self::Node => Some(Self::Rack),
            Self::Rack => Some(Self::Zone),
            Self::Zone => None,
        }
    }
}

impl fmt::Display for TopologyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node => f.write_str("node"),
            Self::Rack => f.write_str("rack"),
            Self::Zone => f.write_str("zone"),
        }
    }
}
