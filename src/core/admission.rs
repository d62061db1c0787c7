//! Admission decisions over a locked cohort snapshot.
//!
//! [`decide`] is deterministic for a given usage snapshot and candidate list:
//! admit within nominal or borrowed quota, otherwise pick a preemption plan,
//! otherwise queue.

use serde::{Deserialize, Serialize};

use crate::core::job::{AdmissionRecord, TopologyOffer};
use crate::core::ledger::{Assignment, CohortUsage};
use crate::core::preemption::{select_victims, Candidate, Preemptor};
use crate::core::substrate::FlavorCapacity;
use crate::util::serde::{JobId, TopologyLevel};

/// Why a job stays queued. Neither case is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueReason {
    /// No quota and nothing eligible for preemption.
    QuotaExceeded,
    /// Eligible victims exist but no set of them frees enough.
    PreemptionInfeasible,
    /// Quota fits but the capacity feed could not confirm placement.
    CapacityUnknown,
    /// Quota fits but the cluster has too few free GPUs right now.
    CapacityPressure,
    /// An earlier job of a strict-FIFO pool is blocked.
    BlockedByHead,
}

impl QueueReason {
    /// Human-readable message.
    pub const fn message(self) -> &'static str {
        match self {
            Self::QuotaExceeded => "quota exceeded",
            Self::PreemptionInfeasible => "preemption infeasible",
            Self::CapacityUnknown => "capacity unknown",
            Self::CapacityPressure => "waiting for free capacity",
            Self::BlockedByHead => "blocked by queue head",
        }
    }
}

/// Decision for one job against one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Admit now.
    Admit(Assignment),
    /// Evict `victims`, then retry.
    Preempt {
        /// Placement the eviction frees.
        assignment: Assignment,
        /// Jobs to evict.
        victims: Vec<JobId>,
    },
    /// Stay queued.
    Queue(QueueReason),
}

/// Result of one admission attempt, as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// Job holds ledger usage.
    Admitted(AdmissionRecord),
    /// Job waits.
    Queued(QueueReason),
    /// Requested topology is fragmented; a looser level was offered.
    TopologyOffered(TopologyOffer),
    /// Job failed permanently.
    Failed(String),
    /// Job changed concurrently and was left alone.
    Skipped,
}

/// Decide admission for `who`. With `allow_preemption` false the search is skipped.
pub fn decide(
    usage: &CohortUsage,
    who: &Preemptor<'_>,
    candidates: &[Candidate],
    allow_preemption: bool,
) -> AdmissionDecision {
    if let Some(assignment) = usage.assign(who.pool, who.resources) {
        return AdmissionDecision::Admit(assignment);
    }
    if !allow_preemption {
        return AdmissionDecision::Queue(QueueReason::QuotaExceeded);
    }
    let search = select_victims(usage, who, candidates);
    match search.plan {
        Some(plan) => AdmissionDecision::Preempt {
            assignment: plan.assignment,
            victims: plan.victims,
        },
        None if search.eligible > 0 => AdmissionDecision::Queue(QueueReason::PreemptionInfeasible),
        None => AdmissionDecision::Queue(QueueReason::QuotaExceeded),
    }
}

/// Physical placement check for a topology-constrained request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyFit {
    /// Requested level is placeable.
    Fits,
    /// Only a looser level is placeable; `None` means no locality at all.
    Relaxed(Option<TopologyLevel>),
    /// Too few GPUs are free anywhere right now.
    Insufficient,
    /// The flavor could never hold the request.
    Infeasible,
    /// No capacity information for the flavor.
    Unknown,
}

/// Check `gpus` against the free blocks of a flavor, relaxing node, rack, zone, none.
pub fn topology_fit(requested: TopologyLevel, gpus: u64, capacity: Option<&FlavorCapacity>) -> TopologyFit {
    let Some(capacity) = capacity else {
        return TopologyFit::Unknown;
    };
    if capacity.installed_gpus.is_some_and(|installed| installed < gpus) {
        return TopologyFit::Infeasible;
    }
    if capacity.available.gpu < gpus {
        return TopologyFit::Insufficient;
    }
    if capacity.block_at(requested) >= gpus {
        return TopologyFit::Fits;
    }
    let mut level = requested.looser();
    while let Some(candidate) = level {
        if capacity.block_at(candidate) >= gpus {
            return TopologyFit::Relaxed(Some(candidate));
        }
        level = candidate.looser();
    }
    TopologyFit::Relaxed(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusterConfig, FlavorConfig, FlavorQuotaConfig, QueuePoolConfig};
    use crate::core::job::ResourceRequest;
    use crate::core::ledger::ResourceLedger;
    use crate::core::preemption::PriorityTable;
    use crate::util::serde::{PriorityClass, ResourceVector};
    use uuid::Uuid;

    fn usage() -> CohortUsage {
        let cfg = ClusterConfig::new("c1")
            .with_flavor(FlavorConfig::gpu("a100", "a100"))
            .with_pool(
                QueuePoolConfig::new("p")
                    .with_flavor(FlavorQuotaConfig::new("a100", ResourceVector::new(10, 0, 0))),
            );
        let ledger = ResourceLedger::from_config(&cfg).unwrap();
        let snapshot = ledger.lock_pool("p").unwrap().clone();
        snapshot
    }

    fn who(request: &ResourceRequest, class: PriorityClass) -> Preemptor<'_> {
        let table = PriorityTable::default();
        Preemptor {
            job_id: Uuid::new_v4(),
            pool: "p",
            resources: request,
            priority_value: table.value(class),
            can_preempt: table.can_preempt(class),
        }
    }

    #[test]
    fn test_scenario_ten_gpus() {
        let mut usage = usage();
        let table = PriorityTable::default();
        let x = Candidate {
            job_id: Uuid::new_v4(),
            pool: "p".into(),
            flavor: "a100".into(),
            usage: ResourceVector::new(6, 0, 0),
            borrowed: ResourceVector::ZERO,
            priority: PriorityClass::Normal,
            priority_value: table.value(PriorityClass::Normal),
            preemptible: true,
            admitted_at_ms: 1,
        };
        usage.charge("p", "a100", &x.usage).unwrap();

        let request = ResourceRequest::gpus("a100", 6);
        let decision = decide(&usage, &who(&request, PriorityClass::Critical), std::slice::from_ref(&x), true);
        match decision {
            AdmissionDecision::Preempt { victims, assignment } => {
                assert_eq!(victims, vec![x.job_id]);
                assert_eq!(assignment.usage.gpu, 6);
            }
            other => panic!("expected preemption, got {other:?}"),
        }

        // Deterministic against the same snapshot.
        let again = decide(&usage, &who(&request, PriorityClass::Critical), std::slice::from_ref(&x), true);
        assert!(matches!(again, AdmissionDecision::Preempt { .. }));

        // A LOW job cannot preempt and stays queued.
        let low = decide(&usage, &who(&request, PriorityClass::Low), &[x], true);
        assert_eq!(low, AdmissionDecision::Queue(QueueReason::QuotaExceeded));
    }

    #[test]
    fn test_admit_without_preemption() {
        let usage = usage();
        let request = ResourceRequest::gpus("a100", 4);
        assert!(matches!(
            decide(&usage, &who(&request, PriorityClass::Normal), &[], false),
            AdmissionDecision::Admit(_)
        ));
    }

    #[test]
    fn test_topology_relaxation_chain() {
        let cap = FlavorCapacity::new(ResourceVector::new(8, 0, 0))
            .with_block(TopologyLevel::Node, 2)
            .with_block(TopologyLevel::Rack, 4)
            .with_block(TopologyLevel::Zone, 6);
        assert_eq!(topology_fit(TopologyLevel::Node, 2, Some(&cap)), TopologyFit::Fits);
        assert_eq!(
            topology_fit(TopologyLevel::Node, 4, Some(&cap)),
            TopologyFit::Relaxed(Some(TopologyLevel::Rack))
        );
        assert_eq!(topology_fit(TopologyLevel::Node, 8, Some(&cap)), TopologyFit::Relaxed(None));
        assert_eq!(topology_fit(TopologyLevel::Node, 9, Some(&cap)), TopologyFit::Insufficient);
        let installed = cap.clone().with_installed_gpus(8);
        assert_eq!(topology_fit(TopologyLevel::Node, 9, Some(&installed)), TopologyFit::Infeasible);
        assert_eq!(topology_fit(TopologyLevel::Node, 1, None), TopologyFit::Unknown);
    }
}
