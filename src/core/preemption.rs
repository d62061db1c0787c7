//! Preemption candidate selection.
//!
//! Victims are chosen from admitted jobs of the requester's cohort. A candidate
//! qualifies by priority (strictly lower numeric value, requester's class may
//! preempt) or by reclaim (it borrows from the cohort while the requester only
//! asks for its own nominal quota). `CRITICAL` and non-preemptible jobs never
//! qualify. Among all victim sets that make the request fit, the smallest wins;
//! ties go to the lexicographically first set in [`preemption_order`].

use std::cmp::Ordering;

use crate::config::PriorityClassConfig;
use crate::core::job::{Job, ResourceRequest};
use crate::core::ledger::{Assignment, CohortUsage};
use crate::util::serde::{JobId, PriorityClass, ResourceVector};

/// Candidate lists up to this size are searched exhaustively.
pub const EXHAUSTIVE_SEARCH_LIMIT: usize = 16;

/// Larger lists try every set up to this size before falling back to greedy.
const SMALL_SET_LIMIT: usize = 2;

/// Numeric priority and preemption policy per class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityTable {
    entries: Vec<PriorityClassConfig>,
}

impl PriorityTable {
    /// Table from configuration entries; missing classes fall back to defaults.
    pub fn new(entries: Vec<PriorityClassConfig>) -> Self {
        let mut merged = PriorityClassConfig::defaults();
        for entry in entries {
            if let Some(slot) = merged.iter_mut().find(|e| e.class == entry.class) {
                *slot = entry;
            }
        }
        Self { entries: merged }
    }

    fn entry(&self, class: PriorityClass) -> Option<&PriorityClassConfig> {
        self.entries.iter().find(|e| e.class == class)
    }

    /// Numeric value of a class.
    pub fn value(&self, class: PriorityClass) -> i32 {
        self.entry(class).map_or(0, |e| e.value)
    }

    /// Whether a class may preempt lower classes.
    pub fn can_preempt(&self, class: PriorityClass) -> bool {
        self.entry(class).is_some_and(|e| e.can_preempt)
    }
}

impl Default for PriorityTable {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// An admitted job that might be evicted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Job id.
    pub job_id: JobId,
    /// Pool charged.
    pub pool: String,
    /// Flavor charged.
    pub flavor: String,
    /// Usage held.
    pub usage: ResourceVector,
    /// Borrowed part of the usage.
    pub borrowed: ResourceVector,
    /// Priority class.
    pub priority: PriorityClass,
    /// Numeric priority.
    pub priority_value: i32,
    /// Preemptible flag.
    pub preemptible: bool,
    /// Admission time.
    pub admitted_at_ms: u128,
}

impl Candidate {
    /// Candidate for an admitted job; `None` when it holds no admission.
    pub fn from_job(job: &Job, table: &PriorityTable) -> Option<Self> {
        let record = job.admission.as_ref()?;
        if !job.status.holds_admission() {
            return None;
        }
        Some(Self {
            job_id: job.id,
            pool: record.pool.clone(),
            flavor: record.flavor.clone(),
            usage: record.usage,
            borrowed: record.borrowed,
            priority: job.policy.priority,
            priority_value: table.value(job.policy.priority),
            preemptible: job.policy.preemptible,
            admitted_at_ms: record.admitted_at_ms,
        })
    }
}

/// Eviction preference: lowest priority first, then oldest admission, then id.
pub fn preemption_order(a: &Candidate, b: &Candidate) -> Ordering {
    a.priority_value
        .cmp(&b.priority_value)
        .then_with(|| a.admitted_at_ms.cmp(&b.admitted_at_ms))
        .then_with(|| a.job_id.cmp(&b.job_id))
}

/// The job asking for capacity.
#[derive(Debug, Clone, Copy)]
pub struct Preemptor<'a> {
    /// Requesting job.
    pub job_id: JobId,
    /// Pool to charge.
    pub pool: &'a str,
    /// Resource request.
    pub resources: &'a ResourceRequest,
    /// Numeric priority.
    pub priority_value: i32,
    /// Whether the requester's class may preempt by priority.
    pub can_preempt: bool,
}

/// Victims and the placement they free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreemptionPlan {
    /// Placement after eviction.
    pub assignment: Assignment,
    /// Jobs to evict, in eviction order.
    pub victims: Vec<JobId>,
}

/// Outcome of a victim search.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PreemptionSearch {
    /// Best plan, if any set of eligible victims suffices.
    pub plan: Option<PreemptionPlan>,
    /// Number of eligible candidates across flavors.
    pub eligible: usize,
}

fn eligible(candidate: &Candidate, who: &Preemptor<'_>, flavor: &str, reclaim: bool) -> bool {
    if candidate.job_id == who.job_id
        || candidate.flavor != flavor
        || !candidate.preemptible
        || candidate.priority == PriorityClass::Critical
    {
        return false;
    }
    let by_priority = who.can_preempt && candidate.priority_value < who.priority_value;
    let by_reclaim = reclaim && candidate.pool != who.pool && !candidate.borrowed.is_zero();
    by_priority || by_reclaim
}

fn simulate(usage: &CohortUsage, who: &Preemptor<'_>, flavor: &str, victims: &[&Candidate]) -> Option<Assignment> {
    let mut sim = usage.clone();
    for victim in victims {
        sim.release(&victim.pool, &victim.flavor, &victim.usage).ok()?;
    }
    sim.assign_on(who.pool, flavor, who.resources.quota_vector())
}

/// Advance `idx` to the next k-combination of `0..n` in lexicographic order.
fn next_combination(idx: &mut [usize], n: usize) -> bool {
    let k = idx.len();
    let mut i = k;
    while i > 0 {
        i -= 1;
        if idx[i] < n - k + i {
            idx[i] += 1;
            for j in i + 1..k {
                idx[j] = idx[j - 1] + 1;
            }
            return true;
        }
    }
    false
}

fn exhaustive(
    usage: &CohortUsage,
    who: &Preemptor<'_>,
    flavor: &str,
    pool: &[&Candidate],
    max_size: usize,
) -> Option<(Assignment, Vec<JobId>)> {
    let n = pool.len();
    for k in 1..=max_size.min(n) {
        let mut idx: Vec<usize> = (0..k).collect();
        loop {
            let chosen: Vec<&Candidate> = idx.iter().map(|&i| pool[i]).collect();
            if let Some(assignment) = simulate(usage, who, flavor, &chosen) {
                return Some((assignment, chosen.iter().map(|c| c.job_id).collect()));
            }
            if !next_combination(&mut idx, n) {
                break;
            }
        }
    }
    None
}

fn greedy(
    usage: &CohortUsage,
    who: &Preemptor<'_>,
    flavor: &str,
    pool: &[&Candidate],
) -> Option<(Assignment, Vec<JobId>)> {
    let mut chosen: Vec<&Candidate> = Vec::new();
    let mut fitted = None;
    for &candidate in pool {
        chosen.push(candidate);
        if let Some(assignment) = simulate(usage, who, flavor, &chosen) {
            fitted = Some(assignment);
            break;
        }
    }
    let mut assignment = fitted?;
    // Drop victims that turned out unnecessary, most valuable first.
    let mut i = chosen.len();
    while i > 0 {
        i -= 1;
        let mut without = chosen.clone();
        without.remove(i);
        if let Some(smaller) = simulate(usage, who, flavor, &without) {
            chosen = without;
            assignment = smaller;
        }
    }
    Some((assignment, chosen.iter().map(|c| c.job_id).collect()))
}

/// Find the minimal victim set that lets `who` fit on one of its pool's flavors.
pub fn select_victims(usage: &CohortUsage, who: &Preemptor<'_>, candidates: &[Candidate]) -> PreemptionSearch {
    let request = who.resources.quota_vector();
    let mut search = PreemptionSearch::default();
    for flavor in usage.compatible_flavors(who.pool, who.resources) {
        let Some(slot) = usage.slot(who.pool, &flavor) else {
            continue;
        };
        let reclaim = slot.used.saturating_add(&request).fits_within(&slot.nominal);
        let mut pool: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| usage.slot(&c.pool, &c.flavor).is_some())
            .filter(|c| eligible(c, who, &flavor, reclaim))
            .collect();
        if pool.is_empty() {
            continue;
        }
        pool.sort_by(|a, b| preemption_order(a, b));
        search.eligible += pool.len();

        let found = if pool.len() <= EXHAUSTIVE_SEARCH_LIMIT {
            exhaustive(usage, who, &flavor, &pool, pool.len())
        } else {
            exhaustive(usage, who, &flavor, &pool, SMALL_SET_LIMIT)
                .or_else(|| greedy(usage, who, &flavor, &pool))
        };
        if let Some((assignment, victims)) = found {
            let better = search
                .plan
                .as_ref()
                .is_none_or(|best| victims.len() < best.victims.len());
            if better {
                search.plan = Some(PreemptionPlan { assignment, victims });
            }
        }
    }
    search
}
