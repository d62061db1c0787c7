//! Weighted fair-share borrowing within a cohort.
//!
//! Pure functions over a usage snapshot of the pools in one cohort that share a
//! flavor. Every dimension is apportioned independently.

use crate::util::serde::{ResourceKind, ResourceVector};

/// One pool's position on a flavor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolShare {
    /// Pool name.
    pub pool: String,
    /// Fair-share weight.
    pub weight: u32,
    /// Guaranteed quota.
    pub nominal: ResourceVector,
    /// Current usage, including borrowed capacity.
    pub used: ResourceVector,
    /// Cap on what the pool lends; `None` lends all unused nominal quota.
    pub lending_limit: Option<ResourceVector>,
    /// Cap on what the pool borrows.
    pub borrowing_limit: ResourceVector,
}

impl PoolShare {
    /// Usage above nominal.
    pub fn borrowed(&self) -> ResourceVector {
        self.used.saturating_sub(&self.nominal)
    }

    /// Unused nominal quota available to other pools.
    pub fn lendable(&self) -> ResourceVector {
        let unused = self.nominal.saturating_sub(&self.used);
        self.lending_limit.map_or(unused, |limit| {
            let mut capped = unused;
            for kind in ResourceKind::ALL {
                capped.set(kind, unused.get(kind).min(limit.get(kind)));
            }
            capped
        })
    }
}

/// `total * weight / total_weight`, rounded down.
pub fn apportion(total: u64, weight: u32, total_weight: u64) -> u64 {
    if total_weight == 0 {
        return 0;
    }
    let share = u128::from(total) * u128::from(weight) / u128::from(total_weight);
    u64::try_from(share).unwrap_or(u64::MAX)
}

/// Additional capacity `pool` may borrow right now.
///
/// The contested capacity is the lendable capacity of every other pool. It is
/// split by weight among the requester and every pool already borrowing in that
/// dimension. The result is further capped by what is still free and by the
/// requester's remaining borrowing limit.
pub fn borrow_allowance(shares: &[PoolShare], pool: &str) -> ResourceVector {
    let Some(me) = shares.iter().find(|s| s.pool == pool) else {
        return ResourceVector::ZERO;
    };
    let my_borrowed = me.borrowed();
    let mut allowance = ResourceVector::ZERO;
    for kind in ResourceKind::ALL {
        let contested: u64 = shares
            .iter()
            .filter(|s| s.pool != pool)
            .map(|s| s.lendable().get(kind))
            .sum();
        let borrowed_by_all: u64 = shares.iter().map(|s| s.borrowed().get(kind)).sum();
        let free = contested.saturating_sub(borrowed_by_all);

        let contender_weight: u64 = shares
            .iter()
            .filter(|s| s.pool == pool || s.borrowed().get(kind) > 0)
            .map(|s| u64::from(s.weight))
            .sum();
        let fair = apportion(contested, me.weight, contender_weight);

        let mine = my_borrowed.get(kind);
        let remaining_limit = me.borrowing_limit.get(kind).saturating_sub(mine);
        let remaining_fair = fair.saturating_sub(mine);
        allowance.set(kind, free.min(remaining_fair).min(remaining_limit));
    }
    allowance
}
