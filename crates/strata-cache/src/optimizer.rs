//! Miss-rate-weighted section sizing.
//!
//! Sections that miss most benefit most from growth; sections that
//! never miss are effectively warm and can shed capacity. Targets are
//! proportional to per-section miss *rates* (not absolute misses, so
//! sections with different access volumes compare fairly), floored at
//! two lines so every section stays functional, and reclaimed from
//! the lowest-miss-rate sections when the proportional targets exceed
//! the budget.

use strata_common::constants::MIN_SECTION_LINES;
use strata_common::types::SectionId;

use crate::stats::SectionStatsSnapshot;

/// The optimizer's view of one section.
#[derive(Debug, Clone)]
pub(crate) struct SectionProfile {
    pub id: SectionId,
    pub size_bytes: usize,
    pub line_size: usize,
    pub stats: SectionStatsSnapshot,
}

/// A planned section size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SectionTarget {
    pub id: SectionId,
    pub size_bytes: usize,
}

/// Computes new section sizes for `total_budget` bytes.
///
/// Returns `None` when there is nothing to do: fewer than two
/// sections, or no recorded misses. The plan lists shrinking sections
/// before growing ones (shrinks release the budget the grows consume)
/// and orders each group by descending size delta.
pub(crate) fn rebalance(
    profiles: &[SectionProfile],
    total_budget: usize,
) -> Option<Vec<SectionTarget>> {
    if profiles.len() <= 1 {
        return None;
    }
    let total_misses: u64 = profiles.iter().map(|p| p.stats.misses).sum();
    if total_misses == 0 {
        return None;
    }

    let weights: Vec<f64> = profiles.iter().map(|p| p.stats.miss_rate()).collect();
    let weight_sum: f64 = weights.iter().sum();
    if weight_sum <= 0.0 {
        return None;
    }

    let mut targets: Vec<usize> = profiles
        .iter()
        .zip(&weights)
        .map(|(profile, weight)| {
            let share = (weight / weight_sum * total_budget as f64) as usize;
            share.max(MIN_SECTION_LINES * profile.line_size)
        })
        .collect();

    // The per-section floors can push the sum past the budget;
    // reclaim the excess from the lowest-miss-rate sections first.
    let mut excess = targets.iter().sum::<usize>().saturating_sub(total_budget);
    if excess > 0 {
        let mut order: Vec<usize> = (0..profiles.len()).collect();
        order.sort_by(|&a, &b| {
            weights[a]
                .partial_cmp(&weights[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for idx in order {
            if excess == 0 {
                break;
            }
            let floor = MIN_SECTION_LINES * profiles[idx].line_size;
            let reducible = targets[idx].saturating_sub(floor);
            let cut = reducible.min(excess);
            targets[idx] -= cut;
            excess -= cut;
        }
        if excess > 0 {
            return None;
        }
    }

    let mut plan: Vec<(SectionTarget, isize)> = profiles
        .iter()
        .zip(targets)
        .map(|(profile, size_bytes)| {
            let delta = size_bytes as isize - profile.size_bytes as isize;
            (
                SectionTarget {
                    id: profile.id,
                    size_bytes,
                },
                delta,
            )
        })
        .filter(|(_, delta)| *delta != 0)
        .collect();

    if plan.is_empty() {
        return None;
    }

    plan.sort_by_key(|&(_, delta)| (delta >= 0, -delta.abs()));
    Some(plan.into_iter().map(|(target, _)| target).collect())
}
