//! Cohort-wide share recomputation.
//!
//! Sibling rows of one (entity, period) cohort are always rewritten together; a checksum over
//! the rewritten rows lets a later reader detect a cohort that was only partly applied.

use crate::domain::{Decimal, RatioRecord};
use sha2::{Digest, Sha256};

/// Decimal places kept on stored ratios.
pub const RATIO_SCALE: u32 = 4;

/// Set every record's `ratio = amount / Σ|amount| × 100`, or 0 when the total is 0.
///
/// Ratios are floored to [`RATIO_SCALE`] places and the leftover steps go to the rows with
/// the largest remainders, earliest row first on ties. With non-negative amounts the stored
/// ratios therefore sum to exactly 100 however many siblings the cohort has.
///
/// Returns the cohort total.
pub fn rebalance_ratios(records: &mut [RatioRecord]) -> Decimal {
    let total: Decimal = records.iter().map(|r| r.amount.abs()).sum();
    if total.is_zero() {
        for record in records.iter_mut() {
            record.ratio = Decimal::zero();
        }
        return total;
    }

    let exact: Vec<Decimal> = records
        .iter()
        .map(|r| r.amount / total * Decimal::hundred())
        .collect();
    let target = exact.iter().copied().sum::<Decimal>().round_half_up(RATIO_SCALE);
    let mut ratios: Vec<Decimal> = exact.iter().map(|e| e.floor_dp(RATIO_SCALE)).collect();

    let step = Decimal::step(RATIO_SCALE);
    let mut leftover = target - ratios.iter().copied().sum::<Decimal>();
    let mut by_remainder: Vec<usize> = (0..records.len()).collect();
    by_remainder.sort_by(|&a, &b| (exact[b] - ratios[b]).cmp(&(exact[a] - ratios[a])));
    for i in by_remainder {
        if !leftover.is_positive() {
            break;
        }
        ratios[i] = ratios[i] + step;
        leftover = leftover - step;
    }

    for (record, ratio) in records.iter_mut().zip(ratios) {
        record.ratio = ratio;
    }
    total
}

/// SHA-256 over the cohort's rows in id order, hex encoded.
pub fn cohort_checksum(records: &[RatioRecord]) -> String {
    let mut sorted: Vec<&RatioRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut hasher = Sha256::new();
    for record in sorted {
        hasher.update(record.id.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(record.item_id.as_bytes());
        hasher.update(b"|");
        hasher.update(record.amount.to_canonical_string().as_bytes());
        hasher.update(b"|");
        hasher.update(record.ratio.to_canonical_string().as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
