//! Adaptive difficulty suggestions.
//!
//! Advisory only: the suggestion is attached to the block-end result and the
//! caller decides whether to apply it to the *next* session. Nothing here
//! mutates session state.

use serde::{Deserialize, Serialize};

use crate::config::{DEMOTION_THRESHOLD, PROMOTION_THRESHOLD};
use crate::evaluator::AccuracyReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Adjustment {
    Promote,
    Demote,
    Maintain,
}

/// Promote when every active channel clears the promotion threshold; demote
/// when any channel falls below the demotion threshold; otherwise hold.
pub fn suggest_adjustment(report: &AccuracyReport) -> Adjustment {
    if report.channels.is_empty() {
        return Adjustment::Maintain;
    }
    if report
        .channels
        .iter()
        .all(|c| c.accuracy >= PROMOTION_THRESHOLD)
    {
        return Adjustment::Promote;
    }
    if report
        .channels
        .iter()
        .any(|c| c.accuracy < DEMOTION_THRESHOLD)
    {
        return Adjustment::Demote;
    }
    Adjustment::Maintain
}

/// The n-level a suggestion implies for the next block, clamped to the
/// allowed range.
pub fn next_n_level(current: u32, adjustment: Adjustment) -> u32 {
    use crate::config::{MAX_N_LEVEL, MIN_N_LEVEL};
    match adjustment {
        Adjustment::Promote => (current + 1).min(MAX_N_LEVEL),
        Adjustment::Demote => current.saturating_sub(1).max(MIN_N_LEVEL),
        Adjustment::Maintain => current,
    }
}
