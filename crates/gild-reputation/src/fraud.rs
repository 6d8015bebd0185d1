//! Fraud risk evaluation.
//!
//! A stateless mapping from abuse signals to a single non-negative penalty.
//! Each signal contributes independently and is capped on its own, so no
//! single behavior can dominate the penalty past its ceiling.

use serde::{Deserialize, Serialize};

/// Per-occurrence penalty and cap for disputes lost by the user.
pub const DISPUTE_LOST_PENALTY: u32 = 10;
pub const DISPUTE_LOST_CAP: u32 = 30;

/// Disputes opened against or by the user in the recent window.
pub const RECENT_DISPUTE_PENALTY: u32 = 3;
pub const RECENT_DISPUTE_CAP: u32 = 12;

/// Bursts of ratings arriving faster than organic use produces them.
pub const RATING_BURST_PENALTY: u32 = 5;
pub const RATING_BURST_CAP: u32 = 20;

/// Repeated ratings between the same pair of accounts.
pub const DUPLICATE_PAIR_PENALTY: u32 = 4;
pub const DUPLICATE_PAIR_CAP: u32 = 16;

/// Low-effort/spam content flags.
pub const LOW_EFFORT_PENALTY: u32 = 2;
pub const LOW_EFFORT_CAP: u32 = 10;

/// Abuse signal counts feeding the evaluator.
///
/// Counts are unsigned by construction; ingestion boundaries that receive
/// raw signed counters go through [`FraudSignals::from_raw`], which treats
/// negative input as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FraudSignals {
    pub recent_disputes: u32,
    pub disputes_lost: u32,
    pub rating_bursts: u32,
    pub duplicate_pair_ratings: u32,
    pub low_effort_flags: u32,
}

impl FraudSignals {
    /// Build from raw signed counters, clamping negatives to zero.
    pub fn from_raw(
        recent_disputes: i64,
        disputes_lost: i64,
        rating_bursts: i64,
        duplicate_pair_ratings: i64,
        low_effort_flags: i64,
    ) -> Self {
        let clamp = |v: i64| -> u32 { v.max(0).min(u32::MAX as i64) as u32 };
        Self {
            recent_disputes: clamp(recent_disputes),
            disputes_lost: clamp(disputes_lost),
            rating_bursts: clamp(rating_bursts),
            duplicate_pair_ratings: clamp(duplicate_pair_ratings),
            low_effort_flags: clamp(low_effort_flags),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.recent_disputes == 0
            && self.disputes_lost == 0
            && self.rating_bursts == 0
            && self.duplicate_pair_ratings == 0
            && self.low_effort_flags == 0
    }
}

fn capped(count: u32, per: u32, cap: u32) -> u32 {
    count.saturating_mul(per).min(cap)
}

/// Map abuse signals to a non-negative penalty. Pure function.
pub fn evaluate(signals: &FraudSignals) -> u32 {
    capped(signals.disputes_lost, DISPUTE_LOST_PENALTY, DISPUTE_LOST_CAP)
        + capped(
            signals.recent_disputes,
            RECENT_DISPUTE_PENALTY,
            RECENT_DISPUTE_CAP,
        )
        + capped(signals.rating_bursts, RATING_BURST_PENALTY, RATING_BURST_CAP)
        + capped(
            signals.duplicate_pair_ratings,
            DUPLICATE_PAIR_PENALTY,
            DUPLICATE_PAIR_CAP,
        )
        + capped(signals.low_effort_flags, LOW_EFFORT_PENALTY, LOW_EFFORT_CAP)
}

/// Largest penalty the evaluator can produce with every signal saturated.
pub fn max_penalty() -> u32 {
    DISPUTE_LOST_CAP + RECENT_DISPUTE_CAP + RATING_BURST_CAP + DUPLICATE_PAIR_CAP + LOW_EFFORT_CAP
}
