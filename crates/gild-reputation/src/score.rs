//! Composite reputation score calculation.
//!
//! Pure function of its inputs: rating history (Bayesian-shrunk), a
//! platform-trust base, time-decayed behavioral events, and the fraud
//! penalty, combined under explicit versioned weights onto a 0..=100 scale.

use crate::error::{ReputationError, Result};
use crate::events::ReputationEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const RATING_SCALE_MIN: f64 = 1.0;
pub const RATING_SCALE_MAX: f64 = 5.0;
/// Neutral prior for Bayesian shrinkage: the rating-scale midpoint.
pub const RATING_PRIOR: f64 = 3.0;
/// How many synthetic prior ratings the shrinkage assumes.
pub const RATING_PRIOR_WEIGHT: f64 = 5.0;
/// Midpoint of the 0..=100 score scale; components deviate around it.
pub const SCALE_MIDPOINT: f64 = 50.0;

/// Component weights, versioned so historical recomputations stay
/// reproducible when defaults change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub ratings: f64,
    pub platform: f64,
    pub events: f64,
    pub version: u32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            ratings: 0.5,
            platform: 0.3,
            events: 0.2,
            version: 1,
        }
    }
}

/// Exponential decay configuration for event contributions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayConfig {
    pub half_life_days: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            half_life_days: 90.0,
        }
    }
}

/// Component breakdown stored alongside every composite score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub rating_score: f64,
    pub platform_score: f64,
    pub event_score: f64,
    pub fraud_penalty: u32,
    pub weights_version: u32,
}

/// Everything `compute` reads. Borrowed, so the store can pass its event
/// window without cloning.
#[derive(Debug, Clone)]
pub struct ScoreInputs<'a> {
    /// Starting score the weighted deviations adjust.
    pub base: f64,
    /// Mean received rating on the 1..=5 scale, `None` when unrated.
    pub rating_average: Option<f64>,
    pub rating_count: u64,
    /// Pre-normalized [0,100] custody-layer signal, supplied by the caller.
    pub platform_base: f64,
    pub events: &'a [ReputationEvent],
    pub fraud_penalty: u32,
}

fn require_finite(value: f64, what: &str) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ReputationError::MalformedInput(format!(
            "{} is not finite: {}",
            what, value
        )))
    }
}

fn clamp_score(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

/// A single event's decayed, weighted contribution at time `now`.
///
/// `0.5^(age / half_life)` scales the event's `weight * delta`; age is never
/// negative (future-dated events count as age zero).
pub fn decayed_contribution(
    event: &ReputationEvent,
    now: DateTime<Utc>,
    half_life_days: f64,
) -> f64 {
    let age_days = (now - event.created_at).num_seconds().max(0) as f64 / 86_400.0;
    let decay = 0.5f64.powf(age_days / half_life_days);
    event.weight * event.delta * decay
}

/// Bayesian-shrunk rating average, mapped linearly onto [0,100].
fn rating_component(average: Option<f64>, count: u64) -> Result<f64> {
    let shrunk = match (average, count) {
        (None, 0) => RATING_PRIOR,
        (None, _) => {
            return Err(ReputationError::MalformedInput(
                "rating count without a rating average".into(),
            ))
        }
        (Some(_), 0) => {
            return Err(ReputationError::MalformedInput(
                "rating average without any ratings".into(),
            ))
        }
        (Some(avg), n) => {
            let avg = require_finite(avg, "rating average")?;
            if !(RATING_SCALE_MIN..=RATING_SCALE_MAX).contains(&avg) {
                return Err(ReputationError::MalformedInput(format!(
                    "rating average {} outside scale {}..={}",
                    avg, RATING_SCALE_MIN, RATING_SCALE_MAX
                )));
            }
            let n = n as f64;
            (avg * n + RATING_PRIOR * RATING_PRIOR_WEIGHT) / (n + RATING_PRIOR_WEIGHT)
        }
    };

    Ok((shrunk - RATING_SCALE_MIN) / (RATING_SCALE_MAX - RATING_SCALE_MIN) * 100.0)
}

fn event_component(
    events: &[ReputationEvent],
    now: DateTime<Utc>,
    half_life_days: f64,
) -> Result<f64> {
    let mut sum = 0.0;
    for event in events {
        require_finite(event.weight, "event weight")?;
        require_finite(event.delta, "event delta")?;
        sum += decayed_contribution(event, now, half_life_days);
    }
    Ok(clamp_score(SCALE_MIDPOINT + sum))
}

fn validate_weights(weights: &ScoreWeights) -> Result<()> {
    for (value, what) in [
        (weights.ratings, "ratings weight"),
        (weights.platform, "platform weight"),
        (weights.events, "events weight"),
    ] {
        let v = require_finite(value, what)?;
        if v < 0.0 {
            return Err(ReputationError::MalformedInput(format!(
                "{} is negative: {}",
                what, v
            )));
        }
    }
    Ok(())
}

/// Combine all components into the composite score.
///
/// Each component's deviation from the scale midpoint is scaled by its
/// weight and added to `base`; the fraud penalty subtracts directly. The
/// result clamps to [0,100] and rounds to an integer.
pub fn compute(
    inputs: &ScoreInputs<'_>,
    weights: &ScoreWeights,
    decay: &DecayConfig,
    now: DateTime<Utc>,
) -> Result<(u8, ScoreComponents)> {
    if !decay.half_life_days.is_finite() || decay.half_life_days <= 0.0 {
        return Err(ReputationError::InvalidHalfLife(decay.half_life_days));
    }
    validate_weights(weights)?;
    let base = require_finite(inputs.base, "base score")?;
    let platform_raw = require_finite(inputs.platform_base, "platform base")?;

    let rating_score = rating_component(inputs.rating_average, inputs.rating_count)?;
    let platform_score = clamp_score(platform_raw);
    let event_score = event_component(inputs.events, now, decay.half_life_days)?;

    let composite = base
        + weights.ratings * (rating_score - SCALE_MIDPOINT)
        + weights.platform * (platform_score - SCALE_MIDPOINT)
        + weights.events * (event_score - SCALE_MIDPOINT)
        - inputs.fraud_penalty as f64;

    let score = clamp_score(composite).round() as u8;
    let components = ScoreComponents {
        rating_score,
        platform_score,
        event_score,
        fraud_penalty: inputs.fraud_penalty,
        weights_version: weights.version,
    };
    Ok((score, components))
}
