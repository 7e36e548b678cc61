//! Ebbinghaus-style exponential decay (§3, §8 invariant 3).

use chrono::{DateTime, Utc};

/// `confidence * exp(-decay_rate * max(0, days_since(last_reinforced, now)))`.
///
/// Monotonically non-increasing in elapsed time absent reinforcement; never
/// negative (confidence and the exponential term are both non-negative).
pub fn effective_confidence(
    confidence: f64,
    decay_rate: f64,
    last_reinforced: DateTime<Utc>,
    now: DateTime<Utc>,
) -> f64 {
    let elapsed_days = (now - last_reinforced).num_milliseconds() as f64 / 86_400_000.0;
    let days = elapsed_days.max(0.0);
    (confidence * (-decay_rate * days).exp()).max(0.0)
}

/// Whole (possibly fractional, floored) days elapsed since `last_reinforced`.
pub fn days_since(last_reinforced: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    ((now - last_reinforced).num_milliseconds() as f64 / 86_400_000.0).max(0.0)
}
