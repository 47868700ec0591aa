//! Activity load estimation
//!
//! Scores recent exertion on 0-100 where higher means less fatigued. Sources
//! are tried in priority order and the first one with data inside the 24h
//! window wins:
//!
//! 1. Workouts: `100 - calories / 20`
//! 2. Active calories: `100 - calories / 30`
//! 3. Steps: `100 - steps / 150`
//! 4. Nothing tracked: `100`
//!
//! Having no tracked activity at all scores as fully rested.

use chrono::{DateTime, Duration, Utc};

use crate::models::{ActivitySource, CanonicalHealthRecord, HealthMetric};
use crate::scale::clamp_score;

/// Lookback window for every activity tier
pub const ACTIVITY_WINDOW_HOURS: i64 = 24;

/// Score used when no tier has data
pub const NO_ACTIVITY_SCORE: f64 = 100.0;

/// Sums a tier's samples in the window; `None` when the tier has no samples there
type TierTotal = fn(&CanonicalHealthRecord, DateTime<Utc>) -> Option<f64>;

/// One entry of the activity fallback chain
#[derive(Clone)]
pub struct ActivityTier {
    pub source: ActivitySource,
    /// Amount of the tier's unit that costs one score point
    pub divisor: f64,
    total: TierTotal,
}

impl ActivityTier {
    pub fn new(source: ActivitySource, divisor: f64, total: TierTotal) -> Self {
        Self { source, divisor, total }
    }

    /// Score this tier, or `None` if it has no data after `cutoff`
    pub fn evaluate(&self, record: &CanonicalHealthRecord, cutoff: DateTime<Utc>) -> Option<f64> {
        (self.total)(record, cutoff).map(|total| clamp_score(NO_ACTIVITY_SCORE - total / self.divisor))
    }
}

impl std::fmt::Debug for ActivityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityTier")
            .field("source", &self.source)
            .field("divisor", &self.divisor)
            .finish()
    }
}

/// Result of an activity estimate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivityLoad {
    /// 0-100, higher means more recovered
    pub score: f64,
    pub source: ActivitySource,
}

/// Ordered fallback chain of activity tiers
#[derive(Debug, Clone)]
pub struct ActivityLoadEstimator {
    tiers: Vec<ActivityTier>,
}

impl Default for ActivityLoadEstimator {
    fn default() -> Self {
        Self::new(vec![
            ActivityTier::new(ActivitySource::Workouts, 20.0, workout_calories),
            ActivityTier::new(ActivitySource::ActiveCalories, 30.0, |record, cutoff| {
                metric_total(&record.calories_burned, cutoff)
            }),
            ActivityTier::new(ActivitySource::Steps, 150.0, |record, cutoff| {
                metric_total(&record.steps, cutoff)
            }),
        ])
    }
}

impl ActivityLoadEstimator {
    pub fn new(tiers: Vec<ActivityTier>) -> Self {
        Self { tiers }
    }

    pub fn tiers(&self) -> &[ActivityTier] {
        &self.tiers
    }

    /// Estimate activity load relative to `reference`, short-circuiting on the first tier with data
    pub fn estimate(&self, record: &CanonicalHealthRecord, reference: DateTime<Utc>) -> ActivityLoad {
        let cutoff = reference - Duration::hours(ACTIVITY_WINDOW_HOURS);

        self.tiers
            .iter()
            .find_map(|tier| {
                tier.evaluate(record, cutoff).map(|score| ActivityLoad {
                    score,
                    source: tier.source,
                })
            })
            .unwrap_or(ActivityLoad {
                score: NO_ACTIVITY_SCORE,
                source: ActivitySource::None,
            })
    }
}

fn workout_calories(record: &CanonicalHealthRecord, cutoff: DateTime<Utc>) -> Option<f64> {
    let recent: Vec<f64> = record
        .workouts
        .iter()
        .filter(|w| w.end_time > cutoff)
        .map(|w| w.calories_burned)
        .collect();

    if recent.is_empty() {
        None
    } else {
        Some(recent.iter().sum())
    }
}

fn metric_total(samples: &[HealthMetric], cutoff: DateTime<Utc>) -> Option<f64> {
    let recent: Vec<f64> = samples
        .iter()
        .filter(|m| m.timestamp > cutoff)
        .map(|m| m.value)
        .collect();

    if recent.is_empty() {
        None
    } else {
        Some(recent.iter().sum())
    }
}
