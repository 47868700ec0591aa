//! Composite recovery scoring
//!
//! Combines three sub-scores into a single 0-100 recovery score with a
//! textual recommendation.
//!
//! # Inputs
//!
//! - **Sleep quality**: twice the deep-sleep percentage of the three most recent
//!   sleep intervals (see [`SleepSummarizer::recent_deep_quality`]).
//! - **Heart rate**: mean of the ten most recent heart-rate samples, mapped
//!   through fixed resting-rate bands. Without samples the resting rate
//!   defaults to 70 bpm and the sub-score to 50.
//! - **Activity**: the activity load estimate (see [`ActivityLoadEstimator`]),
//!   which always yields a score.
//!
//! # Adaptive weighting
//!
//! Base weights are sleep 40%, heart rate 30%, activity 30%. When sleep data is
//! absent its weight moves evenly onto heart rate and activity (50% / 50%).
//! Weights are held as integer percentages so they always total exactly 100.
//!
//! A score needs sleep or heart-rate data; activity alone is not enough signal.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::activity::{ActivityLoad, ActivityLoadEstimator};
use crate::hrv::HrvEstimator;
use crate::models::{ActivitySource, CanonicalHealthRecord, ContributingFactors, HealthMetric, RecoveryStatus};
use crate::scale::to_score;
use crate::sleep::SleepSummarizer;

/// Number of most recent heart-rate samples averaged into the resting rate
pub const RESTING_HR_SAMPLES: usize = 10;

/// Resting rate reported when no heart-rate samples exist
pub const DEFAULT_RESTING_HR: f64 = 70.0;

/// Heart-rate sub-score used when no heart-rate samples exist
pub const DEFAULT_HEART_RATE_SCORE: f64 = 50.0;

/// Fewest heart-rate samples before the HRV factor is reported at all
///
/// The estimator applies its own, stricter minimum on top of this one.
pub const MIN_HRV_FACTOR_SAMPLES: usize = 3;

/// Resting heart-rate bands: `(upper bound exclusive, score)`
const HEART_RATE_BANDS: &[(f64, f64)] = &[(60.0, 100.0), (70.0, 85.0), (80.0, 70.0), (90.0, 50.0)];

/// Score for resting rates at or above the last band
const HEART_RATE_FLOOR_SCORE: f64 = 30.0;

/// Component weights as integer percentages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreWeights {
    pub sleep: u32,
    pub heart_rate: u32,
    pub activity: u32,
}

impl ScoreWeights {
    /// Weights when sleep data is available
    pub const BASE: ScoreWeights = ScoreWeights {
        sleep: 40,
        heart_rate: 30,
        activity: 30,
    };

    /// Weights for the available signals; `None` when neither sleep nor heart rate is present
    pub fn for_signals(has_sleep: bool, has_heart_rate: bool) -> Option<Self> {
        if !has_sleep && !has_heart_rate {
            return None;
        }

        if has_sleep {
            return Some(Self::BASE);
        }

        let share = Self::BASE.sleep / 2;
        Some(ScoreWeights {
            sleep: 0,
            heart_rate: Self::BASE.heart_rate + share,
            activity: Self::BASE.activity + (Self::BASE.sleep - share),
        })
    }

    /// Sum of the percentages; always 100 for weights built by [`ScoreWeights::for_signals`]
    pub fn total(&self) -> u32 {
        self.sleep + self.heart_rate + self.activity
    }

    /// Weights as fractions of one
    pub fn fractions(&self) -> (f64, f64, f64) {
        (
            self.sleep as f64 / 100.0,
            self.heart_rate as f64 / 100.0,
            self.activity as f64 / 100.0,
        )
    }

    /// Weighted average of the three sub-scores
    pub fn combine(&self, sleep: f64, heart_rate: f64, activity: f64) -> f64 {
        (sleep * self.sleep as f64 + heart_rate * self.heart_rate as f64 + activity * self.activity as f64)
            / self.total() as f64
    }
}

/// Recommendation band of a composite score
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryBand {
    /// Below 40
    Low,
    /// 40-59
    Moderate,
    /// 60-79
    Good,
    /// 80 and above
    Excellent,
}

impl RecoveryBand {
    pub fn from_score(score: u8) -> Self {
        if score < 40 {
            RecoveryBand::Low
        } else if score < 60 {
            RecoveryBand::Moderate
        } else if score < 80 {
            RecoveryBand::Good
        } else {
            RecoveryBand::Excellent
        }
    }

    pub fn recommendation(&self) -> &'static str {
        match self {
            RecoveryBand::Low => {
                "Your body needs rest. Take a rest day or keep to gentle stretching and an easy walk."
            }
            RecoveryBand::Moderate => {
                "You're partially recovered. Keep today's training light to moderate."
            }
            RecoveryBand::Good => "You're well recovered. A normal training session is fine today.",
            RecoveryBand::Excellent => "You're fully recovered and ready for a challenging workout.",
        }
    }
}

impl fmt::Display for RecoveryBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryBand::Low => write!(f, "Low"),
            RecoveryBand::Moderate => write!(f, "Moderate"),
            RecoveryBand::Good => write!(f, "Good"),
            RecoveryBand::Excellent => write!(f, "Excellent"),
        }
    }
}

/// Build the recommendation text, noting a fallback activity source when one was used
pub fn recommendation_for(score: u8, activity_source: ActivitySource) -> String {
    let text = RecoveryBand::from_score(score).recommendation();
    match activity_source {
        ActivitySource::ActiveCalories | ActivitySource::Steps => {
            format!("{} (Activity estimate based on {}.)", text, activity_source.description())
        }
        ActivitySource::Workouts | ActivitySource::None => text.to_string(),
    }
}

/// Mean of the most recent heart-rate samples; `None` without samples
pub fn resting_heart_rate(samples: &[HealthMetric]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }

    let mut recent: Vec<&HealthMetric> = samples.iter().collect();
    recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    recent.truncate(RESTING_HR_SAMPLES);

    Some(recent.iter().map(|m| m.value).sum::<f64>() / recent.len() as f64)
}

/// Map a resting heart rate onto its band score
pub fn heart_rate_score(resting_rate: f64) -> f64 {
    HEART_RATE_BANDS
        .iter()
        .find(|(upper, _)| resting_rate < *upper)
        .map(|(_, score)| *score)
        .unwrap_or(HEART_RATE_FLOOR_SCORE)
}

/// Composite recovery scorer
#[derive(Debug, Clone, Default)]
pub struct RecoveryScorer {
    activity: ActivityLoadEstimator,
}

impl RecoveryScorer {
    pub fn new(activity: ActivityLoadEstimator) -> Self {
        Self { activity }
    }

    /// Score a record as of now
    pub fn score(&self, record: &CanonicalHealthRecord) -> Option<RecoveryStatus> {
        self.score_at(record, Utc::now())
    }

    /// Score a record relative to `reference`
    ///
    /// Returns `None` when the record has neither sleep nor heart-rate data.
    pub fn score_at(&self, record: &CanonicalHealthRecord, reference: DateTime<Utc>) -> Option<RecoveryStatus> {
        let weights = ScoreWeights::for_signals(record.has_sleep(), record.has_heart_rate())?;

        let sleep_score = SleepSummarizer::recent_deep_quality(&record.sleep).unwrap_or(0.0);

        let resting_rate = resting_heart_rate(&record.heart_rate);
        let heart_rate_sub_score = resting_rate
            .map(heart_rate_score)
            .unwrap_or(DEFAULT_HEART_RATE_SCORE);

        let ActivityLoad {
            score: activity_score,
            source: activity_source,
        } = self.activity.estimate(record, reference);

        let score = to_score(weights.combine(sleep_score, heart_rate_sub_score, activity_score));

        let heart_rate_variability = if record.heart_rate.len() >= MIN_HRV_FACTOR_SAMPLES {
            HrvEstimator::estimate(&record.heart_rate)
        } else {
            None
        };

        tracing::debug!(
            user_id = %record.user_id,
            score,
            sleep_score,
            heart_rate_score = heart_rate_sub_score,
            activity_score,
            activity_source = %activity_source,
            sleep_weight = weights.sleep,
            "Computed recovery score"
        );

        Some(RecoveryStatus {
            score,
            recommendation: recommendation_for(score, activity_source),
            contributing_factors: ContributingFactors {
                sleep_quality: to_score(sleep_score),
                resting_heart_rate: resting_rate.unwrap_or(DEFAULT_RESTING_HR),
                heart_rate_variability,
                recent_activity_level: to_score(activity_score),
            },
            activity_source,
        })
    }
}
