//! Sleep summarization
//!
//! Two distinct sleep-derived numbers come out of this module:
//!
//! - [`SleepSummarizer::summarize`] builds the rolling 24h [`SleepSummary`] shown
//!   on summary cards, with its own 0-100 score that rewards deep and REM share
//!   and penalizes awakenings.
//! - [`SleepSummarizer::recent_deep_quality`] is the sleep input of the composite
//!   recovery score: twice the deep-sleep percentage of the three most recent
//!   intervals.
//!
//! The two use different formulas and lookback windows and are kept separate.

use chrono::{DateTime, Duration, Utc};

use crate::models::{SleepInterval, SleepStage, SleepSummary};
use crate::scale::{clamp_score, to_score};

/// Lookback window for stage totals in the summary
pub const SUMMARY_WINDOW_HOURS: i64 = 24;

/// Number of most recent intervals feeding the composite sleep quality
pub const RECENT_INTERVALS: usize = 3;

/// Baseline summary score before stage bonuses and awakening penalties
const BASE_SCORE: f64 = 50.0;
/// Cap on each of the deep and REM bonuses
const STAGE_BONUS_CAP: f64 = 25.0;
const DEEP_BONUS_FACTOR: f64 = 1.25;
const REM_BONUS_FACTOR: f64 = 1.0;
const AWAKENING_PENALTY: f64 = 5.0;
/// Composite sleep quality is this multiple of the deep percentage
const DEEP_QUALITY_FACTOR: f64 = 2.0;

pub struct SleepSummarizer;

impl SleepSummarizer {
    /// Summarize sleep relative to `reference`; `None` when there are no intervals
    ///
    /// # Algorithm
    ///
    /// - `total_sleep_minutes` is the duration of the most recently ended interval.
    /// - Intervals ending after `reference - 24h` are bucketed by stage into
    ///   deep/REM/light minutes; each awake interval counts as one awakening.
    /// - `sleep_score = clamp(50 + min(25, deep% * 1.25) + min(25, rem% * 1.0) - awakenings * 5)`
    ///   where the percentages are relative to `total_sleep_minutes` (0 when it is 0).
    pub fn summarize(intervals: &[SleepInterval], reference: DateTime<Utc>) -> Option<SleepSummary> {
        let anchor = intervals.iter().max_by_key(|s| s.end_time)?;
        let total_sleep_minutes = anchor.duration_minutes;

        let cutoff = reference - Duration::hours(SUMMARY_WINDOW_HOURS);
        let mut deep = 0u32;
        let mut rem = 0u32;
        let mut light = 0u32;
        let mut awakenings = 0u32;

        for interval in intervals.iter().filter(|s| s.end_time > cutoff) {
            match interval.quality {
                SleepStage::Deep => deep += interval.duration_minutes,
                SleepStage::Rem => rem += interval.duration_minutes,
                SleepStage::Light => light += interval.duration_minutes,
                SleepStage::Awake => awakenings += 1,
            }
        }

        Some(SleepSummary {
            date: anchor.end_time.date_naive(),
            total_sleep_minutes,
            deep_sleep_minutes: deep,
            rem_sleep_minutes: rem,
            light_sleep_minutes: light,
            awakenings,
            sleep_score: Self::summary_score(deep, rem, total_sleep_minutes, awakenings),
        })
    }

    /// Summary sleep score (0-100)
    pub fn summary_score(deep_minutes: u32, rem_minutes: u32, total_minutes: u32, awakenings: u32) -> u8 {
        let deep_pct = percent(deep_minutes, total_minutes);
        let rem_pct = percent(rem_minutes, total_minutes);

        let score = BASE_SCORE
            + (deep_pct * DEEP_BONUS_FACTOR).min(STAGE_BONUS_CAP)
            + (rem_pct * REM_BONUS_FACTOR).min(STAGE_BONUS_CAP)
            - awakenings as f64 * AWAKENING_PENALTY;

        to_score(score)
    }

    /// Composite sleep quality (0-100) from the three most recently ended intervals
    ///
    /// Returns `None` when there are no intervals.
    pub fn recent_deep_quality(intervals: &[SleepInterval]) -> Option<f64> {
        if intervals.is_empty() {
            return None;
        }

        let mut recent: Vec<&SleepInterval> = intervals.iter().collect();
        recent.sort_by(|a, b| b.end_time.cmp(&a.end_time));
        recent.truncate(RECENT_INTERVALS);

        let total: u32 = recent.iter().map(|s| s.duration_minutes).sum();
        let deep: u32 = recent
            .iter()
            .filter(|s| s.quality == SleepStage::Deep)
            .map(|s| s.duration_minutes)
            .sum();

        Some(clamp_score(percent(deep, total) * DEEP_QUALITY_FACTOR))
    }
}

fn percent(part: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    part as f64 / total as f64 * 100.0
}
