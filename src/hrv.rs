//! Heart-rate-variability proxy
//!
//! Providers deliver scalar bpm samples, not R-R intervals, so clinical RMSSD
//! cannot be computed. The proxy here is the root mean square of successive
//! differences between time-ordered bpm samples, scaled onto 0-100.

use crate::models::HealthMetric;
use crate::scale::clamp;

/// Fewest heart-rate samples for which an estimate is produced
pub const MIN_SAMPLES: usize = 5;

/// Multiplier mapping the RMS of bpm deltas onto the 0-100 scale
const SCALE_FACTOR: f64 = 2.0;

pub struct HrvEstimator;

impl HrvEstimator {
    /// Estimate the HRV proxy; `None` with fewer than [`MIN_SAMPLES`] samples
    ///
    /// # Algorithm
    ///
    /// 1. Sort samples ascending by timestamp
    /// 2. Take absolute differences of consecutive values
    /// 3. `rms = sqrt(mean(diff²))`
    /// 4. `min(100, rms * 2)`
    pub fn estimate(samples: &[HealthMetric]) -> Option<f64> {
        if samples.len() < MIN_SAMPLES {
            return None;
        }

        let mut ordered: Vec<&HealthMetric> = samples.iter().collect();
        ordered.sort_by_key(|m| m.timestamp);

        let squared_diffs: Vec<f64> = ordered
            .windows(2)
            .map(|pair| {
                let diff = (pair[1].value - pair[0].value).abs();
                diff * diff
            })
            .collect();

        let mean_square = squared_diffs.iter().sum::<f64>() / squared_diffs.len() as f64;
        let rms = mean_square.sqrt();

        Some(clamp(0.0, 100.0, rms * SCALE_FACTOR))
    }
}
