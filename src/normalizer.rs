//! Sample normalization
//!
//! Converts provider-native sample shapes into canonical records:
//! - Quantity samples (steps, heart rate, active calories) → [`HealthMetric`]
//! - Staged sleep samples → [`SleepInterval`]
//! - Workout samples → [`WorkoutSession`]
//!
//! Nothing here fails on bad input. Unknown sleep stage codes degrade to
//! [`SleepStage::Light`], missing numeric values become `0`, and samples whose
//! time range is inverted are dropped so one bad sample cannot abort a sync.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{HealthMetric, SleepInterval, SleepStage, WorkoutSession};

/// Source label used when a provider omits one
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Workout type used when a provider omits one
pub const UNKNOWN_WORKOUT_TYPE: &str = "other";

/// Numeric stage codes as reported by HealthKit-style category samples
///
/// `0` (in bed) and `1` (asleep, unspecified) carry no stage detail and are
/// treated as light sleep.
const NUMERIC_STAGES: &[(i64, SleepStage)] = &[
    (0, SleepStage::Light),
    (1, SleepStage::Light),
    (2, SleepStage::Awake),
    (3, SleepStage::Light),
    (4, SleepStage::Deep),
    (5, SleepStage::Rem),
];

/// Textual stage labels used by REST-style providers
const LABEL_STAGES: &[(&str, SleepStage)] = &[
    ("deep", SleepStage::Deep),
    ("light", SleepStage::Light),
    ("core", SleepStage::Light),
    ("asleep", SleepStage::Light),
    ("rem", SleepStage::Rem),
    ("awake", SleepStage::Awake),
    ("wake", SleepStage::Awake),
];

/// Stage assigned to unrecognized or missing codes
pub const DEFAULT_STAGE: SleepStage = SleepStage::Light;

/// A provider quantity sample: a value and the time it was recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawQuantitySample {
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(alias = "endDate")]
    pub end_date: DateTime<Utc>,
    #[serde(default, alias = "sourceName")]
    pub source: Option<String>,
}

/// Sleep stage code as either a numeric category value or a textual label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageCode {
    Numeric(i64),
    Label(String),
    /// Any other JSON shape (float, bool, object); mapped like a numeric code when integral
    Other(serde_json::Value),
}

/// A provider sleep sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSleepSample {
    #[serde(alias = "startDate")]
    pub start_date: DateTime<Utc>,
    #[serde(alias = "endDate")]
    pub end_date: DateTime<Utc>,
    #[serde(default, alias = "value")]
    pub stage: Option<StageCode>,
}

/// A provider workout sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawWorkoutSample {
    #[serde(default, alias = "activityType")]
    pub activity_type: Option<String>,
    #[serde(alias = "startDate")]
    pub start_date: DateTime<Utc>,
    #[serde(alias = "endDate")]
    pub end_date: DateTime<Utc>,
    #[serde(default, alias = "totalEnergyBurned")]
    pub total_energy_burned: Option<f64>,
    #[serde(default, alias = "totalDistance")]
    pub total_distance: Option<f64>,
    #[serde(default, alias = "heartRateAvg")]
    pub heart_rate_avg: Option<f64>,
    #[serde(default, alias = "heartRateMax")]
    pub heart_rate_max: Option<f64>,
}

/// A full provider export, as written by a device companion app
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderExport {
    pub steps: Vec<RawQuantitySample>,
    #[serde(alias = "heartRate")]
    pub heart_rate: Vec<RawQuantitySample>,
    #[serde(alias = "activeCalories")]
    pub active_calories: Vec<RawQuantitySample>,
    pub sleep: Vec<RawSleepSample>,
    pub workouts: Vec<RawWorkoutSample>,
}

/// Canonical samples produced from one provider export
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    pub steps: Vec<HealthMetric>,
    pub heart_rate: Vec<HealthMetric>,
    pub active_calories: Vec<HealthMetric>,
    pub sleep: Vec<SleepInterval>,
    pub workouts: Vec<WorkoutSession>,
    /// Samples dropped for violating time-range invariants
    pub dropped: usize,
}

/// Stateless converter from provider-native shapes to canonical records
pub struct SampleNormalizer;

impl SampleNormalizer {
    /// Convert one quantity sample; a missing value becomes `0`
    pub fn normalize_metric(raw: &RawQuantitySample, default_source: &str) -> HealthMetric {
        let source = raw
            .source
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(default_source);

        HealthMetric::new(raw.value.unwrap_or(0.0), raw.end_date, source)
    }

    /// Convert quantity samples, ordered by timestamp
    pub fn normalize_metrics(raw: &[RawQuantitySample], default_source: &str) -> Vec<HealthMetric> {
        let mut metrics: Vec<HealthMetric> = raw
            .iter()
            .map(|sample| Self::normalize_metric(sample, default_source))
            .collect();
        metrics.sort_by_key(|m| m.timestamp);
        metrics
    }

    /// Map a provider stage code through the lookup tables, defaulting to light sleep
    pub fn map_stage(code: Option<&StageCode>) -> SleepStage {
        let mapped = match code {
            Some(StageCode::Numeric(value)) => NUMERIC_STAGES
                .iter()
                .find(|(code, _)| code == value)
                .map(|(_, stage)| *stage),
            Some(StageCode::Label(label)) => {
                let label = label.trim().to_lowercase();
                LABEL_STAGES
                    .iter()
                    .find(|(name, _)| *name == label)
                    .map(|(_, stage)| *stage)
            }
            Some(StageCode::Other(value)) => value
                .as_f64()
                .filter(|v| v.fract() == 0.0)
                .and_then(|v| NUMERIC_STAGES.iter().find(|(code, _)| *code as f64 == v))
                .map(|(_, stage)| *stage),
            None => None,
        };

        mapped.unwrap_or_else(|| {
            tracing::debug!(code = ?code, "Unrecognized sleep stage code, defaulting to light");
            DEFAULT_STAGE
        })
    }

    /// Convert one sleep sample; `None` when its end is not after its start
    pub fn normalize_sleep(raw: &RawSleepSample) -> Option<SleepInterval> {
        let stage = Self::map_stage(raw.stage.as_ref());
        match SleepInterval::new(stage, raw.start_date, raw.end_date) {
            Ok(interval) => Some(interval),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping sleep sample");
                None
            }
        }
    }

    /// Convert one workout sample; `None` when its end is not after its start
    pub fn normalize_workout(raw: &RawWorkoutSample) -> Option<WorkoutSession> {
        let workout_type = raw
            .activity_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(UNKNOWN_WORKOUT_TYPE);

        match WorkoutSession::new(
            workout_type,
            raw.start_date,
            raw.end_date,
            raw.total_energy_burned.unwrap_or(0.0),
        ) {
            Ok(workout) => Some(
                workout
                    .with_heart_rate(raw.heart_rate_avg, raw.heart_rate_max)
                    .with_distance(raw.total_distance),
            ),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping workout sample");
                None
            }
        }
    }

    /// Normalize a complete provider export
    pub fn normalize_export(export: &ProviderExport, default_source: &str) -> NormalizedBatch {
        let mut sleep: Vec<SleepInterval> = export.sleep.iter().filter_map(Self::normalize_sleep).collect();
        sleep.sort_by_key(|s| s.start_time);

        let mut workouts: Vec<WorkoutSession> =
            export.workouts.iter().filter_map(Self::normalize_workout).collect();
        workouts.sort_by_key(|w| w.start_time);

        let dropped = (export.sleep.len() - sleep.len()) + (export.workouts.len() - workouts.len());

        NormalizedBatch {
            steps: Self::normalize_metrics(&export.steps, default_source),
            heart_rate: Self::normalize_metrics(&export.heart_rate, default_source),
            active_calories: Self::normalize_metrics(&export.active_calories, default_source),
            sleep,
            workouts,
            dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_numeric_stage_mapping() {
        assert_eq!(SampleNormalizer::map_stage(Some(&StageCode::Numeric(4))), SleepStage::Deep);
        assert_eq!(SampleNormalizer::map_stage(Some(&StageCode::Numeric(5))), SleepStage::Rem);
        assert_eq!(SampleNormalizer::map_stage(Some(&StageCode::Numeric(2))), SleepStage::Awake);
        assert_eq!(SampleNormalizer::map_stage(Some(&StageCode::Numeric(3))), SleepStage::Light);
    }

    #[test]
    fn test_unknown_stage_defaults_to_light() {
        assert_eq!(SampleNormalizer::map_stage(Some(&StageCode::Numeric(99))), SleepStage::Light);
        assert_eq!(
            SampleNormalizer::map_stage(Some(&StageCode::Label("nap".to_string()))),
            SleepStage::Light
        );
        assert_eq!(SampleNormalizer::map_stage(None), SleepStage::Light);
    }

    #[test]
    fn test_unexpected_stage_shapes_do_not_reject_export() {
        let json = r#"{
            "sleep": [
                {"startDate": "2024-03-01T01:00:00Z", "endDate": "2024-03-01T02:00:00Z", "value": 4},
                {"startDate": "2024-03-01T02:00:00Z", "endDate": "2024-03-01T03:00:00Z", "value": 4.0},
                {"startDate": "2024-03-01T03:00:00Z", "endDate": "2024-03-01T04:00:00Z", "value": 2.5},
                {"startDate": "2024-03-01T04:00:00Z", "endDate": "2024-03-01T05:00:00Z", "value": true},
                {"startDate": "2024-03-01T05:00:00Z", "endDate": "2024-03-01T06:00:00Z", "value": {"stage": "rem"}}
            ]
        }"#;

        let export: ProviderExport = serde_json::from_str(json).unwrap();
        let batch = SampleNormalizer::normalize_export(&export, "apple-health");

        let stages: Vec<SleepStage> = batch.sleep.iter().map(|s| s.quality).collect();
        assert_eq!(
            stages,
            vec![
                SleepStage::Deep,
                SleepStage::Deep,
                SleepStage::Light,
                SleepStage::Light,
                SleepStage::Light
            ]
        );
        assert_eq!(batch.dropped, 0);
    }

    #[test]
    fn test_label_mapping_is_case_insensitive() {
        assert_eq!(
            SampleNormalizer::map_stage(Some(&StageCode::Label(" REM ".to_string()))),
            SleepStage::Rem
        );
        assert_eq!(
            SampleNormalizer::map_stage(Some(&StageCode::Label("Deep".to_string()))),
            SleepStage::Deep
        );
    }

    #[test]
    fn test_null_value_becomes_zero() {
        let raw = RawQuantitySample {
            value: None,
            end_date: Utc::now(),
            source: None,
        };
        let metric = SampleNormalizer::normalize_metric(&raw, "apple-health");
        assert_eq!(metric.value, 0.0);
        assert_eq!(metric.source, "apple-health");
    }

    #[test]
    fn test_workout_optional_fields_stay_absent() {
        let start = Utc::now() - Duration::hours(2);
        let raw = RawWorkoutSample {
            activity_type: None,
            start_date: start,
            end_date: start + Duration::minutes(45),
            total_energy_burned: None,
            total_distance: Some(5000.0),
            heart_rate_avg: None,
            heart_rate_max: Some(172.0),
        };

        let workout = SampleNormalizer::normalize_workout(&raw).unwrap();
        assert_eq!(workout.workout_type, UNKNOWN_WORKOUT_TYPE);
        assert_eq!(workout.calories_burned, 0.0);
        assert_eq!(workout.distance, Some(5000.0));
        assert!(workout.heart_rate_avg.is_none());
        assert_eq!(workout.heart_rate_max, Some(172.0));
    }

    #[test]
    fn test_inverted_samples_are_dropped() {
        let now = Utc::now();
        let export = ProviderExport {
            sleep: vec![
                RawSleepSample {
                    start_date: now - Duration::hours(8),
                    end_date: now - Duration::hours(7),
                    stage: Some(StageCode::Numeric(4)),
                },
                RawSleepSample {
                    start_date: now,
                    end_date: now - Duration::hours(1),
                    stage: Some(StageCode::Numeric(5)),
                },
            ],
            ..Default::default()
        };

        let batch = SampleNormalizer::normalize_export(&export, "oura");
        assert_eq!(batch.sleep.len(), 1);
        assert_eq!(batch.sleep[0].quality, SleepStage::Deep);
        assert_eq!(batch.sleep[0].duration_minutes, 60);
        assert_eq!(batch.dropped, 1);
    }

    #[test]
    fn test_export_parses_camel_case_fields() {
        let json = r#"{
            "heartRate": [{"value": 61, "endDate": "2024-03-01T07:00:00Z", "sourceName": "Watch"}],
            "sleep": [{"startDate": "2024-03-01T01:00:00Z", "endDate": "2024-03-01T02:30:00Z", "value": "deep"}],
            "workouts": [{"activityType": "cycling", "startDate": "2024-03-01T17:00:00Z",
                          "endDate": "2024-03-01T18:00:00Z", "totalEnergyBurned": null}]
        }"#;

        let export: ProviderExport = serde_json::from_str(json).unwrap();
        let batch = SampleNormalizer::normalize_export(&export, "apple-health");

        assert_eq!(batch.heart_rate[0].value, 61.0);
        assert_eq!(batch.heart_rate[0].source, "Watch");
        assert_eq!(batch.sleep[0].quality, SleepStage::Deep);
        assert_eq!(batch.sleep[0].duration_minutes, 90);
        assert_eq!(batch.workouts[0].calories_burned, 0.0);
        assert!(batch.steps.is_empty());
    }
}
