use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Scalar biometric quantities tracked as time-stamped samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Steps,
    HeartRate,
    ActiveCalories,
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricType::Steps => write!(f, "steps"),
            MetricType::HeartRate => write!(f, "heart_rate"),
            MetricType::ActiveCalories => write!(f, "active_calories"),
        }
    }
}

/// The five sample categories fetched independently on every sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleCategory {
    Steps,
    HeartRate,
    Sleep,
    Workouts,
    ActiveCalories,
}

impl SampleCategory {
    pub const ALL: [SampleCategory; 5] = [
        SampleCategory::Steps,
        SampleCategory::HeartRate,
        SampleCategory::Sleep,
        SampleCategory::Workouts,
        SampleCategory::ActiveCalories,
    ];
}

impl From<MetricType> for SampleCategory {
    fn from(metric: MetricType) -> Self {
        match metric {
            MetricType::Steps => SampleCategory::Steps,
            MetricType::HeartRate => SampleCategory::HeartRate,
            MetricType::ActiveCalories => SampleCategory::ActiveCalories,
        }
    }
}

impl fmt::Display for SampleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleCategory::Steps => write!(f, "steps"),
            SampleCategory::HeartRate => write!(f, "heart_rate"),
            SampleCategory::Sleep => write!(f, "sleep"),
            SampleCategory::Workouts => write!(f, "workouts"),
            SampleCategory::ActiveCalories => write!(f, "active_calories"),
        }
    }
}

/// A single time-stamped biometric reading
///
/// Used uniformly for steps, heart rate (bpm) and active calories (kcal).
/// Values arrive already unit-normalized by the device data provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthMetric {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    /// Device or app that recorded the sample
    pub source: String,
}

impl HealthMetric {
    pub fn new(value: f64, timestamp: DateTime<Utc>, source: impl Into<String>) -> Self {
        Self {
            value,
            timestamp,
            source: source.into(),
        }
    }
}

/// Sleep stage label attached to a sleep interval
///
/// - **Deep**: slow-wave sleep, the most restorative stage
/// - **Light**: NREM 1 & 2, also used for unrecognized stage codes
/// - **Rem**: rapid eye movement sleep
/// - **Awake**: wake periods inside a sleep session, counted as awakenings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SleepStage {
    Deep,
    Light,
    Rem,
    Awake,
}

impl fmt::Display for SleepStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SleepStage::Deep => write!(f, "Deep"),
            SleepStage::Light => write!(f, "Light"),
            SleepStage::Rem => write!(f, "REM"),
            SleepStage::Awake => write!(f, "Awake"),
        }
    }
}

/// A contiguous stretch of one sleep stage
///
/// `duration_minutes` is always `round((end_time - start_time) / 60s)`; build
/// intervals through [`SleepInterval::new`] to keep that invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepInterval {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub quality: SleepStage,
    pub duration_minutes: u32,
}

impl SleepInterval {
    pub fn new(
        quality: SleepStage,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        if end_time <= start_time {
            return Err(ValidationError::InvalidTimeRange {
                start: start_time,
                end: end_time,
            });
        }

        let seconds = (end_time - start_time).num_seconds() as f64;
        let duration_minutes = (seconds / 60.0).round().min(u32::MAX as f64) as u32;

        Ok(SleepInterval {
            start_time,
            end_time,
            quality,
            duration_minutes,
        })
    }
}

/// A recorded workout session
///
/// Optional fields are present only when the provider supplied them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSession {
    #[serde(rename = "type")]
    pub workout_type: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub calories_burned: f64,
    pub heart_rate_avg: Option<f64>,
    pub heart_rate_max: Option<f64>,
    /// Distance in meters
    pub distance: Option<f64>,
}

impl WorkoutSession {
    pub fn new(
        workout_type: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        calories_burned: f64,
    ) -> Result<Self, ValidationError> {
        if end_time <= start_time {
            return Err(ValidationError::InvalidTimeRange {
                start: start_time,
                end: end_time,
            });
        }

        Ok(WorkoutSession {
            workout_type: workout_type.into(),
            start_time,
            end_time,
            calories_burned,
            heart_rate_avg: None,
            heart_rate_max: None,
            distance: None,
        })
    }

    pub fn with_heart_rate(mut self, avg: Option<f64>, max: Option<f64>) -> Self {
        self.heart_rate_avg = avg;
        self.heart_rate_max = max;
        self
    }

    pub fn with_distance(mut self, distance: Option<f64>) -> Self {
        self.distance = distance;
        self
    }

    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }
}

/// Normalized, provider-agnostic snapshot of one user's biometric arrays
///
/// Written only by the sync policy (full replace on every sync) and read by all
/// scoring components. Every array may be empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalHealthRecord {
    pub user_id: String,
    pub steps: Vec<HealthMetric>,
    pub heart_rate: Vec<HealthMetric>,
    pub sleep: Vec<SleepInterval>,
    pub calories_burned: Vec<HealthMetric>,
    pub workouts: Vec<WorkoutSession>,
    pub last_updated: DateTime<Utc>,
}

impl CanonicalHealthRecord {
    /// Create a record with no samples
    pub fn empty(user_id: impl Into<String>, last_updated: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            steps: Vec::new(),
            heart_rate: Vec::new(),
            sleep: Vec::new(),
            calories_burned: Vec::new(),
            workouts: Vec::new(),
            last_updated,
        }
    }

    pub fn has_sleep(&self) -> bool {
        !self.sleep.is_empty()
    }

    pub fn has_heart_rate(&self) -> bool {
        !self.heart_rate.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count() == 0
    }

    /// Total number of samples across all categories
    pub fn sample_count(&self) -> usize {
        self.steps.len()
            + self.heart_rate.len()
            + self.sleep.len()
            + self.calories_burned.len()
            + self.workouts.len()
    }

    /// Order every array by time (metrics by timestamp, intervals by start)
    pub fn sort_chronologically(&mut self) {
        self.steps.sort_by_key(|m| m.timestamp);
        self.heart_rate.sort_by_key(|m| m.timestamp);
        self.calories_burned.sort_by_key(|m| m.timestamp);
        self.sleep.sort_by_key(|s| s.start_time);
        self.workouts.sort_by_key(|w| w.start_time);
    }
}

/// Wearable data sources a user can authorize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    AppleHealth,
    HealthConnect,
    Fitbit,
    Garmin,
    Oura,
    Whoop,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::AppleHealth => "apple-health",
            ProviderType::HealthConnect => "health-connect",
            ProviderType::Fitbit => "fitbit",
            ProviderType::Garmin => "garmin",
            ProviderType::Oura => "oura",
            ProviderType::Whoop => "whoop",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "apple-health" | "healthkit" => Ok(ProviderType::AppleHealth),
            "health-connect" | "google-fit" => Ok(ProviderType::HealthConnect),
            "fitbit" => Ok(ProviderType::Fitbit),
            "garmin" => Ok(ProviderType::Garmin),
            "oura" => Ok(ProviderType::Oura),
            "whoop" => Ok(ProviderType::Whoop),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

/// Authorization and sync bookkeeping for one (user, provider) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub user_id: String,
    pub provider_type: ProviderType,
    pub is_connected: bool,
    /// `None` means the provider has never been synced
    pub last_synced: Option<DateTime<Utc>>,
    pub permissions: Vec<String>,
}

impl ConnectionRecord {
    /// A freshly authorized, never-synced connection
    pub fn new(user_id: impl Into<String>, provider_type: ProviderType, permissions: Vec<String>) -> Self {
        Self {
            user_id: user_id.into(),
            provider_type,
            is_connected: true,
            last_synced: None,
            permissions,
        }
    }

    /// True when the provider was never synced or the last sync is older than `window`
    pub fn is_stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.last_synced {
            None => true,
            Some(last) => now - last > window,
        }
    }
}

/// Rolling-window reduction of raw sleep intervals, recomputed on demand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepSummary {
    pub date: NaiveDate,
    pub total_sleep_minutes: u32,
    pub deep_sleep_minutes: u32,
    pub rem_sleep_minutes: u32,
    pub light_sleep_minutes: u32,
    pub awakenings: u32,
    /// 0-100
    pub sleep_score: u8,
}

/// Which data source backed the activity-load estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivitySource {
    Workouts,
    ActiveCalories,
    Steps,
    /// No tracked activity at all; treated as fully rested
    None,
}

impl ActivitySource {
    pub fn description(&self) -> &'static str {
        match self {
            ActivitySource::Workouts => "workouts",
            ActivitySource::ActiveCalories => "active calories",
            ActivitySource::Steps => "step count",
            ActivitySource::None => "no tracked activity",
        }
    }
}

impl fmt::Display for ActivitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Sub-scores that fed the composite recovery score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributingFactors {
    /// 0-100, derived from deep-sleep share of the most recent intervals
    pub sleep_quality: u8,
    /// Mean of the most recent heart-rate samples, in bpm
    pub resting_heart_rate: f64,
    /// 0-100 proxy; absent when too few heart-rate samples exist
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heart_rate_variability: Option<f64>,
    /// 0-100, higher means less fatigued
    pub recent_activity_level: u8,
}

/// Composite recovery result, recomputed per request and never persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStatus {
    /// 0-100
    pub score: u8,
    pub recommendation: String,
    pub contributing_factors: ContributingFactors,
    pub activity_source: ActivitySource,
}
