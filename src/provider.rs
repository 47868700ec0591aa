//! Collaborator interfaces consumed by the engine
//!
//! - [`DeviceDataProvider`]: time-bounded queries against one wearable source
//! - [`ConnectionRegistry`]: which providers a user authorized and when they last synced
//! - [`ProfileStore`]: persistence of the canonical per-user health record
//!
//! In-memory implementations back tests and embedders that keep state elsewhere;
//! [`SnapshotFileProvider`] answers queries from a provider export on disk.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

use crate::error::{ProviderError, StoreError};
use crate::models::{
    CanonicalHealthRecord, ConnectionRecord, HealthMetric, MetricType, ProviderType, SleepInterval,
    WorkoutSession,
};
use crate::normalizer::{NormalizedBatch, ProviderExport, SampleNormalizer};

/// A wearable data source yielding already unit-normalized samples
///
/// Every query is bounded by `[from, to]`, may return an empty vector, and may
/// fail; the sync policy contains failures per category.
#[async_trait]
pub trait DeviceDataProvider: Send + Sync {
    /// Which provider this client talks to
    fn provider_type(&self) -> ProviderType;

    async fn query_metric(
        &self,
        user_id: &str,
        metric: MetricType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<HealthMetric>, ProviderError>;

    async fn query_sleep(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SleepInterval>, ProviderError>;

    async fn query_workouts(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<WorkoutSession>, ProviderError>;
}

/// Tracks provider authorizations and sync timestamps per user
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    async fn get_connections(&self, user_id: &str) -> Result<Vec<ConnectionRecord>, StoreError>;

    /// Record that `provider` finished a sync attempt for `user_id` at `at`
    async fn touch_sync(
        &self,
        user_id: &str,
        provider: ProviderType,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Create or replace the connection for `(record.user_id, record.provider_type)`
    async fn upsert_connection(&self, record: ConnectionRecord) -> Result<(), StoreError>;
}

/// Persists the canonical health record, one per user
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_record(&self, user_id: &str) -> Result<Option<CanonicalHealthRecord>, StoreError>;

    /// Full replace of the user's record
    async fn put_record(&self, user_id: &str, record: &CanonicalHealthRecord) -> Result<(), StoreError>;
}

/// Profile store kept in process memory
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    records: RwLock<HashMap<String, CanonicalHealthRecord>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record without going through a sync
    pub async fn insert(&self, record: CanonicalHealthRecord) {
        self.records.write().await.insert(record.user_id.clone(), record);
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get_record(&self, user_id: &str) -> Result<Option<CanonicalHealthRecord>, StoreError> {
        Ok(self.records.read().await.get(user_id).cloned())
    }

    async fn put_record(&self, user_id: &str, record: &CanonicalHealthRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(user_id.to_string(), record.clone());
        Ok(())
    }
}

/// Connection registry kept in process memory
#[derive(Debug, Default)]
pub struct MemoryConnectionRegistry {
    connections: RwLock<HashMap<String, Vec<ConnectionRecord>>>,
}

impl MemoryConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionRegistry for MemoryConnectionRegistry {
    async fn get_connections(&self, user_id: &str) -> Result<Vec<ConnectionRecord>, StoreError> {
        Ok(self
            .connections
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn touch_sync(
        &self,
        user_id: &str,
        provider: ProviderType,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut connections = self.connections.write().await;
        let record = connections
            .get_mut(user_id)
            .and_then(|records| records.iter_mut().find(|c| c.provider_type == provider))
            .ok_or_else(|| StoreError::WriteFailed {
                user_id: user_id.to_string(),
                reason: format!("no {} connection to touch", provider),
            })?;
        record.last_synced = Some(at);
        Ok(())
    }

    async fn upsert_connection(&self, record: ConnectionRecord) -> Result<(), StoreError> {
        let mut connections = self.connections.write().await;
        let records = connections.entry(record.user_id.clone()).or_default();
        match records.iter_mut().find(|c| c.provider_type == record.provider_type) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        Ok(())
    }
}

/// Serves queries from a normalized provider export
///
/// The export belongs to a single user, so the `user_id` argument of each
/// query is not used to filter.
#[derive(Debug, Clone)]
pub struct SnapshotFileProvider {
    provider_type: ProviderType,
    batch: NormalizedBatch,
}

impl SnapshotFileProvider {
    pub fn from_export(provider_type: ProviderType, export: &ProviderExport) -> Self {
        let batch = SampleNormalizer::normalize_export(export, provider_type.as_str());
        if batch.dropped > 0 {
            tracing::warn!(provider = %provider_type, dropped = batch.dropped, "Snapshot contained invalid samples");
        }
        Self { provider_type, batch }
    }

    /// Read a JSON export from disk
    pub fn from_file<P: AsRef<Path>>(provider_type: ProviderType, path: P) -> Result<Self, ProviderError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ProviderError::Snapshot {
            reason: format!("{}: {}", path.display(), e),
        })?;
        let export: ProviderExport = serde_json::from_str(&content).map_err(|e| ProviderError::Snapshot {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Ok(Self::from_export(provider_type, &export))
    }
}

fn within(timestamp: DateTime<Utc>, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
    timestamp >= from && timestamp <= to
}

#[async_trait]
impl DeviceDataProvider for SnapshotFileProvider {
    fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    async fn query_metric(
        &self,
        _user_id: &str,
        metric: MetricType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<HealthMetric>, ProviderError> {
        let samples = match metric {
            MetricType::Steps => &self.batch.steps,
            MetricType::HeartRate => &self.batch.heart_rate,
            MetricType::ActiveCalories => &self.batch.active_calories,
        };
        Ok(samples
            .iter()
            .filter(|m| within(m.timestamp, from, to))
            .cloned()
            .collect())
    }

    async fn query_sleep(
        &self,
        _user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SleepInterval>, ProviderError> {
        Ok(self
            .batch
            .sleep
            .iter()
            .filter(|s| within(s.end_time, from, to))
            .cloned()
            .collect())
    }

    async fn query_workouts(
        &self,
        _user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<WorkoutSession>, ProviderError> {
        Ok(self
            .batch
            .workouts
            .iter()
            .filter(|w| within(w.end_time, from, to))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::{RawQuantitySample, RawSleepSample, StageCode};
    use chrono::Duration;

    #[tokio::test]
    async fn test_memory_store_full_replace() {
        let store = MemoryProfileStore::new();
        let now = Utc::now();
        assert!(store.get_record("user-1").await.unwrap().is_none());

        let mut record = CanonicalHealthRecord::empty("user-1", now);
        record.steps.push(HealthMetric::new(1200.0, now, "phone"));
        store.put_record("user-1", &record).await.unwrap();

        let replacement = CanonicalHealthRecord::empty("user-1", now);
        store.put_record("user-1", &replacement).await.unwrap();

        let stored = store.get_record("user-1").await.unwrap().unwrap();
        assert!(stored.steps.is_empty());
    }

    #[tokio::test]
    async fn test_memory_registry_touch_and_upsert() {
        let registry = MemoryConnectionRegistry::new();
        let now = Utc::now();

        assert!(registry.touch_sync("user-1", ProviderType::Oura, now).await.is_err());

        registry
            .upsert_connection(ConnectionRecord::new("user-1", ProviderType::Oura, vec!["sleep".into()]))
            .await
            .unwrap();
        registry.touch_sync("user-1", ProviderType::Oura, now).await.unwrap();

        let connections = registry.get_connections("user-1").await.unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].last_synced, Some(now));

        let mut disconnected = connections[0].clone();
        disconnected.is_connected = false;
        registry.upsert_connection(disconnected).await.unwrap();

        let connections = registry.get_connections("user-1").await.unwrap();
        assert_eq!(connections.len(), 1);
        assert!(!connections[0].is_connected);
    }

    #[tokio::test]
    async fn test_snapshot_provider_filters_by_window() {
        let now = Utc::now();
        let export = ProviderExport {
            heart_rate: vec![
                RawQuantitySample {
                    value: Some(58.0),
                    end_date: now - Duration::days(10),
                    source: None,
                },
                RawQuantitySample {
                    value: Some(62.0),
                    end_date: now - Duration::hours(3),
                    source: None,
                },
            ],
            sleep: vec![RawSleepSample {
                start_date: now - Duration::hours(9),
                end_date: now - Duration::hours(8),
                stage: Some(StageCode::Numeric(5)),
            }],
            ..Default::default()
        };

        let provider = SnapshotFileProvider::from_export(ProviderType::AppleHealth, &export);
        let from = now - Duration::days(7);

        let heart_rate = provider
            .query_metric("user-1", MetricType::HeartRate, from, now)
            .await
            .unwrap();
        assert_eq!(heart_rate.len(), 1);
        assert_eq!(heart_rate[0].value, 62.0);
        assert_eq!(heart_rate[0].source, "apple-health");

        let sleep = provider.query_sleep("user-1", from, now).await.unwrap();
        assert_eq!(sleep.len(), 1);

        let workouts = provider.query_workouts("user-1", from, now).await.unwrap();
        assert!(workouts.is_empty());
    }

    #[test]
    fn test_snapshot_missing_file() {
        let result = SnapshotFileProvider::from_file(ProviderType::Garmin, "/nonexistent/export.json");
        assert!(matches!(result, Err(ProviderError::Snapshot { .. })));
    }
}
