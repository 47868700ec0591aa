use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use recoveryrs::config::SyncSettings;
use recoveryrs::error::{ProviderError, RecoveryError, StoreError};
use recoveryrs::models::{
    CanonicalHealthRecord, ConnectionRecord, HealthMetric, MetricType, ProviderType, SampleCategory,
    SleepInterval, SleepStage, WorkoutSession,
};
use recoveryrs::provider::{
    ConnectionRegistry, DeviceDataProvider, MemoryConnectionRegistry, MemoryProfileStore, ProfileStore,
};
use recoveryrs::sync::SyncPolicy;

/// Integration tests for the staleness-driven sync policy

/// Provider double that counts queries and can fail or stall selected categories
struct CountingProvider {
    provider_type: ProviderType,
    calls: AtomicUsize,
    failing: Vec<SampleCategory>,
    delay_ms: u64,
}

impl CountingProvider {
    fn new(provider_type: ProviderType) -> Self {
        Self {
            provider_type,
            calls: AtomicUsize::new(0),
            failing: Vec::new(),
            delay_ms: 0,
        }
    }

    fn failing(mut self, category: SampleCategory) -> Self {
        self.failing.push(category);
        self
    }

    fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self, category: SampleCategory) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if self.failing.contains(&category) {
            return Err(ProviderError::QueryFailed {
                category,
                reason: "provider returned 503".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceDataProvider for CountingProvider {
    fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    async fn query_metric(
        &self,
        _user_id: &str,
        metric: MetricType,
        _from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<HealthMetric>, ProviderError> {
        self.enter(metric.into()).await?;
        let source = self.provider_type.as_str();
        let samples = match metric {
            MetricType::Steps => vec![
                HealthMetric::new(3200.0, to - Duration::hours(5), source),
                HealthMetric::new(4100.0, to - Duration::hours(2), source),
            ],
            MetricType::HeartRate => (0..6)
                .map(|i| HealthMetric::new(56.0 + i as f64, to - Duration::minutes(20 * i), source))
                .collect(),
            MetricType::ActiveCalories => vec![HealthMetric::new(450.0, to - Duration::hours(1), source)],
        };
        Ok(samples)
    }

    async fn query_sleep(
        &self,
        _user_id: &str,
        _from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SleepInterval>, ProviderError> {
        self.enter(SampleCategory::Sleep).await?;
        let end = to - Duration::hours(6);
        Ok(vec![
            SleepInterval::new(SleepStage::Deep, end - Duration::minutes(90), end)
                .map_err(|e| ProviderError::Snapshot { reason: e.to_string() })?,
        ])
    }

    async fn query_workouts(
        &self,
        _user_id: &str,
        _from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<WorkoutSession>, ProviderError> {
        self.enter(SampleCategory::Workouts).await?;
        let end = to - Duration::hours(3);
        Ok(vec![
            WorkoutSession::new("running", end - Duration::minutes(50), end, 520.0)
                .map_err(|e| ProviderError::Snapshot { reason: e.to_string() })?,
        ])
    }
}

/// Profile store whose writes always fail
#[derive(Default)]
struct ReadOnlyStore {
    inner: MemoryProfileStore,
}

#[async_trait]
impl ProfileStore for ReadOnlyStore {
    async fn get_record(&self, user_id: &str) -> Result<Option<CanonicalHealthRecord>, StoreError> {
        self.inner.get_record(user_id).await
    }

    async fn put_record(&self, user_id: &str, _record: &CanonicalHealthRecord) -> Result<(), StoreError> {
        Err(StoreError::WriteFailed {
            user_id: user_id.to_string(),
            reason: "disk full".to_string(),
        })
    }
}

const USER: &str = "user-1";

async fn registry_with(connections: Vec<ConnectionRecord>) -> Arc<MemoryConnectionRegistry> {
    let registry = Arc::new(MemoryConnectionRegistry::new());
    for connection in connections {
        registry.upsert_connection(connection).await.unwrap();
    }
    registry
}

fn synced_at(provider: ProviderType, at: DateTime<Utc>) -> ConnectionRecord {
    let mut connection = ConnectionRecord::new(USER, provider, Vec::new());
    connection.last_synced = Some(at);
    connection
}

#[tokio::test]
async fn test_second_call_within_window_issues_no_queries() {
    let provider = Arc::new(CountingProvider::new(ProviderType::AppleHealth));
    let registry = registry_with(vec![ConnectionRecord::new(USER, ProviderType::AppleHealth, Vec::new())]).await;
    let policy = SyncPolicy::new(registry, Arc::new(MemoryProfileStore::new()), SyncSettings::default())
        .with_provider(provider.clone());

    let first = policy.ensure_fresh(USER).await.unwrap().unwrap();
    assert_eq!(provider.calls(), SampleCategory::ALL.len());

    let second = policy.ensure_fresh(USER).await.unwrap().unwrap();
    assert_eq!(provider.calls(), SampleCategory::ALL.len());
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_failing_category_does_not_abort_sync() {
    let provider = Arc::new(CountingProvider::new(ProviderType::AppleHealth).failing(SampleCategory::Workouts));
    let registry = registry_with(vec![ConnectionRecord::new(USER, ProviderType::AppleHealth, Vec::new())]).await;
    let policy = SyncPolicy::new(registry.clone(), Arc::new(MemoryProfileStore::new()), SyncSettings::default())
        .with_provider(provider.clone());

    let record = policy.ensure_fresh(USER).await.unwrap().unwrap();

    assert_eq!(record.steps.len(), 2);
    assert_eq!(record.heart_rate.len(), 6);
    assert_eq!(record.sleep.len(), 1);
    assert!(record.workouts.is_empty());

    // The pass still counts as a sync attempt
    let connections = registry.get_connections(USER).await.unwrap();
    assert!(connections[0].last_synced.is_some());
}

#[tokio::test]
async fn test_every_category_failing_still_touches_connection() {
    let mut provider = CountingProvider::new(ProviderType::Oura);
    for category in SampleCategory::ALL {
        provider = provider.failing(category);
    }
    let provider = Arc::new(provider);
    let registry = registry_with(vec![ConnectionRecord::new(USER, ProviderType::Oura, Vec::new())]).await;
    let policy = SyncPolicy::new(registry.clone(), Arc::new(MemoryProfileStore::new()), SyncSettings::default())
        .with_provider(provider.clone());

    let outcome = policy.force_sync(USER).await.unwrap().unwrap();
    assert!(outcome.record.is_empty());
    assert_eq!(outcome.report.failed().count(), SampleCategory::ALL.len());

    // Fresh now, so no retry loop on the next call
    policy.ensure_fresh(USER).await.unwrap();
    assert_eq!(provider.calls(), SampleCategory::ALL.len());
    assert!(registry.get_connections(USER).await.unwrap()[0].last_synced.is_some());
}

#[tokio::test]
async fn test_no_connection_returns_stored_record_without_queries() {
    let provider = Arc::new(CountingProvider::new(ProviderType::Fitbit));
    let store = Arc::new(MemoryProfileStore::new());
    let stored = CanonicalHealthRecord::empty(USER, Utc::now() - Duration::days(3));
    store.insert(stored.clone()).await;

    let mut disconnected = ConnectionRecord::new(USER, ProviderType::Fitbit, Vec::new());
    disconnected.is_connected = false;
    let registry = registry_with(vec![disconnected]).await;

    let policy = SyncPolicy::new(registry, store, SyncSettings::default()).with_provider(provider.clone());

    assert_eq!(policy.ensure_fresh(USER).await.unwrap(), Some(stored));
    assert!(policy.ensure_fresh("someone-else").await.unwrap().is_none());
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_fresh_connection_with_empty_store_bootstraps_once() {
    let provider = Arc::new(CountingProvider::new(ProviderType::Garmin));
    let registry = registry_with(vec![synced_at(ProviderType::Garmin, Utc::now())]).await;
    let policy = SyncPolicy::new(registry, Arc::new(MemoryProfileStore::new()), SyncSettings::default())
        .with_provider(provider.clone());

    let record = policy.ensure_fresh(USER).await.unwrap();
    assert!(record.is_some());
    assert_eq!(provider.calls(), SampleCategory::ALL.len());

    policy.ensure_fresh(USER).await.unwrap();
    assert_eq!(provider.calls(), SampleCategory::ALL.len());
}

#[tokio::test]
async fn test_stale_connection_replaces_record() {
    let provider = Arc::new(CountingProvider::new(ProviderType::Whoop));
    let store = Arc::new(MemoryProfileStore::new());

    let mut old = CanonicalHealthRecord::empty(USER, Utc::now() - Duration::hours(2));
    old.steps.push(HealthMetric::new(99_999.0, Utc::now() - Duration::days(9), "whoop"));
    store.insert(old).await;

    let registry = registry_with(vec![synced_at(ProviderType::Whoop, Utc::now() - Duration::hours(2))]).await;
    let policy = SyncPolicy::new(registry, store, SyncSettings::default()).with_provider(provider.clone());

    let record = policy.ensure_fresh(USER).await.unwrap().unwrap();
    assert_eq!(provider.calls(), SampleCategory::ALL.len());
    assert_eq!(record.steps.len(), 2);
    assert!(record.steps.iter().all(|m| m.value < 99_999.0));
}

#[tokio::test]
async fn test_concurrent_callers_share_one_sync() {
    let provider = Arc::new(CountingProvider::new(ProviderType::AppleHealth).with_delay(50));
    let registry = registry_with(vec![ConnectionRecord::new(USER, ProviderType::AppleHealth, Vec::new())]).await;
    let policy = Arc::new(
        SyncPolicy::new(registry, Arc::new(MemoryProfileStore::new()), SyncSettings::default())
            .with_provider(provider.clone()),
    );

    let (a, b, c) = tokio::join!(
        policy.ensure_fresh(USER),
        policy.ensure_fresh(USER),
        policy.ensure_fresh(USER)
    );

    assert_eq!(provider.calls(), SampleCategory::ALL.len());
    let a = a.unwrap().unwrap();
    assert_eq!(Some(a.clone()), b.unwrap());
    assert_eq!(Some(a), c.unwrap());
}

#[tokio::test]
async fn test_force_sync_bypasses_staleness_window() {
    let provider = Arc::new(CountingProvider::new(ProviderType::Oura));
    let registry = registry_with(vec![synced_at(ProviderType::Oura, Utc::now())]).await;
    let policy = SyncPolicy::new(registry, Arc::new(MemoryProfileStore::new()), SyncSettings::default())
        .with_provider(provider.clone());

    policy.force_sync(USER).await.unwrap();
    policy.force_sync(USER).await.unwrap();
    assert_eq!(provider.calls(), 2 * SampleCategory::ALL.len());
}

#[tokio::test]
async fn test_multiple_providers_are_concatenated() {
    let watch = Arc::new(CountingProvider::new(ProviderType::AppleHealth));
    let ring = Arc::new(CountingProvider::new(ProviderType::Oura).failing(SampleCategory::Steps));
    let registry = registry_with(vec![
        ConnectionRecord::new(USER, ProviderType::AppleHealth, Vec::new()),
        synced_at(ProviderType::Oura, Utc::now()),
    ])
    .await;
    let policy = SyncPolicy::new(registry.clone(), Arc::new(MemoryProfileStore::new()), SyncSettings::default())
        .with_provider(watch.clone())
        .with_provider(ring.clone());

    let outcome = policy.force_sync(USER).await.unwrap().unwrap();
    let record = outcome.record;

    assert_eq!(record.heart_rate.len(), 12);
    assert_eq!(record.steps.len(), 2);
    assert!(record.steps.iter().all(|m| m.source == "apple-health"));
    assert!(record
        .heart_rate
        .windows(2)
        .all(|pair| pair[0].timestamp <= pair[1].timestamp));
    assert_eq!(outcome.report.outcomes.len(), 2 * SampleCategory::ALL.len());

    let connections = registry.get_connections(USER).await.unwrap();
    assert!(connections.iter().all(|c| c.last_synced == Some(outcome.report.finished_at)));
}

#[tokio::test]
async fn test_persistence_failure_is_surfaced() {
    let provider = Arc::new(CountingProvider::new(ProviderType::AppleHealth));
    let registry = registry_with(vec![ConnectionRecord::new(USER, ProviderType::AppleHealth, Vec::new())]).await;
    let policy = SyncPolicy::new(registry.clone(), Arc::new(ReadOnlyStore::default()), SyncSettings::default())
        .with_provider(provider);

    let result = policy.ensure_fresh(USER).await;
    assert!(matches!(result, Err(RecoveryError::Store(StoreError::WriteFailed { .. }))));

    // Not marked synced, so the next call retries
    assert!(registry.get_connections(USER).await.unwrap()[0].last_synced.is_none());
}
