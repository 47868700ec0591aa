//! Sync policy
//!
//! Decides when the connected providers are queried and writes the resulting
//! canonical record to the profile store. One pass fetches the trailing window
//! for every sample category concurrently. A failing or timed-out category is
//! logged and treated as empty so the remaining categories still land.
//!
//! Syncs for a single user are serialized through a per-user lock and the
//! staleness check is repeated once the lock is held, so overlapping callers
//! share one provider pass instead of issuing their own.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::config::SyncSettings;
use crate::error::{ProviderError, Result};
use crate::models::{CanonicalHealthRecord, ConnectionRecord, MetricType, ProviderType, SampleCategory};
use crate::provider::{ConnectionRegistry, DeviceDataProvider, ProfileStore};

/// Result of one category query within a sync pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryOutcome {
    pub provider: ProviderType,
    pub category: SampleCategory,
    /// Samples kept for this category; 0 when the query failed
    pub samples: usize,
    /// Failure message when the category was treated as empty
    pub error: Option<String>,
}

impl CategoryOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Summary of one provider sync pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<CategoryOutcome>,
}

impl SyncReport {
    pub fn total_samples(&self) -> usize {
        self.outcomes.iter().map(|o| o.samples).sum()
    }

    pub fn failed(&self) -> impl Iterator<Item = &CategoryOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }

    /// True when every category of every provider answered
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(CategoryOutcome::succeeded)
    }

    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Record written by a sync pass together with its report
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub record: CanonicalHealthRecord,
    pub report: SyncReport,
}

/// Staleness-driven provider sync in front of the profile store
pub struct SyncPolicy {
    providers: HashMap<ProviderType, Arc<dyn DeviceDataProvider>>,
    connections: Arc<dyn ConnectionRegistry>,
    store: Arc<dyn ProfileStore>,
    settings: SyncSettings,
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SyncPolicy {
    pub fn new(
        connections: Arc<dyn ConnectionRegistry>,
        store: Arc<dyn ProfileStore>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            providers: HashMap::new(),
            connections,
            store,
            settings,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Register the client for one provider type, replacing any earlier one
    pub fn with_provider(mut self, provider: Arc<dyn DeviceDataProvider>) -> Self {
        self.register_provider(provider);
        self
    }

    pub fn register_provider(&mut self, provider: Arc<dyn DeviceDataProvider>) {
        self.providers.insert(provider.provider_type(), provider);
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Return the user's record, syncing first when a connected provider is stale
    ///
    /// - No connected provider: the stored record (possibly `None`), no provider call.
    /// - Any connected provider never synced or older than the staleness window:
    ///   one sync pass, then the freshly stored record.
    /// - Fresh providers but nothing stored yet: exactly one bootstrap pass.
    ///
    /// Only profile store and connection registry failures are returned as errors.
    #[tracing::instrument(skip(self))]
    pub async fn ensure_fresh(&self, user_id: &str) -> Result<Option<CanonicalHealthRecord>> {
        let connected = self.syncable_connections(user_id).await?;
        if connected.is_empty() {
            tracing::debug!("No connected provider, serving stored record");
            return Ok(self.store.get_record(user_id).await?);
        }

        if !self.any_stale(&connected) {
            if let Some(record) = self.store.get_record(user_id).await? {
                tracing::debug!("Providers synced within staleness window");
                return Ok(Some(record));
            }
        }

        let lease = self.user_lock(user_id);
        let _guard = lease.mutex.lock().await;

        // Another caller may have finished a pass while this one waited
        let connected = self.syncable_connections(user_id).await?;
        if connected.is_empty() {
            return Ok(self.store.get_record(user_id).await?);
        }
        if !self.any_stale(&connected) {
            if let Some(record) = self.store.get_record(user_id).await? {
                tracing::debug!("Sync completed by a concurrent caller");
                return Ok(Some(record));
            }
        }

        self.run_pass(user_id, &connected).await?;
        Ok(self.store.get_record(user_id).await?)
    }

    /// Sync every connected provider now, ignoring the staleness window
    ///
    /// Returns `None` when the user has no connected provider with a registered client.
    #[tracing::instrument(skip(self))]
    pub async fn force_sync(&self, user_id: &str) -> Result<Option<SyncOutcome>> {
        let lease = self.user_lock(user_id);
        let _guard = lease.mutex.lock().await;

        let connected = self.syncable_connections(user_id).await?;
        if connected.is_empty() {
            tracing::debug!("No connected provider to sync");
            return Ok(None);
        }

        self.run_pass(user_id, &connected).await.map(Some)
    }

    /// Connected providers that have a registered client
    async fn syncable_connections(&self, user_id: &str) -> Result<Vec<ConnectionRecord>> {
        let connections = self.connections.get_connections(user_id).await?;
        let mut syncable = Vec::new();

        for connection in connections.into_iter().filter(|c| c.is_connected) {
            if self.providers.contains_key(&connection.provider_type) {
                syncable.push(connection);
            } else {
                tracing::warn!(
                    provider = %connection.provider_type,
                    "Connected provider has no registered client"
                );
            }
        }

        Ok(syncable)
    }

    fn any_stale(&self, connections: &[ConnectionRecord]) -> bool {
        let now = Utc::now();
        let window = self.settings.staleness_window();
        connections.iter().any(|c| c.is_stale(now, window))
    }

    fn user_lock(&self, user_id: &str) -> UserLock<'_> {
        let mut locks = self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mutex = locks.entry(user_id.to_string()).or_default().clone();
        UserLock {
            policy: self,
            user_id: user_id.to_string(),
            mutex,
        }
    }

    /// Fetch the trailing window from every provider, replace the stored record, touch connections
    async fn run_pass(&self, user_id: &str, connected: &[ConnectionRecord]) -> Result<SyncOutcome> {
        let started_at = Utc::now();
        let from = started_at - self.settings.lookback();
        let mut record = CanonicalHealthRecord::empty(user_id, started_at);
        let mut outcomes = Vec::new();

        for connection in connected {
            let Some(provider) = self.providers.get(&connection.provider_type) else {
                continue;
            };
            let mut provider_outcomes = self
                .fetch_provider(provider.as_ref(), user_id, from, started_at, &mut record)
                .await;
            outcomes.append(&mut provider_outcomes);
        }

        record.sort_chronologically();

        if let Err(e) = self.store.put_record(user_id, &record).await {
            tracing::error!(error = %e, "Failed to persist canonical record");
            return Err(e.into());
        }

        let finished_at = Utc::now();
        for connection in connected {
            if let Err(e) = self
                .connections
                .touch_sync(user_id, connection.provider_type, finished_at)
                .await
            {
                tracing::error!(provider = %connection.provider_type, error = %e, "Failed to record sync time");
                return Err(e.into());
            }
        }

        let report = SyncReport {
            user_id: user_id.to_string(),
            started_at,
            finished_at,
            outcomes,
        };

        tracing::info!(
            samples = report.total_samples(),
            failed_categories = report.failed().count(),
            providers = connected.len(),
            elapsed_ms = report.elapsed_ms(),
            "Sync pass complete"
        );

        Ok(SyncOutcome { record, report })
    }

    /// Query all five categories of one provider concurrently and append the results
    async fn fetch_provider(
        &self,
        provider: &dyn DeviceDataProvider,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        record: &mut CanonicalHealthRecord,
    ) -> Vec<CategoryOutcome> {
        let provider_type = provider.provider_type();
        let limit = self.settings.provider_timeout();

        let (steps, heart_rate, sleep, workouts, calories) = tokio::join!(
            fetch_category(
                provider_type,
                SampleCategory::Steps,
                limit,
                provider.query_metric(user_id, MetricType::Steps, from, to),
            ),
            fetch_category(
                provider_type,
                SampleCategory::HeartRate,
                limit,
                provider.query_metric(user_id, MetricType::HeartRate, from, to),
            ),
            fetch_category(
                provider_type,
                SampleCategory::Sleep,
                limit,
                provider.query_sleep(user_id, from, to),
            ),
            fetch_category(
                provider_type,
                SampleCategory::Workouts,
                limit,
                provider.query_workouts(user_id, from, to),
            ),
            fetch_category(
                provider_type,
                SampleCategory::ActiveCalories,
                limit,
                provider.query_metric(user_id, MetricType::ActiveCalories, from, to),
            ),
        );

        record.steps.extend(steps.0);
        record.heart_rate.extend(heart_rate.0);
        record.sleep.extend(sleep.0);
        record.workouts.extend(workouts.0);
        record.calories_burned.extend(calories.0);

        vec![steps.1, heart_rate.1, sleep.1, workouts.1, calories.1]
    }
}

/// Handle on a user's sync mutex; the map entry is removed once the last handle drops
struct UserLock<'a> {
    policy: &'a SyncPolicy,
    user_id: String,
    mutex: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for UserLock<'_> {
    fn drop(&mut self) {
        let mut locks = self
            .policy
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // Map entry plus this handle: nobody else is waiting
        let last_holder = locks
            .get(&self.user_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &self.mutex) && Arc::strong_count(entry) == 2);
        if last_holder {
            locks.remove(&self.user_id);
        }
    }
}

/// Await one category query under a timeout; failures come back as an empty vector
async fn fetch_category<T, F>(
    provider: ProviderType,
    category: SampleCategory,
    limit: std::time::Duration,
    query: F,
) -> (Vec<T>, CategoryOutcome)
where
    F: Future<Output = std::result::Result<Vec<T>, ProviderError>>,
{
    let result = match tokio::time::timeout(limit, query).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout {
            category,
            seconds: limit.as_secs(),
        }),
    };

    match result {
        Ok(samples) => {
            let outcome = CategoryOutcome {
                provider,
                category,
                samples: samples.len(),
                error: None,
            };
            (samples, outcome)
        }
        Err(e) => {
            tracing::warn!(
                provider = %provider,
                category = %category,
                error = %e,
                "Category query failed, treating as empty"
            );
            let outcome = CategoryOutcome {
                provider,
                category,
                samples: 0,
                error: Some(e.to_string()),
            };
            (Vec::new(), outcome)
        }
    }
}
