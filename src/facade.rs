//! Health data facade
//!
//! The single entry point for presentation code. Each call performs one fetch
//! through the sync policy and derives the record, recovery status and sleep
//! summary from that same record, so the three never disagree about which sync
//! they reflect.
//!
//! Only persistence failures populate `error`. Missing connections and
//! insufficient signal come back as `None` fields.
//!
//! Overlapping fetches for one user are numbered as they start. A result is
//! published only if no later-started fetch has published already, and
//! `loading` stays set until the last overlapping fetch finishes. A user's
//! channel is dropped once nothing is in flight and nobody subscribes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::error::RecoveryError;
use crate::models::{CanonicalHealthRecord, RecoveryStatus, SleepSummary};
use crate::recovery::RecoveryScorer;
use crate::sleep::SleepSummarizer;
use crate::sync::{SyncPolicy, SyncReport};

/// Derived per-user state exposed to callers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthStatus {
    pub record: Option<CanonicalHealthRecord>,
    pub recovery_status: Option<RecoveryStatus>,
    pub sleep_summary: Option<SleepSummary>,
    /// True while a fetch for this user is in flight
    pub loading: bool,
    /// User-facing message for a persistence failure
    pub error: Option<String>,
}

impl HealthStatus {
    /// Derive all state from one record
    pub fn derive(
        scorer: &RecoveryScorer,
        record: Option<CanonicalHealthRecord>,
        reference: DateTime<Utc>,
    ) -> Self {
        let recovery_status = record.as_ref().and_then(|r| scorer.score_at(r, reference));
        let sleep_summary = record
            .as_ref()
            .and_then(|r| SleepSummarizer::summarize(&r.sleep, reference));

        Self {
            record,
            recovery_status,
            sleep_summary,
            loading: false,
            error: None,
        }
    }

    /// True when the user has no data at all, typically meaning no device is connected
    pub fn is_unconnected(&self) -> bool {
        self.record.is_none() && self.error.is_none()
    }
}

/// Published state of one user plus bookkeeping for overlapping fetches
struct UserChannel {
    sender: watch::Sender<HealthStatus>,
    in_flight: usize,
    next_fetch: u64,
    published_fetch: Option<u64>,
}

impl UserChannel {
    fn new() -> Self {
        Self {
            sender: watch::channel(HealthStatus::default()).0,
            in_flight: 0,
            next_fetch: 0,
            published_fetch: None,
        }
    }

    fn is_idle(&self) -> bool {
        self.in_flight == 0 && self.sender.receiver_count() == 0
    }
}

/// A fetch registered by `HealthDataFacade::begin`
///
/// Dropped without completing (the caller was cancelled), it only releases its
/// share of `loading`.
struct Fetch<'a> {
    facade: &'a HealthDataFacade,
    user_id: String,
    number: u64,
    finished: bool,
}

impl Fetch<'_> {
    fn complete<F>(mut self, update: F) -> HealthStatus
    where
        F: FnOnce(&mut HealthStatus),
    {
        self.finished = true;
        self.facade.finish(&self.user_id, self.number, Some(update))
    }
}

impl Drop for Fetch<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.facade
                .finish(&self.user_id, self.number, None::<fn(&mut HealthStatus)>);
        }
    }
}

pub struct HealthDataFacade {
    sync: Arc<SyncPolicy>,
    scorer: RecoveryScorer,
    channels: Mutex<HashMap<String, UserChannel>>,
}

impl HealthDataFacade {
    pub fn new(sync: Arc<SyncPolicy>) -> Self {
        Self::with_scorer(sync, RecoveryScorer::default())
    }

    pub fn with_scorer(sync: Arc<SyncPolicy>, scorer: RecoveryScorer) -> Self {
        Self {
            sync,
            scorer,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Observe a user's state; the receiver sees `loading` flip during each fetch
    ///
    /// The last published state is retained for as long as a receiver is alive.
    pub fn subscribe(&self, user_id: &str) -> watch::Receiver<HealthStatus> {
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        channels.retain(|_, channel| !channel.is_idle());
        channels
            .entry(user_id.to_string())
            .or_insert_with(UserChannel::new)
            .sender
            .subscribe()
    }

    /// Number of users with retained state
    pub fn tracked_users(&self) -> usize {
        self.channels.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Current state for a user, syncing first if a connected provider is stale
    #[tracing::instrument(skip(self))]
    pub async fn get_status(&self, user_id: &str) -> HealthStatus {
        let fetch = self.begin(user_id);

        match self.sync.ensure_fresh(user_id).await {
            Ok(record) => self.settle(fetch, record),
            Err(e) => self.fail(fetch, e),
        }
    }

    /// Sync now regardless of the staleness window, then derive fresh state
    pub async fn refresh(&self, user_id: &str) -> HealthStatus {
        self.refresh_with_report(user_id).await.0
    }

    /// Like [`HealthDataFacade::refresh`], also returning the report of the sync pass
    ///
    /// The report is `None` when no connected provider could be synced; the
    /// state then reflects whatever the profile store already holds.
    #[tracing::instrument(skip(self))]
    pub async fn refresh_with_report(&self, user_id: &str) -> (HealthStatus, Option<SyncReport>) {
        let fetch = self.begin(user_id);

        let result = match self.sync.force_sync(user_id).await {
            Ok(Some(outcome)) => Ok((Some(outcome.record), Some(outcome.report))),
            Ok(None) => self.sync.ensure_fresh(user_id).await.map(|record| (record, None)),
            Err(e) => Err(e),
        };

        match result {
            Ok((record, report)) => (self.settle(fetch, record), report),
            Err(e) => (self.fail(fetch, e), None),
        }
    }

    fn settle(&self, fetch: Fetch<'_>, record: Option<CanonicalHealthRecord>) -> HealthStatus {
        let status = HealthStatus::derive(&self.scorer, record, Utc::now());
        tracing::debug!(
            has_record = status.record.is_some(),
            score = status.recovery_status.as_ref().map(|r| r.score),
            "Derived health status"
        );
        fetch.complete(|current| *current = status)
    }

    /// Keep the last good state and surface the failure
    fn fail(&self, fetch: Fetch<'_>, error: RecoveryError) -> HealthStatus {
        tracing::error!(error = %error, severity = ?error.severity(), "Health status unavailable");
        let message = error.user_message();
        fetch.complete(|current| current.error = Some(message))
    }

    /// Register a fetch for the user and publish `loading`
    fn begin(&self, user_id: &str) -> Fetch<'_> {
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        let channel = channels.entry(user_id.to_string()).or_insert_with(UserChannel::new);

        let fetch = channel.next_fetch;
        channel.next_fetch += 1;
        channel.in_flight += 1;
        channel.sender.send_modify(|status| status.loading = true);

        Fetch {
            facade: self,
            user_id: user_id.to_string(),
            number: fetch,
            finished: false,
        }
    }

    /// Apply a finished fetch and return the state now published
    ///
    /// A fetch that started before the one last published is discarded; its
    /// caller receives the newer state instead.
    fn finish<F>(&self, user_id: &str, fetch: u64, update: Option<F>) -> HealthStatus
    where
        F: FnOnce(&mut HealthStatus),
    {
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        let channel = channels.entry(user_id.to_string()).or_insert_with(UserChannel::new);

        channel.in_flight = channel.in_flight.saturating_sub(1);
        let loading = channel.in_flight > 0;

        let update = match update {
            Some(update) if channel.published_fetch.map_or(true, |published| fetch > published) => {
                channel.published_fetch = Some(fetch);
                Some(update)
            }
            Some(_) => {
                tracing::debug!(fetch, "Discarding result of a superseded fetch");
                None
            }
            None => None,
        };

        channel.sender.send_modify(|status| {
            if let Some(update) = update {
                update(status);
            }
            status.loading = loading;
        });

        let current = channel.sender.borrow().clone();
        if channel.is_idle() {
            channels.remove(user_id);
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncSettings;
    use crate::models::{ConnectionRecord, HealthMetric, ProviderType, SleepInterval, SleepStage};
    use crate::provider::{ConnectionRegistry, MemoryConnectionRegistry, MemoryProfileStore, ProfileStore};
    use chrono::Duration;

    fn facade_with_store(store: Arc<MemoryProfileStore>) -> HealthDataFacade {
        let policy = SyncPolicy::new(Arc::new(MemoryConnectionRegistry::new()), store, SyncSettings::default());
        HealthDataFacade::new(Arc::new(policy))
    }

    #[test]
    fn test_derive_is_consistent() {
        let now = Utc::now();
        let mut record = CanonicalHealthRecord::empty("user-1", now);
        let end = now - Duration::hours(1);
        record
            .sleep
            .push(SleepInterval::new(SleepStage::Deep, end - Duration::minutes(120), end).unwrap());

        let status = HealthStatus::derive(&RecoveryScorer::default(), Some(record), now);
        assert!(status.record.is_some());
        assert_eq!(status.sleep_summary.as_ref().map(|s| s.sleep_score), Some(75));
        assert!(status.recovery_status.is_some());
        assert!(!status.loading);
        assert!(status.error.is_none());
    }

    #[test]
    fn test_derive_without_record() {
        let status = HealthStatus::derive(&RecoveryScorer::default(), None, Utc::now());
        assert!(status.is_unconnected());
        assert!(status.recovery_status.is_none());
        assert!(status.sleep_summary.is_none());
    }

    #[tokio::test]
    async fn test_unconnected_user_serves_stored_record() {
        let store = Arc::new(MemoryProfileStore::new());
        let now = Utc::now();
        let mut record = CanonicalHealthRecord::empty("user-1", now);
        record.heart_rate.push(HealthMetric::new(58.0, now, "manual"));
        store.insert(record).await;

        let facade = facade_with_store(store);
        let status = facade.get_status("user-1").await;
        assert!(status.record.is_some());
        assert_eq!(status.recovery_status.map(|r| r.contributing_factors.resting_heart_rate), Some(58.0));

        let empty = facade.get_status("user-2").await;
        assert!(empty.is_unconnected());
    }

    #[tokio::test]
    async fn test_subscribers_observe_settled_state() {
        let facade = facade_with_store(Arc::new(MemoryProfileStore::new()));
        let mut receiver = facade.subscribe("user-1");
        assert!(!receiver.borrow().loading);

        let status = facade.refresh("user-1").await;
        assert!(receiver.has_changed().unwrap());
        let observed = receiver.borrow_and_update().clone();
        assert_eq!(observed, status);
        assert!(!observed.loading);
    }

    #[tokio::test]
    async fn test_refresh_without_provider_client_falls_back_to_store() {
        let registry = Arc::new(MemoryConnectionRegistry::new());
        registry
            .upsert_connection(ConnectionRecord::new("user-1", ProviderType::Fitbit, Vec::new()))
            .await
            .unwrap();
        let store = Arc::new(MemoryProfileStore::new());
        store
            .put_record("user-1", &CanonicalHealthRecord::empty("user-1", Utc::now()))
            .await
            .unwrap();

        let policy = SyncPolicy::new(registry, store, SyncSettings::default());
        let facade = HealthDataFacade::new(Arc::new(policy));
        let (status, report) = facade.refresh_with_report("user-1").await;

        assert!(report.is_none());
        assert!(status.record.is_some());
        assert!(status.recovery_status.is_none());
    }
}
