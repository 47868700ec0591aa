// Library interface for RecoveryRS
// The CLI and integration tests build on these modules

pub mod activity;
pub mod config;
pub mod database;
pub mod error;
pub mod facade;
pub mod hrv;
pub mod logging;
pub mod models;
pub mod normalizer;
pub mod provider;
pub mod recovery;
pub mod scale;
pub mod sleep;
pub mod sync;

// Re-export commonly used types for convenience
pub use models::*;
pub use activity::{ActivityLoad, ActivityLoadEstimator, ActivityTier};
pub use config::{EngineConfig, SyncSettings};
pub use database::SqliteStore;
pub use error::{ErrorSeverity, ProviderError, RecoveryError, Result, StoreError, ValidationError};
pub use facade::{HealthDataFacade, HealthStatus};
pub use hrv::HrvEstimator;
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use normalizer::{ProviderExport, SampleNormalizer};
pub use provider::{
    ConnectionRegistry, DeviceDataProvider, MemoryConnectionRegistry, MemoryProfileStore, ProfileStore,
    SnapshotFileProvider,
};
pub use recovery::{RecoveryBand, RecoveryScorer, ScoreWeights};
pub use sleep::SleepSummarizer;
pub use sync::{CategoryOutcome, SyncOutcome, SyncPolicy, SyncReport};
