use chrono::{DateTime, Utc};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use rusqlite::{params, Connection, OptionalExtension};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{CanonicalHealthRecord, ConnectionRecord, ProviderType};
use crate::provider::{ConnectionRegistry, ProfileStore};

/// Gzip-compressed bincode encoding of a canonical record
#[derive(Debug, Clone)]
pub struct CompressedRecord {
    pub compressed_data: Vec<u8>,
    pub original_size: usize,
    pub sample_count: usize,
}

impl CompressedRecord {
    pub fn compress(record: &CanonicalHealthRecord) -> Result<Self, StoreError> {
        let serialized = bincode::serialize(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let original_size = serialized.len();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&serialized)?;
        let compressed_data = encoder.finish()?;

        Ok(Self {
            compressed_data,
            original_size,
            sample_count: record.sample_count(),
        })
    }

    pub fn decompress(&self) -> Result<CanonicalHealthRecord, StoreError> {
        let mut decoder = GzDecoder::new(self.compressed_data.as_slice());
        let mut decompressed = Vec::with_capacity(self.original_size);
        decoder.read_to_end(&mut decompressed)?;

        bincode::deserialize(&decompressed).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Original size / compressed size
    pub fn compression_ratio(&self) -> f64 {
        if self.compressed_data.is_empty() {
            return 0.0;
        }
        self.original_size as f64 / self.compressed_data.len() as f64
    }
}

/// Aggregate numbers about the store's contents
#[derive(Debug, Clone, PartialEq)]
pub struct StoreStats {
    pub record_count: usize,
    pub connection_count: usize,
    pub total_original_size: usize,
    pub total_compressed_size: usize,
}

impl StoreStats {
    pub fn compression_ratio(&self) -> f64 {
        if self.total_compressed_size == 0 {
            return 0.0;
        }
        self.total_original_size as f64 / self.total_compressed_size as f64
    }
}

/// SQLite-backed profile store and connection registry
///
/// Queries run on the blocking thread pool so the async runtime is never
/// stalled by disk I/O.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Create or open a database at the specified path
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    /// A private database that disappears when the store is dropped
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `op` against the connection on the blocking pool
    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            op(&mut guard)
        })
        .await
        .map_err(|e| StoreError::TaskFailed(e.to_string()))?
    }

    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.run(|conn| load_stats(conn)).await
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    // journal_mode returns a row, so it cannot go through execute()
    conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
    conn.execute_batch(
        r#"
        PRAGMA synchronous=NORMAL;

        CREATE TABLE IF NOT EXISTS health_records (
            user_id TEXT PRIMARY KEY,
            last_updated TEXT NOT NULL,
            steps_count INTEGER NOT NULL,
            heart_rate_count INTEGER NOT NULL,
            sleep_count INTEGER NOT NULL,
            calories_count INTEGER NOT NULL,
            workouts_count INTEGER NOT NULL,
            original_size INTEGER NOT NULL,
            payload BLOB NOT NULL
        );

        CREATE TABLE IF NOT EXISTS connections (
            user_id TEXT NOT NULL,
            provider_type TEXT NOT NULL,
            is_connected INTEGER NOT NULL,
            last_synced TEXT,
            permissions TEXT NOT NULL DEFAULT '[]',
            PRIMARY KEY (user_id, provider_type)
        );
        "#,
    )?;
    Ok(())
}

fn load_record(conn: &Connection, user_id: &str) -> Result<Option<CanonicalHealthRecord>, StoreError> {
    let row: Option<(Vec<u8>, i64)> = conn
        .query_row(
            "SELECT payload, original_size FROM health_records WHERE user_id = ?1",
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((compressed_data, original_size)) = row else {
        return Ok(None);
    };

    let compressed = CompressedRecord {
        compressed_data,
        original_size: original_size.max(0) as usize,
        sample_count: 0,
    };
    compressed.decompress().map(Some).map_err(|e| StoreError::ReadFailed {
        user_id: user_id.to_string(),
        reason: e.to_string(),
    })
}

fn save_record(conn: &Connection, user_id: &str, record: &CanonicalHealthRecord) -> Result<(), StoreError> {
    let compressed = CompressedRecord::compress(record)?;

    conn.execute(
        r#"
        INSERT OR REPLACE INTO health_records (
            user_id, last_updated, steps_count, heart_rate_count, sleep_count,
            calories_count, workouts_count, original_size, payload
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            user_id,
            record.last_updated,
            record.steps.len() as i64,
            record.heart_rate.len() as i64,
            record.sleep.len() as i64,
            record.calories_burned.len() as i64,
            record.workouts.len() as i64,
            compressed.original_size as i64,
            compressed.compressed_data,
        ],
    )?;

    tracing::debug!(
        user_id,
        samples = compressed.sample_count,
        compression_ratio = compressed.compression_ratio(),
        "Stored canonical record"
    );
    Ok(())
}

fn load_connections(conn: &Connection, user_id: &str) -> Result<Vec<ConnectionRecord>, StoreError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT provider_type, is_connected, last_synced, permissions
        FROM connections
        WHERE user_id = ?1
        ORDER BY provider_type
        "#,
    )?;

    let rows = stmt
        .query_map(params![user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, bool>(1)?,
                row.get::<_, Option<DateTime<Utc>>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(provider, is_connected, last_synced, permissions)| -> Result<ConnectionRecord, StoreError> {
            let provider_type: ProviderType = provider.parse().map_err(|e: String| StoreError::ReadFailed {
                user_id: user_id.to_string(),
                reason: e,
            })?;
            let permissions: Vec<String> =
                serde_json::from_str(&permissions).map_err(|e| StoreError::Serialization(e.to_string()))?;

            Ok(ConnectionRecord {
                user_id: user_id.to_string(),
                provider_type,
                is_connected,
                last_synced,
                permissions,
            })
        })
        .collect()
}

fn save_connection(conn: &Connection, record: &ConnectionRecord) -> Result<(), StoreError> {
    let permissions =
        serde_json::to_string(&record.permissions).map_err(|e| StoreError::Serialization(e.to_string()))?;

    conn.execute(
        r#"
        INSERT OR REPLACE INTO connections (
            user_id, provider_type, is_connected, last_synced, permissions
        ) VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            record.user_id,
            record.provider_type.as_str(),
            record.is_connected,
            record.last_synced,
            permissions,
        ],
    )?;
    Ok(())
}

fn touch_connection(
    conn: &Connection,
    user_id: &str,
    provider: ProviderType,
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    let updated = conn.execute(
        "UPDATE connections SET last_synced = ?1 WHERE user_id = ?2 AND provider_type = ?3",
        params![at, user_id, provider.as_str()],
    )?;

    if updated == 0 {
        return Err(StoreError::WriteFailed {
            user_id: user_id.to_string(),
            reason: format!("no {} connection to touch", provider),
        });
    }
    Ok(())
}

fn load_stats(conn: &Connection) -> Result<StoreStats, StoreError> {
    let (record_count, total_original_size, total_compressed_size): (i64, i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(original_size), 0), COALESCE(SUM(LENGTH(payload)), 0) FROM health_records",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    let connection_count: i64 = conn.query_row("SELECT COUNT(*) FROM connections", [], |row| row.get(0))?;

    Ok(StoreStats {
        record_count: record_count as usize,
        connection_count: connection_count as usize,
        total_original_size: total_original_size as usize,
        total_compressed_size: total_compressed_size as usize,
    })
}

#[async_trait]
impl ProfileStore for SqliteStore {
    async fn get_record(&self, user_id: &str) -> Result<Option<CanonicalHealthRecord>, StoreError> {
        let user_id = user_id.to_string();
        self.run(move |conn| load_record(conn, &user_id)).await
    }

    async fn put_record(&self, user_id: &str, record: &CanonicalHealthRecord) -> Result<(), StoreError> {
        let user_id = user_id.to_string();
        let record = record.clone();
        self.run(move |conn| save_record(conn, &user_id, &record)).await
    }
}

#[async_trait]
impl ConnectionRegistry for SqliteStore {
    async fn get_connections(&self, user_id: &str) -> Result<Vec<ConnectionRecord>, StoreError> {
        let user_id = user_id.to_string();
        self.run(move |conn| load_connections(conn, &user_id)).await
    }

    async fn touch_sync(
        &self,
        user_id: &str,
        provider: ProviderType,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let user_id = user_id.to_string();
        self.run(move |conn| touch_connection(conn, &user_id, provider, at)).await
    }

    async fn upsert_connection(&self, record: ConnectionRecord) -> Result<(), StoreError> {
        self.run(move |conn| save_connection(conn, &record)).await
    }
}
