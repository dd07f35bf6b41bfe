//! SQLite-backed cache store.

use super::traits::{BlobMetadata, CacheBlob, CacheRecord, CacheStore, RecordMetadata};
use crate::error::{DossierError, Result};
use crate::models::RecordPayload;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

const KIND_BLOB: &str = "blob";
const KIND_RECORD: &str = "record";

/// Durable cache store over a single SQLite database.
///
/// Two payload tables (`blobs`, `records`) share one `entry_metadata` table
/// keyed by `(id, kind)`. Thread-safe via an internal mutex on the
/// connection; each method call is one atomic unit from the caller's view.
pub struct SqliteCacheStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCacheStore {
    /// Open (or create) the cache database at `db_path`.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DossierError::Io {
                message: format!("Failed to create cache directory: {}", e),
                source: Some(e),
            })?;
        }

        let conn = Connection::open(db_path).map_err(|e| DossierError::CacheStorage {
            message: format!("Failed to open cache database: {}", e),
            source: Some(e),
        })?;

        // WAL mode for concurrent readers alongside the writer
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| DossierError::CacheStorage {
                message: format!("Failed to set pragmas: {}", e),
                source: Some(e),
            })?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| DossierError::CacheStorage {
            message: format!("Failed to lock cache database: {}", e),
            source: None,
        })
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            -- Binary payloads: archives and extracted entries
            CREATE TABLE IF NOT EXISTS blobs (
                id TEXT PRIMARY KEY,
                bytes BLOB NOT NULL
            );

            -- Mirrored remote documents, JSON-encoded
            CREATE TABLE IF NOT EXISTS records (
                id TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                payload TEXT NOT NULL
            );

            -- Shared per-entry metadata for both payload tables
            CREATE TABLE IF NOT EXISTS entry_metadata (
                id TEXT NOT NULL,
                kind TEXT NOT NULL,
                file_name TEXT,
                content_type TEXT,
                version TEXT,
                timestamp TEXT NOT NULL,
                ttl_secs INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL,
                PRIMARY KEY (id, kind)
            );

            -- Index for sweep queries
            CREATE INDEX IF NOT EXISTS idx_metadata_timestamp
                ON entry_metadata(timestamp);
            "#,
        )
        .map_err(|e| DossierError::CacheStorage {
            message: format!("Failed to initialize cache schema: {}", e),
            source: Some(e),
        })?;

        Ok(())
    }
}

impl CacheStore for SqliteCacheStore {
    fn put_blob(&self, id: &str, bytes: &[u8], metadata: &BlobMetadata) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "INSERT OR REPLACE INTO blobs (id, bytes) VALUES (?1, ?2)",
            params![id, bytes],
        )
        .map_err(|e| DossierError::CacheStorage {
            message: format!("Failed to store blob '{}': {}", id, e),
            source: Some(e),
        })?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO entry_metadata
            (id, kind, file_name, content_type, version, timestamp, ttl_secs, size_bytes)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                id,
                KIND_BLOB,
                metadata.file_name,
                metadata.content_type,
                metadata.version,
                metadata.timestamp.to_rfc3339(),
                ttl_to_secs(metadata.ttl),
                metadata.size_bytes as i64,
            ],
        )
        .map_err(|e| DossierError::CacheStorage {
            message: format!("Failed to store blob metadata '{}': {}", id, e),
            source: Some(e),
        })?;

        Ok(())
    }

    fn get_blob(&self, id: &str, expected_version: Option<&str>) -> Result<Option<CacheBlob>> {
        let conn = self.lock()?;

        let row: Option<(Vec<u8>, String, String, String, String, i64, i64)> = conn
            .query_row(
                r#"
                SELECT b.bytes, m.file_name, m.content_type, m.version,
                       m.timestamp, m.ttl_secs, m.size_bytes
                FROM blobs b
                JOIN entry_metadata m ON m.id = b.id AND m.kind = ?2
                WHERE b.id = ?1
                "#,
                params![id, KIND_BLOB],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| DossierError::CacheStorage {
                message: format!("Failed to query blob '{}': {}", id, e),
                source: Some(e),
            })?;

        let (bytes, file_name, content_type, version, timestamp_str, ttl_secs, size_bytes) =
            match row {
                Some(r) => r,
                None => return Ok(None),
            };

        let metadata = BlobMetadata {
            file_name,
            content_type,
            version,
            timestamp: parse_timestamp(&timestamp_str),
            ttl: secs_to_ttl(ttl_secs),
            size_bytes: size_bytes as u64,
        };

        if metadata.is_expired(Utc::now()) {
            debug!(id, "Cached blob expired, treating as miss");
            return Ok(None);
        }

        if let Some(expected) = expected_version {
            if metadata.version != expected {
                debug!(
                    id,
                    cached = %metadata.version,
                    expected,
                    "Blob version mismatch, treating as miss"
                );
                return Ok(None);
            }
        }

        Ok(Some(CacheBlob {
            id: id.to_string(),
            bytes,
            metadata,
        }))
    }

    fn delete_blob(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;

        let deleted = conn
            .execute("DELETE FROM blobs WHERE id = ?1", params![id])
            .map_err(|e| DossierError::CacheStorage {
                message: format!("Failed to delete blob '{}': {}", id, e),
                source: Some(e),
            })?;
        conn.execute(
            "DELETE FROM entry_metadata WHERE id = ?1 AND kind = ?2",
            params![id, KIND_BLOB],
        )
        .ok();

        Ok(deleted > 0)
    }

    fn put_record(&self, record: &CacheRecord) -> Result<()> {
        let conn = self.lock()?;
        let payload = serde_json::to_string(&record.payload)?;

        conn.execute(
            "INSERT OR REPLACE INTO records (id, path, payload) VALUES (?1, ?2, ?3)",
            params![record.id, record.path, payload],
        )
        .map_err(|e| DossierError::CacheStorage {
            message: format!("Failed to store record '{}': {}", record.id, e),
            source: Some(e),
        })?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO entry_metadata
            (id, kind, file_name, content_type, version, timestamp, ttl_secs, size_bytes)
            VALUES (?1, ?2, NULL, NULL, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.id,
                KIND_RECORD,
                record.metadata.version,
                record.metadata.timestamp.to_rfc3339(),
                ttl_to_secs(record.metadata.ttl),
                payload.len() as i64,
            ],
        )
        .map_err(|e| DossierError::CacheStorage {
            message: format!("Failed to store record metadata '{}': {}", record.id, e),
            source: Some(e),
        })?;

        Ok(())
    }

    fn get_record(&self, id: &str, max_age: Option<Duration>) -> Result<Option<CacheRecord>> {
        let conn = self.lock()?;

        let row: Option<(String, String, Option<String>, String, i64)> = conn
            .query_row(
                r#"
                SELECT r.path, r.payload, m.version, m.timestamp, m.ttl_secs
                FROM records r
                JOIN entry_metadata m ON m.id = r.id AND m.kind = ?2
                WHERE r.id = ?1
                "#,
                params![id, KIND_RECORD],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| DossierError::CacheStorage {
                message: format!("Failed to query record '{}': {}", id, e),
                source: Some(e),
            })?;

        let (path, payload_str, version, timestamp_str, ttl_secs) = match row {
            Some(r) => r,
            None => return Ok(None),
        };

        let metadata = RecordMetadata {
            timestamp: parse_timestamp(&timestamp_str),
            version,
            ttl: secs_to_ttl(ttl_secs),
        };

        let now = Utc::now();
        let expired = match max_age {
            Some(limit) => {
                RecordMetadata {
                    ttl: limit,
                    ..metadata.clone()
                }
                .is_expired(now)
            }
            None => metadata.is_expired(now),
        };
        if expired {
            debug!(id, "Cached record expired, treating as miss");
            return Ok(None);
        }

        let payload: RecordPayload = serde_json::from_str(&payload_str)?;

        Ok(Some(CacheRecord {
            id: id.to_string(),
            path,
            payload,
            metadata,
        }))
    }

    fn delete_record(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;

        let deleted = conn
            .execute("DELETE FROM records WHERE id = ?1", params![id])
            .map_err(|e| DossierError::CacheStorage {
                message: format!("Failed to delete record '{}': {}", id, e),
                source: Some(e),
            })?;
        conn.execute(
            "DELETE FROM entry_metadata WHERE id = ?1 AND kind = ?2",
            params![id, KIND_RECORD],
        )
        .ok();

        Ok(deleted > 0)
    }

    fn sweep(&self, max_age: Duration) -> Result<usize> {
        let conn = self.lock()?;

        // A max_age too large to represent can never expire anything.
        let cutoff = match chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        {
            Some(cutoff) => cutoff.to_rfc3339(),
            None => return Ok(0),
        };

        let mut stmt = conn
            .prepare("SELECT id, kind FROM entry_metadata WHERE timestamp <= ?1")
            .map_err(|e| DossierError::CacheStorage {
                message: format!("Failed to prepare sweep query: {}", e),
                source: Some(e),
            })?;

        let expired: Vec<(String, String)> = stmt
            .query_map(params![cutoff], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| DossierError::CacheStorage {
                message: format!("Failed to query expired entries: {}", e),
                source: Some(e),
            })?
            .filter_map(|r| r.ok())
            .collect();

        drop(stmt);

        let mut evicted = 0;
        for (id, kind) in &expired {
            let table = if kind == KIND_BLOB { "blobs" } else { "records" };
            conn.execute(&format!("DELETE FROM {} WHERE id = ?1", table), params![id])
                .ok();
            conn.execute(
                "DELETE FROM entry_metadata WHERE id = ?1 AND kind = ?2",
                params![id, kind],
            )
            .ok();
            evicted += 1;
        }

        if evicted > 0 {
            debug!(evicted, "Swept expired cache entries");
        }

        Ok(evicted)
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn ttl_to_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)
}

fn secs_to_ttl(secs: i64) -> Duration {
    match u64::try_from(secs) {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => Duration::ZERO,
    }
}
