//! Cache store trait and entry types.

use crate::error::Result;
use crate::models::RecordPayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Metadata paired with a cached binary payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobMetadata {
    /// Display file name of the payload (archive or extracted entry).
    pub file_name: String,
    pub content_type: String,
    /// Archive version this payload belongs to. A get with a different
    /// expected version is a miss, never a cross-version serve.
    pub version: String,
    /// When the payload was cached.
    pub timestamp: DateTime<Utc>,
    /// Freshness window; past it the entry reads as a miss.
    pub ttl: Duration,
    pub size_bytes: u64,
}

impl BlobMetadata {
    /// Whether the entry has outlived its freshness window.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        age_exceeds(self.timestamp, now, self.ttl)
    }
}

/// A cached binary payload with its metadata.
#[derive(Debug, Clone)]
pub struct CacheBlob {
    pub id: String,
    pub bytes: Vec<u8>,
    pub metadata: BlobMetadata,
}

/// Metadata paired with a mirrored record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordMetadata {
    pub timestamp: DateTime<Utc>,
    /// Optional version tag supplied by the writer.
    pub version: Option<String>,
    pub ttl: Duration,
}

impl RecordMetadata {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        age_exceeds(self.timestamp, now, self.ttl)
    }
}

/// A structured document mirrored from the remote store.
///
/// Replace-whole-record semantics: a record is overwritten in full by every
/// push update or fresh read, never patched field by field.
#[derive(Debug, Clone)]
pub struct CacheRecord {
    /// Store key, derived from the remote path.
    pub id: String,
    /// Logical remote location the record mirrors.
    pub path: String,
    pub payload: RecordPayload,
    pub metadata: RecordMetadata,
}

fn age_exceeds(timestamp: DateTime<Utc>, now: DateTime<Utc>, limit: Duration) -> bool {
    let age = now.signed_duration_since(timestamp);
    match chrono::Duration::from_std(limit) {
        Ok(limit) => age > limit,
        // A limit too large for chrono means the entry can never expire.
        Err(_) => false,
    }
}

/// Durable key/value store for blobs and records.
///
/// Backed by an embedded database so state survives process restarts.
/// Methods are synchronous to match rusqlite's API; each call is
/// individually atomic, multi-key sequences are not. Callers with a network
/// fallback treat an `Err` on read as a logged miss.
pub trait CacheStore: Send + Sync {
    /// Store a binary payload with its paired metadata.
    ///
    /// Overwrites any existing entry under the same id.
    fn put_blob(&self, id: &str, bytes: &[u8], metadata: &BlobMetadata) -> Result<()>;

    /// Fetch a binary payload.
    ///
    /// Returns `None` when the id is absent, the entry has expired, or
    /// `expected_version` does not match the stored version — a version
    /// mismatch is a miss, not an error.
    fn get_blob(&self, id: &str, expected_version: Option<&str>) -> Result<Option<CacheBlob>>;

    /// Delete a blob and its metadata. Returns whether an entry existed.
    fn delete_blob(&self, id: &str) -> Result<bool>;

    /// Store a mirrored record, replacing any previous version wholesale.
    fn put_record(&self, record: &CacheRecord) -> Result<()>;

    /// Fetch a mirrored record.
    ///
    /// `max_age` overrides the entry's own TTL when supplied (pass
    /// `Duration::MAX` to read a stale copy deliberately); `None` applies
    /// the TTL the record was stored with.
    fn get_record(&self, id: &str, max_age: Option<Duration>) -> Result<Option<CacheRecord>>;

    /// Delete a record and its metadata. Returns whether an entry existed.
    fn delete_record(&self, id: &str) -> Result<bool>;

    /// Evict every entry older than `max_age` across both tables, deleting
    /// metadata and paired payload together. Returns the number evicted.
    fn sweep(&self, max_age: Duration) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_expiry() {
        let now = Utc::now();
        let meta = BlobMetadata {
            file_name: "a.zip".into(),
            content_type: "application/zip".into(),
            version: "v1".into(),
            timestamp: now - chrono::Duration::seconds(120),
            ttl: Duration::from_secs(60),
            size_bytes: 10,
        };
        assert!(meta.is_expired(now));

        let fresh = BlobMetadata {
            timestamp: now - chrono::Duration::seconds(30),
            ..meta
        };
        assert!(!fresh.is_expired(now));
    }

    #[test]
    fn test_record_expiry_with_huge_ttl() {
        let now = Utc::now();
        let meta = RecordMetadata {
            timestamp: now - chrono::Duration::days(365),
            version: None,
            ttl: Duration::MAX,
        };
        assert!(!meta.is_expired(now));
    }
}
