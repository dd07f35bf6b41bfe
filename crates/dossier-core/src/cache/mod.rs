//! Durable local cache for archive blobs and mirrored records.
//!
//! One SQLite database holds both payload tables plus shared per-entry
//! metadata (timestamp, version, TTL). Reads are defensive: expired or
//! version-mismatched entries are misses, and consumers with a network
//! fallback treat storage errors as misses too.

mod janitor;
mod sqlite;
mod traits;

pub use janitor::CacheJanitor;
pub use sqlite::SqliteCacheStore;
pub use traits::{BlobMetadata, CacheBlob, CacheRecord, CacheStore, RecordMetadata};
