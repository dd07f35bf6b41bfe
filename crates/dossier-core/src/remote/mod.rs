//! Remote backend seams: object storage and the push-capable document store.
//!
//! The core never assumes a particular transport. Production hosts plug in
//! [`HttpObjectStorage`] plus their document-store adapter; tests and
//! offline embedders use the in-memory backends.

mod http;
mod memory;
pub mod retry;

pub use http::HttpObjectStorage;
pub use memory::{MemoryDocumentStore, MemoryObjectStorage};

use crate::config::PackagingLimits;
use crate::error::Result;
use crate::models::GroupRecord;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Bytes fetched from object storage, with the content type they were
/// uploaded under.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Remote blob storage for uploaded archives.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Upload `bytes` to `path`, recording `content_type` for download.
    async fn upload(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()>;

    /// Download the object at `path`, preserving its content type.
    async fn download(&self, path: &str) -> Result<StoredObject>;
}

/// One emission from a push channel.
#[derive(Debug, Clone)]
pub enum PushEvent {
    /// A whole-record snapshot in arrival order.
    Snapshot(GroupRecord),
    /// Terminal transport failure; the channel ends after this.
    Error(String),
}

/// Push-capable remote document store holding whole-record snapshots.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read the record at `path`; `None` when no record exists yet.
    async fn read(&self, path: &str) -> Result<Option<GroupRecord>>;

    /// Replace the record at `path` wholesale.
    async fn write(&self, path: &str, record: &GroupRecord) -> Result<()>;

    /// Open a push channel for `path`.
    ///
    /// The channel emits snapshots in arrival order until it is dropped or
    /// the transport fails. Reconnection is the transport's concern, not
    /// this trait's: a closed channel is terminal for the subscriber.
    async fn subscribe(&self, path: &str) -> Result<mpsc::Receiver<PushEvent>>;
}

/// Object-storage path for a group's archive version.
pub fn archive_object_path(group_id: &str, version: &str) -> String {
    format!(
        "{}/{}.{}",
        group_id,
        version,
        PackagingLimits::ARCHIVE_EXT
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_object_path() {
        assert_eq!(
            archive_object_path("grp-7", "v1712000000000"),
            "grp-7/v1712000000000.zip"
        );
    }
}
