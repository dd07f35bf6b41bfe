//! Dossier Core - Headless document packaging and caching for review
//! submissions.
//!
//! This crate bundles uploaded files into versioned archives, mirrors the
//! remote group records that reference them into a durable local cache, and
//! keeps that cache coherent with a push-capable backing store. The UI
//! layer consuming it is elsewhere; everything here is transport-agnostic
//! and embeddable.
//!
//! # Example
//!
//! ```rust,ignore
//! use dossier_core::{DossierApi, DossierConfig, SubmittedFile};
//! use dossier_core::remote::{MemoryDocumentStore, MemoryObjectStorage};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> dossier_core::Result<()> {
//!     let api = DossierApi::new(
//!         DossierConfig::new(),
//!         Arc::new(MemoryDocumentStore::new()),
//!         Arc::new(MemoryObjectStorage::new()),
//!     )?;
//!
//!     let reference = api
//!         .submit_documents(
//!             "grp-101",
//!             "Initial protocol",
//!             vec![SubmittedFile {
//!                 logical_name: "consent.pdf".into(),
//!                 bytes: b"...".to_vec(),
//!                 content_type: "application/pdf".into(),
//!             }],
//!         )
//!         .await?;
//!
//!     let doc = api
//!         .resolve_document("grp-101", &reference.version, "consent.pdf")
//!         .await?;
//!     println!("{} bytes of {}", doc.bytes.len(), doc.content_type);
//!
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod remote;
pub mod sync;

mod packaging;
mod retrieval;

// Re-export commonly used types
pub use archive::{ArchiveEntry, ArchiveManifest, ManifestEntry, PackedArchive, StoredNamer};
pub use cache::{BlobMetadata, CacheBlob, CacheJanitor, CacheRecord, CacheStore, SqliteCacheStore};
pub use config::DossierConfig;
pub use error::{DossierError, Result};
pub use models::{ArchiveReference, GroupRecord, RecordPayload, ResolvedDocument, SubmittedFile};
pub use packaging::DocumentPackagingService;
pub use retrieval::DocumentRetrievalService;
pub use sync::{GroupEvent, RecordSnapshot, RemoteSyncCache, SyncSubscription};

use remote::{DocumentStore, ObjectStorage};
use std::sync::Arc;
use std::time::Duration;
use sync::EventCallback;

/// Per-process context owning the shared cache store and the services
/// built on it.
///
/// Construct one at process start, pass it by reference everywhere, drop it
/// at shutdown. There is no implicit global state: two instances with
/// different cache paths are fully independent.
pub struct DossierApi {
    config: DossierConfig,
    sync: Arc<RemoteSyncCache>,
    packaging: DocumentPackagingService,
    retrieval: DocumentRetrievalService,
    janitor: CacheJanitor,
}

impl DossierApi {
    /// Create a context over the given remote backends.
    ///
    /// Opens (or creates) the embedded cache database at the configured
    /// path; cached state from previous runs is served immediately.
    pub fn new(
        config: DossierConfig,
        documents: Arc<dyn DocumentStore>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn CacheStore> = Arc::new(SqliteCacheStore::new(&config.cache_db_path)?);
        let sync = Arc::new(RemoteSyncCache::new(
            store.clone(),
            documents,
            config.record_ttl,
        ));
        let packaging =
            DocumentPackagingService::new(storage.clone(), sync.clone(), config.clone());
        let retrieval =
            DocumentRetrievalService::new(store.clone(), storage, sync.clone(), config.clone());
        let janitor = CacheJanitor::new(store);

        Ok(Self {
            config,
            sync,
            packaging,
            retrieval,
            janitor,
        })
    }

    /// Bundle `files` into one versioned archive, upload it, and append its
    /// reference to the group's submission history.
    pub async fn submit_documents(
        &self,
        group_id: &str,
        display_title: &str,
        files: Vec<SubmittedFile>,
    ) -> Result<ArchiveReference> {
        self.packaging.submit(group_id, display_title, files).await
    }

    /// Resolve one logical file out of a group's archive version.
    pub async fn resolve_document(
        &self,
        group_id: &str,
        version: &str,
        logical_name: &str,
    ) -> Result<ResolvedDocument> {
        self.retrieval.resolve(group_id, version, logical_name).await
    }

    /// Subscribe to live updates of a group's record.
    ///
    /// The callback receives the best cached snapshot immediately, then
    /// every push in arrival order. Close the returned subscription to
    /// stop; see [`sync::RemoteSyncCache::subscribe`] for the guarantees.
    pub async fn subscribe_to_group(
        &self,
        group_id: &str,
        on_event: impl Fn(GroupEvent) + Send + Sync + 'static,
    ) -> Result<SyncSubscription> {
        let callback: EventCallback = Arc::new(on_event);
        self.sync
            .subscribe(&self.config.group_path(group_id), callback)
            .await
    }

    /// Evict cache entries older than `max_age`. Returns the number
    /// evicted; never fails the caller.
    pub fn sweep_cache(&self, max_age: Duration) -> usize {
        self.janitor.run_sweep(max_age)
    }

    /// The configuration this context was built with.
    pub fn config(&self) -> &DossierConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote::{MemoryDocumentStore, MemoryObjectStorage};
    use tempfile::TempDir;

    fn create_api(temp_dir: &TempDir) -> DossierApi {
        let config =
            DossierConfig::new().with_cache_db_path(temp_dir.path().join("cache.sqlite"));
        DossierApi::new(
            config,
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryObjectStorage::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_api_creation() {
        let temp_dir = TempDir::new().unwrap();
        let api = create_api(&temp_dir);
        assert!(api.config().cache_db_path.ends_with("cache.sqlite"));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let result = DossierApi::new(
            DossierConfig::new().with_collection_path(""),
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryObjectStorage::new()),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_sweep_on_empty_cache() {
        let temp_dir = TempDir::new().unwrap();
        let api = create_api(&temp_dir);
        assert_eq!(api.sweep_cache(Duration::from_secs(60)), 0);
    }
}
