//! Document retrieval: cached archive lookup, fetch, extraction.

use crate::archive;
use crate::cache::{BlobMetadata, CacheStore};
use crate::config::DossierConfig;
use crate::error::{DossierError, Result};
use crate::models::{ArchiveReference, ResolvedDocument};
use crate::remote::retry::{retry_async, RetryConfig};
use crate::remote::{archive_object_path, ObjectStorage};
use crate::sync::RemoteSyncCache;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Resolves one logical file out of a group's archive version.
///
/// Lookup order: extracted-entry cache, archive blob cache, network. A
/// network fetch for an archive is single-flight: concurrent resolvers of
/// the same `(group, version)` share one download, and the download runs in
/// its own task so an abandoned caller never strands the other waiters.
pub struct DocumentRetrievalService {
    store: Arc<dyn CacheStore>,
    storage: Arc<dyn ObjectStorage>,
    sync: Arc<RemoteSyncCache>,
    coalescer: Arc<FetchCoalescer>,
    config: DossierConfig,
    retry_config: RetryConfig,
}

impl DocumentRetrievalService {
    pub fn new(
        store: Arc<dyn CacheStore>,
        storage: Arc<dyn ObjectStorage>,
        sync: Arc<RemoteSyncCache>,
        config: DossierConfig,
    ) -> Self {
        Self {
            store,
            storage,
            sync,
            coalescer: Arc::new(FetchCoalescer::new()),
            config,
            retry_config: RetryConfig::default(),
        }
    }

    /// Override the retry policy for archive downloads.
    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// Resolve `logical_name` from archive `version` of `group_id` into a
    /// renderable byte buffer with its content type.
    pub async fn resolve(
        &self,
        group_id: &str,
        version: &str,
        logical_name: &str,
    ) -> Result<ResolvedDocument> {
        let group_path = self.config.group_path(group_id);
        let snapshot = self
            .sync
            .read_through(&group_path, self.config.record_ttl)
            .await?
            .ok_or_else(|| DossierError::ReferenceNotFound {
                group_id: group_id.to_string(),
                version: version.to_string(),
            })?;

        let reference = snapshot
            .record
            .find_archive(version)
            .ok_or_else(|| DossierError::ReferenceNotFound {
                group_id: group_id.to_string(),
                version: version.to_string(),
            })?
            .clone();

        // "Wrong filename" is answerable from the manifest alone — it never
        // costs a download and stays distinct from transport failures.
        let entry = reference
            .manifest
            .entry(logical_name)
            .ok_or_else(|| DossierError::EntryNotFound {
                name: logical_name.to_string(),
            })?
            .clone();

        let entry_id = entry_blob_id(group_id, version, logical_name);
        match self.store.get_blob(&entry_id, Some(version)) {
            Ok(Some(blob)) => {
                debug!("Extracted-entry cache hit for {}", entry_id);
                return Ok(ResolvedDocument {
                    bytes: blob.bytes,
                    content_type: blob.metadata.content_type,
                    file_name: blob.metadata.file_name,
                });
            }
            Ok(None) => {}
            Err(e) => warn!("Entry cache read failed for {}: {}", entry_id, e),
        }

        let archive_bytes = self.archive_bytes(group_id, version, &reference).await?;

        let stored_name = entry.stored_name.clone();
        let bytes_for_unpack = archive_bytes.clone();
        let bytes = tokio::task::spawn_blocking(move || {
            archive::unpack_one(&bytes_for_unpack, &stored_name)
        })
        .await
        .map_err(|e| DossierError::Io {
            message: format!("Archive extraction task failed: {}", e),
            source: None,
        })??;

        // Cache the extracted entry so repeated views skip the unpack.
        let metadata = BlobMetadata {
            file_name: entry.stored_name.clone(),
            content_type: entry.content_type.clone(),
            version: version.to_string(),
            timestamp: Utc::now(),
            ttl: self.config.blob_ttl,
            size_bytes: bytes.len() as u64,
        };
        if let Err(e) = self.store.put_blob(&entry_id, &bytes, &metadata) {
            warn!("Failed to cache extracted entry {}: {}", entry_id, e);
        }

        Ok(ResolvedDocument {
            bytes,
            content_type: entry.content_type,
            file_name: entry.stored_name,
        })
    }

    /// Archive bytes for `(group_id, version)`: cache hit, or single-flight
    /// network fetch.
    async fn archive_bytes(
        &self,
        group_id: &str,
        version: &str,
        reference: &ArchiveReference,
    ) -> Result<Arc<Vec<u8>>> {
        let blob_id = archive_object_path(group_id, version);

        match self.store.get_blob(&blob_id, Some(version)) {
            Ok(Some(blob)) => {
                debug!("Archive cache hit for {}", blob_id);
                return Ok(Arc::new(blob.bytes));
            }
            Ok(None) => {}
            Err(e) => warn!("Archive cache read failed for {}: {}", blob_id, e),
        }

        let mut receiver = {
            let mut in_flight = self.coalescer.lock();
            if let Some(sender) = in_flight.get(&blob_id) {
                debug!("Joining in-flight fetch for {}", blob_id);
                sender.subscribe()
            } else {
                let (sender, receiver) = broadcast::channel(1);
                in_flight.insert(blob_id.clone(), sender);

                let store = self.store.clone();
                let storage = self.storage.clone();
                let coalescer = self.coalescer.clone();
                let reference = reference.clone();
                let blob_id_task = blob_id.clone();
                let version = version.to_string();
                let blob_ttl = self.config.blob_ttl;
                let retry_config = self.retry_config.clone();

                // The fetch owns its task: callers that abandon their
                // future leave it running for the remaining waiters.
                tokio::spawn(async move {
                    let outcome = fetch_and_cache(
                        storage,
                        store,
                        &blob_id_task,
                        &version,
                        &reference,
                        blob_ttl,
                        &retry_config,
                    )
                    .await;
                    coalescer.complete(&blob_id_task, outcome);
                });

                receiver
            }
        };

        match receiver.recv().await {
            Ok(FetchOutcome::Fetched(bytes)) => Ok(bytes),
            Ok(FetchOutcome::Corrupt(message)) => Err(DossierError::CorruptArchive { message }),
            Ok(FetchOutcome::Unavailable(message)) => Err(DossierError::RemoteUnavailable {
                path: blob_id,
                message,
            }),
            Err(_) => Err(DossierError::RemoteUnavailable {
                path: blob_id,
                message: "archive fetch task ended without a result".to_string(),
            }),
        }
    }
}

/// Download one archive, verify it, and write it back to the cache.
async fn fetch_and_cache(
    storage: Arc<dyn ObjectStorage>,
    store: Arc<dyn CacheStore>,
    blob_id: &str,
    version: &str,
    reference: &ArchiveReference,
    blob_ttl: Duration,
    retry_config: &RetryConfig,
) -> FetchOutcome {
    let object = match retry_async(
        retry_config,
        || storage.download(blob_id),
        |e| e.is_retryable(),
    )
    .await
    {
        Ok(object) => object,
        Err(e) => return FetchOutcome::Unavailable(e.to_string()),
    };

    // A truncated or tampered transfer must never enter the cache.
    let digest = archive::sha256_hex(&object.bytes);
    if digest != reference.checksum_sha256 {
        return FetchOutcome::Corrupt(format!(
            "Archive checksum mismatch for {}: expected {}, got {}",
            blob_id, reference.checksum_sha256, digest
        ));
    }

    let metadata = BlobMetadata {
        file_name: format!("{}.zip", version),
        content_type: object.content_type.clone(),
        version: version.to_string(),
        timestamp: Utc::now(),
        ttl: blob_ttl,
        size_bytes: object.bytes.len() as u64,
    };
    if let Err(e) = store.put_blob(blob_id, &object.bytes, &metadata) {
        warn!("Failed to cache fetched archive {}: {}", blob_id, e);
    }

    FetchOutcome::Fetched(Arc::new(object.bytes))
}

/// Result of a shared archive fetch, cloneable across all waiters.
#[derive(Debug, Clone)]
enum FetchOutcome {
    Fetched(Arc<Vec<u8>>),
    Corrupt(String),
    Unavailable(String),
}

/// In-flight fetches keyed by blob id.
///
/// Registering against an existing key joins that fetch's broadcast
/// instead of starting a duplicate download.
struct FetchCoalescer {
    in_flight: Mutex<HashMap<String, broadcast::Sender<FetchOutcome>>>,
}

impl FetchCoalescer {
    fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, broadcast::Sender<FetchOutcome>>> {
        // A poisoned map still holds valid senders.
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish the fetch result to every waiter and clear the key.
    fn complete(&self, blob_id: &str, outcome: FetchOutcome) {
        let sender = self.lock().remove(blob_id);
        if let Some(sender) = sender {
            // Waiters may all have gone; a send error just means nobody is
            // listening anymore.
            let _ = sender.send(outcome);
        }
    }
}

fn entry_blob_id(group_id: &str, version: &str, logical_name: &str) -> String {
    format!("{}/{}/{}", group_id, version, logical_name)
}
