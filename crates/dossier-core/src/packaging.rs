//! Submission packaging: bundle files, upload, record the reference.

use crate::archive::{self, ArchiveEntry};
use crate::config::{DossierConfig, PackagingLimits};
use crate::error::{DossierError, Result};
use crate::models::{ArchiveReference, GroupRecord, SubmittedFile};
use crate::remote::retry::{retry_async, RetryConfig};
use crate::remote::{archive_object_path, ObjectStorage};
use crate::sync::RemoteSyncCache;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Packages submitted files into one versioned archive per submission
/// event.
///
/// Each submission is an immutable snapshot: the archive is uploaded under
/// a fresh version tag and its reference appended to the group's history,
/// never replacing earlier ones. The reference is only written after the
/// upload succeeds, so the record can never point at a missing object.
pub struct DocumentPackagingService {
    storage: Arc<dyn ObjectStorage>,
    sync: Arc<RemoteSyncCache>,
    config: DossierConfig,
    /// Millisecond tag of the last issued version, for monotonicity.
    last_version_ms: Mutex<i64>,
}

impl DocumentPackagingService {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        sync: Arc<RemoteSyncCache>,
        config: DossierConfig,
    ) -> Self {
        Self {
            storage,
            sync,
            config,
            last_version_ms: Mutex::new(0),
        }
    }

    /// Bundle `files` into an archive, upload it, and append its reference
    /// to the group record.
    ///
    /// Identical inputs submitted twice produce two distinct versions —
    /// submissions are never deduplicated, each one stays independently
    /// retrievable.
    pub async fn submit(
        &self,
        group_id: &str,
        display_title: &str,
        files: Vec<SubmittedFile>,
    ) -> Result<ArchiveReference> {
        let version = self.next_version();

        let entries: Vec<ArchiveEntry> = files
            .into_iter()
            .map(|file| ArchiveEntry {
                logical_name: file.logical_name,
                bytes: file.bytes,
                content_type: file.content_type,
            })
            .collect();

        // Archive assembly is CPU-bound; keep it off the async threads.
        let limit = self.config.max_file_bytes;
        let packed = tokio::task::spawn_blocking(move || archive::pack(&entries, limit))
            .await
            .map_err(|e| DossierError::Io {
                message: format!("Archive assembly task failed: {}", e),
                source: None,
            })??;

        let checksum = archive::sha256_hex(&packed.bytes);
        let object_path = archive_object_path(group_id, &version);

        let upload = retry_async(
            &RetryConfig::default(),
            || {
                self.storage.upload(
                    &object_path,
                    &packed.bytes,
                    PackagingLimits::ARCHIVE_CONTENT_TYPE,
                )
            },
            |e| e.is_retryable(),
        )
        .await;

        // No reference is recorded for a failed upload: an orphaned entry
        // in the history would point at an object that does not exist.
        if let Err(e) = upload {
            warn!("Archive upload for {} failed: {}", object_path, e);
            return Err(match e {
                upload_err @ DossierError::Upload { .. } => upload_err,
                other => DossierError::Upload {
                    path: object_path,
                    message: other.to_string(),
                },
            });
        }

        let reference = ArchiveReference {
            version: version.clone(),
            display_title: display_title.to_string(),
            manifest: packed.manifest,
            content_type: PackagingLimits::ARCHIVE_CONTENT_TYPE.to_string(),
            checksum_sha256: checksum,
            uploaded_at: Utc::now(),
            size_bytes: packed.bytes.len() as u64,
        };

        let group_path = self.config.group_path(group_id);
        // Read-modify-write against the latest remote state; Duration::ZERO
        // forces a remote read so concurrent submitters see each other's
        // appends whenever the network allows it.
        let mut record = match self.sync.read_through(&group_path, Duration::ZERO).await {
            Ok(Some(snapshot)) => snapshot.record,
            Ok(None) => GroupRecord::empty(group_id),
            Err(e) => return Err(e),
        };
        record.archives.push(reference.clone());
        record.updated_at = Utc::now();

        self.sync.write(&group_path, &record).await?;

        info!(
            "Recorded submission {} for group {} ({} files, {} bytes)",
            version,
            group_id,
            reference.manifest.len(),
            reference.size_bytes
        );

        Ok(reference)
    }

    /// Time-derived version tag, strictly increasing within this process
    /// even for same-millisecond submissions.
    fn next_version(&self) -> String {
        let now_ms = Utc::now().timestamp_millis();
        let mut last = self
            .last_version_ms
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let tag_ms = if now_ms <= *last { *last + 1 } else { now_ms };
        *last = tag_ms;
        format!("v{}", tag_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, SqliteCacheStore};
    use crate::remote::{MemoryDocumentStore, MemoryObjectStorage};
    use tempfile::TempDir;

    fn setup() -> (
        TempDir,
        Arc<MemoryObjectStorage>,
        Arc<MemoryDocumentStore>,
        DocumentPackagingService,
    ) {
        let temp_dir = TempDir::new().unwrap();
        let store: Arc<dyn CacheStore> =
            Arc::new(SqliteCacheStore::new(temp_dir.path().join("cache.sqlite")).unwrap());
        let storage = Arc::new(MemoryObjectStorage::new());
        let documents = Arc::new(MemoryDocumentStore::new());
        let sync = Arc::new(RemoteSyncCache::new(
            store,
            documents.clone(),
            Duration::from_secs(300),
        ));
        let config = DossierConfig::new().with_cache_db_path(temp_dir.path().join("unused.sqlite"));
        let service = DocumentPackagingService::new(storage.clone(), sync, config);
        (temp_dir, storage, documents, service)
    }

    fn file(name: &str, bytes: &[u8]) -> SubmittedFile {
        SubmittedFile {
            logical_name: name.to_string(),
            bytes: bytes.to_vec(),
            content_type: "application/pdf".to_string(),
        }
    }

    #[tokio::test]
    async fn test_submit_uploads_and_records_reference() {
        let (_temp, storage, documents, service) = setup();

        let reference = service
            .submit("grp-1", "Initial protocol", vec![file("consent.pdf", b"pdf")])
            .await
            .unwrap();

        assert!(storage.contains(&archive_object_path("grp-1", &reference.version)));
        assert_eq!(reference.manifest.len(), 1);
        assert_eq!(reference.display_title, "Initial protocol");

        let record = documents.peek("groups/grp-1").unwrap();
        assert_eq!(record.archives.len(), 1);
        assert_eq!(record.archives[0].version, reference.version);
    }

    #[tokio::test]
    async fn test_submit_appends_history() {
        let (_temp, _storage, documents, service) = setup();

        let first = service
            .submit("grp-1", "First", vec![file("a.pdf", b"a")])
            .await
            .unwrap();
        let second = service
            .submit("grp-1", "Second", vec![file("b.pdf", b"b")])
            .await
            .unwrap();

        assert_ne!(first.version, second.version);

        let record = documents.peek("groups/grp-1").unwrap();
        assert_eq!(record.archives.len(), 2);
        assert_eq!(record.archives[0].version, first.version);
        assert_eq!(record.archives[1].version, second.version);
    }

    #[tokio::test]
    async fn test_identical_submissions_get_distinct_versions() {
        let (_temp, _storage, documents, service) = setup();

        let files = vec![file("same.pdf", b"identical bytes")];
        let first = service.submit("grp-1", "Same", files.clone()).await.unwrap();
        let second = service.submit("grp-1", "Same", files).await.unwrap();

        assert_ne!(first.version, second.version);
        assert_eq!(documents.peek("groups/grp-1").unwrap().archives.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_submission_rejected_before_any_remote_call() {
        let (_temp, storage, documents, service) = setup();

        let err = service.submit("grp-1", "Empty", Vec::new()).await.unwrap_err();
        assert!(matches!(err, DossierError::EmptyPack));
        assert_eq!(storage.upload_count(), 0);
        assert_eq!(documents.write_count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_file_rejected_with_name() {
        let (_temp, storage, _documents, service) = setup();

        let mut service = service;
        service.config = service.config.clone().with_max_file_bytes(4);

        let err = service
            .submit("grp-1", "Big", vec![file("large-scan.pdf", b"way too big")])
            .await
            .unwrap_err();
        match err {
            DossierError::EntryTooLarge { logical_name, .. } => {
                assert_eq!(logical_name, "large-scan.pdf")
            }
            other => panic!("Expected EntryTooLarge, got {:?}", other),
        }
        assert_eq!(storage.upload_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_no_reference() {
        let (_temp, storage, documents, service) = setup();
        storage.set_fail_uploads(true);

        let err = service
            .submit("grp-1", "Doomed", vec![file("a.pdf", b"a")])
            .await
            .unwrap_err();
        assert!(matches!(err, DossierError::Upload { .. }));

        // The group record must not reference the failed archive.
        assert!(documents.peek("groups/grp-1").is_none());
        assert_eq!(documents.write_count(), 0);
    }

    #[test]
    fn test_version_tags_monotonic() {
        let temp_dir = TempDir::new().unwrap();
        let store: Arc<dyn CacheStore> =
            Arc::new(SqliteCacheStore::new(temp_dir.path().join("cache.sqlite")).unwrap());
        let sync = Arc::new(RemoteSyncCache::new(
            store,
            Arc::new(MemoryDocumentStore::new()),
            Duration::from_secs(300),
        ));
        let service = DocumentPackagingService::new(
            Arc::new(MemoryObjectStorage::new()),
            sync,
            DossierConfig::new(),
        );

        let tags: Vec<String> = (0..50).map(|_| service.next_version()).collect();
        let mut sorted = tags.clone();
        sorted.sort_by_key(|t| t[1..].parse::<i64>().unwrap());
        assert_eq!(tags, sorted);
        let unique: std::collections::HashSet<_> = tags.iter().collect();
        assert_eq!(unique.len(), tags.len());
    }
}
