//! Integration tests for the DossierApi public interface.
//!
//! These tests drive the full stack — packaging, upload, record sync,
//! cached retrieval, subscriptions — over the in-memory remote backends.

use dossier_core::remote::{MemoryDocumentStore, MemoryObjectStorage};
use dossier_core::{DossierApi, DossierConfig, DossierError, GroupEvent, SubmittedFile};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct TestEnv {
    _temp: TempDir,
    storage: Arc<MemoryObjectStorage>,
    documents: Arc<MemoryDocumentStore>,
    api: DossierApi,
}

fn create_test_env() -> TestEnv {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let storage = Arc::new(MemoryObjectStorage::new());
    let documents = Arc::new(MemoryDocumentStore::new());
    let config = DossierConfig::new().with_cache_db_path(temp.path().join("cache.sqlite"));
    let api = DossierApi::new(config, documents.clone(), storage.clone()).unwrap();
    TestEnv {
        _temp: temp,
        storage,
        documents,
        api,
    }
}

fn file(name: &str, bytes: &[u8]) -> SubmittedFile {
    SubmittedFile {
        logical_name: name.to_string(),
        bytes: bytes.to_vec(),
        content_type: "application/pdf".to_string(),
    }
}

#[tokio::test]
async fn test_submit_then_resolve() {
    let env = create_test_env();

    let reference = env
        .api
        .submit_documents(
            "grp-101",
            "Initial protocol",
            vec![
                file("consent.pdf", b"consent form bytes"),
                file("protocol.pdf", b"protocol description"),
            ],
        )
        .await
        .unwrap();

    assert_eq!(reference.manifest.len(), 2);

    let doc = env
        .api
        .resolve_document("grp-101", &reference.version, "protocol.pdf")
        .await
        .unwrap();
    assert_eq!(doc.bytes, b"protocol description");
    assert_eq!(doc.content_type, "application/pdf");
}

#[tokio::test]
async fn test_duplicate_names_resolve_independently() {
    let env = create_test_env();

    let reference = env
        .api
        .submit_documents(
            "grp-101",
            "Amendment",
            vec![file("a.pdf", b"first copy"), file("a.pdf", b"second copy")],
        )
        .await
        .unwrap();

    // Stored names diverge; logical lookup returns the first occurrence.
    let stored: Vec<_> = reference
        .manifest
        .entries
        .iter()
        .map(|e| e.stored_name.as_str())
        .collect();
    assert_eq!(stored, ["a.pdf", "a_1.pdf"]);

    let doc = env
        .api
        .resolve_document("grp-101", &reference.version, "a.pdf")
        .await
        .unwrap();
    assert_eq!(doc.bytes, b"first copy");
}

#[tokio::test]
async fn test_resubmission_keeps_both_versions_retrievable() {
    let env = create_test_env();

    let first = env
        .api
        .submit_documents("grp-101", "v1", vec![file("doc.pdf", b"version one")])
        .await
        .unwrap();
    let second = env
        .api
        .submit_documents("grp-101", "v2", vec![file("doc.pdf", b"version two")])
        .await
        .unwrap();

    let one = env
        .api
        .resolve_document("grp-101", &first.version, "doc.pdf")
        .await
        .unwrap();
    let two = env
        .api
        .resolve_document("grp-101", &second.version, "doc.pdf")
        .await
        .unwrap();

    // No cross-version leakage in either direction.
    assert_eq!(one.bytes, b"version one");
    assert_eq!(two.bytes, b"version two");
}

#[tokio::test]
async fn test_empty_submission_fails_without_remote_traffic() {
    let env = create_test_env();

    let err = env
        .api
        .submit_documents("grp-101", "Empty", Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DossierError::EmptyPack));
    assert_eq!(env.storage.upload_count(), 0);
    assert_eq!(env.documents.write_count(), 0);
}

#[tokio::test]
async fn test_cache_survives_api_restart() {
    let temp = TempDir::new().unwrap();
    let storage = Arc::new(MemoryObjectStorage::new());
    let documents = Arc::new(MemoryDocumentStore::new());
    let config = DossierConfig::new().with_cache_db_path(temp.path().join("cache.sqlite"));

    let reference = {
        let api = DossierApi::new(config.clone(), documents.clone(), storage.clone()).unwrap();
        let reference = api
            .submit_documents("grp-101", "Initial", vec![file("doc.pdf", b"bytes")])
            .await
            .unwrap();
        api.resolve_document("grp-101", &reference.version, "doc.pdf")
            .await
            .unwrap();
        reference
    };
    let downloads_before = storage.download_count();

    // A fresh context over the same cache file resolves without touching
    // the network again.
    let api = DossierApi::new(config, documents, storage.clone()).unwrap();
    let doc = api
        .resolve_document("grp-101", &reference.version, "doc.pdf")
        .await
        .unwrap();
    assert_eq!(doc.bytes, b"bytes");
    assert_eq!(storage.download_count(), downloads_before);
}

#[tokio::test]
async fn test_subscription_sees_submission() {
    let env = create_test_env();

    let snapshots = Arc::new(AtomicUsize::new(0));
    let counter = snapshots.clone();
    let subscription = env
        .api
        .subscribe_to_group("grp-101", move |event| {
            if matches!(event, GroupEvent::Snapshot { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await
        .unwrap();

    env.api
        .submit_documents("grp-101", "Initial", vec![file("doc.pdf", b"bytes")])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(snapshots.load(Ordering::SeqCst) >= 1);
    subscription.close();
}

#[tokio::test]
async fn test_unsubscribe_before_push_suppresses_callback() {
    let env = create_test_env();

    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = invocations.clone();
    let subscription = env
        .api
        .subscribe_to_group("grp-101", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
    subscription.close();

    env.api
        .submit_documents("grp-101", "Initial", vec![file("doc.pdf", b"bytes")])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(invocations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_sweep_cache_idempotent() {
    let env = create_test_env();

    let reference = env
        .api
        .submit_documents("grp-101", "Initial", vec![file("doc.pdf", b"bytes")])
        .await
        .unwrap();
    env.api
        .resolve_document("grp-101", &reference.version, "doc.pdf")
        .await
        .unwrap();

    // Everything just written is younger than the max age.
    assert_eq!(env.api.sweep_cache(Duration::from_secs(3600)), 0);

    // A zero max age evicts all of it, exactly once.
    let evicted = env.api.sweep_cache(Duration::ZERO);
    assert!(evicted > 0);
    assert_eq!(env.api.sweep_cache(Duration::ZERO), 0);
}

#[tokio::test]
async fn test_resolve_after_sweep_refetches() {
    let env = create_test_env();

    let reference = env
        .api
        .submit_documents("grp-101", "Initial", vec![file("doc.pdf", b"bytes")])
        .await
        .unwrap();
    env.api
        .resolve_document("grp-101", &reference.version, "doc.pdf")
        .await
        .unwrap();
    assert_eq!(env.storage.download_count(), 1);

    env.api.sweep_cache(Duration::ZERO);

    let doc = env
        .api
        .resolve_document("grp-101", &reference.version, "doc.pdf")
        .await
        .unwrap();
    assert_eq!(doc.bytes, b"bytes");
    assert_eq!(env.storage.download_count(), 2);
}
