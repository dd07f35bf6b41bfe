//! In-memory remote backends.
//!
//! Always available: the test suite runs on them, and hosts embedding the
//! core without a network (demos, kiosk builds) can too. Both carry fault
//! toggles and operation counters so callers can script outages and assert
//! on traffic.

use super::{DocumentStore, ObjectStorage, PushEvent, StoredObject};
use crate::error::{DossierError, Result};
use crate::models::GroupRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

const PUSH_CHANNEL_CAPACITY: usize = 64;

fn offline_error(path: &str) -> DossierError {
    DossierError::RemoteUnavailable {
        path: path.to_string(),
        message: "simulated network outage".to_string(),
    }
}

/// HashMap-backed [`ObjectStorage`].
#[derive(Default)]
pub struct MemoryObjectStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
    offline: AtomicBool,
    fail_uploads: AtomicBool,
    download_latency_ms: AtomicU64,
    upload_count: AtomicUsize,
    download_count: AtomicUsize,
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a network outage for every subsequent call.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make subsequent uploads fail with an upload error.
    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Delay every download; lets tests overlap concurrent fetches.
    pub fn set_download_latency(&self, latency: Duration) {
        self.download_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn upload_count(&self) -> usize {
        self.upload_count.load(Ordering::SeqCst)
    }

    pub fn download_count(&self) -> usize {
        self.download_count.load(Ordering::SeqCst)
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects.lock().map(|m| m.contains_key(path)).unwrap_or(false)
    }

    /// Overwrite stored bytes without counting as an upload. Lets tests
    /// plant corrupted archives behind a valid reference.
    pub fn tamper(&self, path: &str, bytes: Vec<u8>) {
        if let Ok(mut objects) = self.objects.lock() {
            if let Some(object) = objects.get_mut(path) {
                object.bytes = bytes;
            }
        }
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn upload(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        self.upload_count.fetch_add(1, Ordering::SeqCst);

        if self.offline.load(Ordering::SeqCst) {
            return Err(offline_error(path));
        }
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(DossierError::Upload {
                path: path.to_string(),
                message: "simulated upload rejection".to_string(),
            });
        }

        self.objects
            .lock()
            .map_err(|_| DossierError::Upload {
                path: path.to_string(),
                message: "storage lock poisoned".to_string(),
            })?
            .insert(
                path.to_string(),
                StoredObject {
                    bytes: bytes.to_vec(),
                    content_type: content_type.to_string(),
                },
            );
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<StoredObject> {
        self.download_count.fetch_add(1, Ordering::SeqCst);

        let latency = self.download_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(offline_error(path));
        }

        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(path).cloned())
            .ok_or_else(|| DossierError::RemoteUnavailable {
                path: path.to_string(),
                message: "no such object".to_string(),
            })
    }
}

/// HashMap-backed [`DocumentStore`] with push fan-out.
///
/// Every `write` is pushed to all live subscribers of that path, in call
/// order, which is what a real push-capable document service does from the
/// client's point of view.
#[derive(Default)]
pub struct MemoryDocumentStore {
    records: Mutex<HashMap<String, GroupRecord>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<PushEvent>>>>,
    offline: AtomicBool,
    read_count: AtomicUsize,
    write_count: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> usize {
        self.read_count.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    /// Snapshot of the stored record, bypassing the offline toggle.
    pub fn peek(&self, path: &str) -> Option<GroupRecord> {
        self.records.lock().ok().and_then(|r| r.get(path).cloned())
    }

    /// Emit a terminal error to every subscriber of `path`.
    pub fn emit_error(&self, path: &str, message: &str) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            if let Some(senders) = subscribers.get_mut(path) {
                senders.retain(|tx| tx.try_send(PushEvent::Error(message.to_string())).is_ok());
            }
        }
    }

    /// Drop every push channel for `path`, simulating a disconnect.
    pub fn disconnect(&self, path: &str) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.remove(path);
        }
    }

    fn push_snapshot(&self, path: &str, record: &GroupRecord) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            if let Some(senders) = subscribers.get_mut(path) {
                senders.retain(|tx| tx.try_send(PushEvent::Snapshot(record.clone())).is_ok());
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn read(&self, path: &str) -> Result<Option<GroupRecord>> {
        self.read_count.fetch_add(1, Ordering::SeqCst);

        if self.offline.load(Ordering::SeqCst) {
            return Err(offline_error(path));
        }

        Ok(self.records.lock().ok().and_then(|r| r.get(path).cloned()))
    }

    async fn write(&self, path: &str, record: &GroupRecord) -> Result<()> {
        self.write_count.fetch_add(1, Ordering::SeqCst);

        if self.offline.load(Ordering::SeqCst) {
            return Err(offline_error(path));
        }

        self.records
            .lock()
            .map_err(|_| DossierError::RemoteUnavailable {
                path: path.to_string(),
                message: "record lock poisoned".to_string(),
            })?
            .insert(path.to_string(), record.clone());

        self.push_snapshot(path, record);
        Ok(())
    }

    async fn subscribe(&self, path: &str) -> Result<mpsc::Receiver<PushEvent>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(offline_error(path));
        }

        let (tx, rx) = mpsc::channel(PUSH_CHANNEL_CAPACITY);
        self.subscribers
            .lock()
            .map_err(|_| DossierError::RemoteUnavailable {
                path: path.to_string(),
                message: "subscriber lock poisoned".to_string(),
            })?
            .entry(path.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}
