//! Cache-first reads over a live push-backed document store.
//!
//! The pattern is read cache-first, then subscribe for pushes, then refresh
//! the cache: callers get instant (possibly stale) data while every push
//! converges the local store to live state. Pushes overwrite the cache
//! unconditionally — last write wins by server order.

use crate::cache::{CacheRecord, CacheStore, RecordMetadata};
use crate::error::{DossierError, Result};
use crate::models::{GroupRecord, RecordPayload};
use crate::remote::{DocumentStore, PushEvent};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A record read with its freshness flag.
#[derive(Debug, Clone)]
pub struct RecordSnapshot {
    pub record: GroupRecord,
    /// True when the remote was unreachable and this is a cached fallback
    /// past its freshness window.
    pub stale: bool,
}

/// One emission to a subscription callback.
#[derive(Debug, Clone)]
pub enum GroupEvent {
    /// A record snapshot: the eager cached value on subscribe, then every
    /// push in arrival order.
    Snapshot { record: GroupRecord, stale: bool },
    /// The push channel ended. Terminal; re-subscribe to resume.
    Disconnected { reason: String },
}

/// Callback invoked for every subscription emission.
pub type EventCallback = Arc<dyn Fn(GroupEvent) + Send + Sync>;

/// Write-through, read-cache-first wrapper over the remote document store.
pub struct RemoteSyncCache {
    store: Arc<dyn CacheStore>,
    remote: Arc<dyn DocumentStore>,
    record_ttl: Duration,
    /// Paths with a live subscription; at most one per path.
    active: Arc<Mutex<HashSet<String>>>,
}

impl RemoteSyncCache {
    pub fn new(
        store: Arc<dyn CacheStore>,
        remote: Arc<dyn DocumentStore>,
        record_ttl: Duration,
    ) -> Self {
        Self {
            store,
            remote,
            record_ttl,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Read the record at `path`, serving from cache when fresher than
    /// `max_age`.
    ///
    /// On a remote failure any cached copy — even an expired one — is
    /// returned flagged stale; with no cached copy the failure propagates
    /// as `RemoteUnavailable`. `Ok(None)` means the remote answered and no
    /// record exists.
    pub async fn read_through(
        &self,
        path: &str,
        max_age: Duration,
    ) -> Result<Option<RecordSnapshot>> {
        match self.store.get_record(path, Some(max_age)) {
            Ok(Some(cached)) => {
                if let Some(record) = cached.payload.into_group() {
                    debug!(path, "Record cache hit");
                    return Ok(Some(RecordSnapshot {
                        record,
                        stale: false,
                    }));
                }
            }
            Ok(None) => {}
            Err(e) => warn!(path, "Record cache read failed, falling through: {}", e),
        }

        match self.remote.read(path).await {
            Ok(Some(record)) => {
                self.cache_record(path, &record);
                Ok(Some(RecordSnapshot {
                    record,
                    stale: false,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                // Any cached copy beats an error, but the caller gets to
                // know it may be outdated.
                if let Ok(Some(cached)) = self.store.get_record(path, Some(Duration::MAX)) {
                    if let Some(record) = cached.payload.into_group() {
                        warn!(path, "Remote read failed, serving stale cache: {}", e);
                        return Ok(Some(RecordSnapshot {
                            record,
                            stale: true,
                        }));
                    }
                }
                Err(DossierError::RemoteUnavailable {
                    path: path.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Write `record` to the remote store, then eagerly to the local cache
    /// so an immediate `read_through` observes it without waiting for the
    /// push round-trip.
    pub async fn write(&self, path: &str, record: &GroupRecord) -> Result<()> {
        self.remote.write(path, record).await?;
        self.cache_record(path, record);
        Ok(())
    }

    /// Subscribe to pushes for `path`.
    ///
    /// The best cached value (if any) is emitted before this returns,
    /// flagged stale when past its TTL. Each push then overwrites the local
    /// cache and reaches the callback in arrival order. Channel errors or
    /// closure emit a terminal [`GroupEvent::Disconnected`]; this layer
    /// never reconnects on its own.
    ///
    /// At most one subscription per path may be active; a second attempt
    /// fails with `SubscriptionActive`. The callback must not call
    /// [`SyncSubscription::close`] on its own subscription from inside
    /// itself.
    pub async fn subscribe(&self, path: &str, on_event: EventCallback) -> Result<SyncSubscription> {
        {
            let mut active = lock_active(&self.active);
            if !active.insert(path.to_string()) {
                return Err(DossierError::SubscriptionActive {
                    path: path.to_string(),
                });
            }
        }

        let gate = Arc::new(CallbackGate::new());

        // Eager emission: instant first paint from cache, stale or not.
        match self.store.get_record(path, Some(Duration::MAX)) {
            Ok(Some(cached)) => {
                let stale = cached.metadata.is_expired(Utc::now());
                if let Some(record) = cached.payload.into_group() {
                    gate.emit(&on_event, GroupEvent::Snapshot { record, stale });
                }
            }
            Ok(None) => {}
            Err(e) => warn!(path, "Cache read failed during subscribe: {}", e),
        }

        let receiver = match self.remote.subscribe(path).await {
            Ok(receiver) => receiver,
            Err(e) => {
                lock_active(&self.active).remove(path);
                return Err(e);
            }
        };

        let handle = tokio::spawn(forward_events(
            receiver,
            self.store.clone(),
            on_event,
            gate.clone(),
            path.to_string(),
            self.record_ttl,
            self.active.clone(),
        ));

        Ok(SyncSubscription {
            path: path.to_string(),
            gate,
            handle,
            active: self.active.clone(),
        })
    }

    fn cache_record(&self, path: &str, record: &GroupRecord) {
        let entry = make_cache_record(path, record.clone(), self.record_ttl);
        if let Err(e) = self.store.put_record(&entry) {
            warn!(path, "Failed to update record cache: {}", e);
        }
    }
}

/// Forwarding loop for one subscription: push → cache overwrite → callback.
async fn forward_events(
    mut receiver: mpsc::Receiver<PushEvent>,
    store: Arc<dyn CacheStore>,
    on_event: EventCallback,
    gate: Arc<CallbackGate>,
    path: String,
    record_ttl: Duration,
    active: Arc<Mutex<HashSet<String>>>,
) {
    loop {
        match receiver.recv().await {
            Some(PushEvent::Snapshot(record)) => {
                if gate.is_closed() {
                    break;
                }
                let entry = make_cache_record(&path, record.clone(), record_ttl);
                if let Err(e) = store.put_record(&entry) {
                    warn!(path, "Failed to cache pushed record: {}", e);
                }
                gate.emit(
                    &on_event,
                    GroupEvent::Snapshot {
                        record,
                        stale: false,
                    },
                );
            }
            Some(PushEvent::Error(reason)) => {
                gate.emit(&on_event, GroupEvent::Disconnected { reason });
                break;
            }
            None => {
                gate.emit(
                    &on_event,
                    GroupEvent::Disconnected {
                        reason: "push channel closed".to_string(),
                    },
                );
                break;
            }
        }
    }

    lock_active(&active).remove(&path);
}

fn make_cache_record(path: &str, record: GroupRecord, ttl: Duration) -> CacheRecord {
    CacheRecord {
        id: path.to_string(),
        path: path.to_string(),
        payload: RecordPayload::Group(record),
        metadata: RecordMetadata {
            timestamp: Utc::now(),
            version: None,
            ttl,
        },
    }
}

fn lock_active(active: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    // A poisoned registry still holds valid path names.
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Gate serializing callback emissions against `close`.
///
/// Emission holds the lock while invoking the callback, so once `close`
/// returns no further invocation can happen — a push already in flight is
/// dropped.
#[derive(Debug)]
struct CallbackGate {
    closed: Mutex<bool>,
}

impl CallbackGate {
    fn new() -> Self {
        Self {
            closed: Mutex::new(false),
        }
    }

    fn emit(&self, on_event: &EventCallback, event: GroupEvent) {
        let closed = self.closed.lock().unwrap_or_else(|p| p.into_inner());
        if !*closed {
            on_event(event);
        }
    }

    fn close(&self) {
        let mut closed = self.closed.lock().unwrap_or_else(|p| p.into_inner());
        *closed = true;
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Live handle to one push subscription.
#[derive(Debug)]
pub struct SyncSubscription {
    path: String,
    gate: Arc<CallbackGate>,
    handle: JoinHandle<()>,
    active: Arc<Mutex<HashSet<String>>>,
}

impl SyncSubscription {
    /// The remote path this subscription listens on.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Close the subscription. Safe to call multiple times; after it
    /// returns the callback is never invoked again, even for events that
    /// were already in flight.
    pub fn close(&self) {
        self.gate.close();
        self.handle.abort();
        lock_active(&self.active).remove(&self.path);
    }

    pub fn is_closed(&self) -> bool {
        self.gate.is_closed()
    }
}

impl Drop for SyncSubscription {
    fn drop(&mut self) {
        self.close();
    }
}
