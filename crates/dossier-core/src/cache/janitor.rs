//! Periodic cache eviction.

use super::traits::CacheStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Sweeps aged entries out of the cache store.
///
/// Driven by an external timer; it never schedules itself and never fails
/// the caller. In-flight fetches are unaffected — a swept archive is simply
/// re-fetched on next use.
pub struct CacheJanitor {
    store: Arc<dyn CacheStore>,
}

impl CacheJanitor {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Evict every cache entry older than `max_age`, across blobs and
    /// records. Returns the number evicted; storage errors are logged and
    /// reported as zero.
    pub fn run_sweep(&self, max_age: Duration) -> usize {
        match self.store.sweep(max_age) {
            Ok(evicted) => {
                if evicted > 0 {
                    debug!(evicted, "Cache sweep complete");
                }
                evicted
            }
            Err(e) => {
                warn!("Cache sweep failed (will retry on next schedule): {}", e);
                0
            }
        }
    }
}
