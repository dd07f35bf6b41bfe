//! Centralized configuration for the Dossier core.
//!
//! Compile-time defaults live in const-holder structs; `DossierConfig` is the
//! runtime knob set passed into [`crate::DossierApi`].

use crate::error::{DossierError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Cache freshness defaults.
pub struct CacheDefaults;

impl CacheDefaults {
    /// Default TTL for mirrored group records (5 minutes).
    pub const RECORD_TTL: Duration = Duration::from_secs(300);
    /// Default TTL for cached archive blobs and extracted entries (7 days).
    pub const BLOB_TTL: Duration = Duration::from_secs(7 * 86_400);
    /// Default maximum age used by the janitor sweep (30 days).
    pub const SWEEP_MAX_AGE: Duration = Duration::from_secs(30 * 86_400);
}

/// Archive assembly limits.
pub struct PackagingLimits;

impl PackagingLimits {
    /// Per-file size ceiling for a submission (50 MB).
    pub const MAX_FILE_BYTES: u64 = 52_428_800;
    /// Maximum stored-name length inside an archive.
    pub const MAX_STORED_NAME_LEN: usize = 120;
    /// File extension of the uploaded archive container.
    pub const ARCHIVE_EXT: &'static str = "zip";
    /// Content type supplied when uploading archives.
    pub const ARCHIVE_CONTENT_TYPE: &'static str = "application/zip";
}

/// Remote-boundary network configuration.
pub struct RemoteConfig;

impl RemoteConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const MAX_RETRIES: u32 = 3;
    pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
    pub const USER_AGENT: &'static str = "Dossier-Core/0.3";
}

/// Directory and path configuration.
pub struct PathsConfig;

impl PathsConfig {
    pub const CACHE_DB_FILENAME: &'static str = "dossier-cache.sqlite";
    pub const CACHE_DIR_NAME: &'static str = "dossier";
    /// Default collection path for group records in the remote store.
    pub const GROUPS_COLLECTION: &'static str = "groups";
}

/// Runtime configuration for a [`crate::DossierApi`] instance.
#[derive(Debug, Clone)]
pub struct DossierConfig {
    /// Location of the embedded cache database file.
    pub cache_db_path: PathBuf,
    /// Remote collection path under which group records live.
    pub collection_path: String,
    /// Freshness window for mirrored group records.
    pub record_ttl: Duration,
    /// Freshness window for cached blobs.
    pub blob_ttl: Duration,
    /// Per-file size ceiling for submissions.
    pub max_file_bytes: u64,
}

impl DossierConfig {
    /// Create a configuration rooted at the platform cache directory.
    ///
    /// Falls back to the current directory when the platform does not expose
    /// a cache location (containerized hosts).
    pub fn new() -> Self {
        let base = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            cache_db_path: base
                .join(PathsConfig::CACHE_DIR_NAME)
                .join(PathsConfig::CACHE_DB_FILENAME),
            collection_path: PathsConfig::GROUPS_COLLECTION.to_string(),
            record_ttl: CacheDefaults::RECORD_TTL,
            blob_ttl: CacheDefaults::BLOB_TTL,
            max_file_bytes: PackagingLimits::MAX_FILE_BYTES,
        }
    }

    /// Set the cache database path.
    pub fn with_cache_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_db_path = path.into();
        self
    }

    /// Set the remote collection path for group records.
    pub fn with_collection_path(mut self, path: impl Into<String>) -> Self {
        self.collection_path = path.into();
        self
    }

    /// Set the record freshness window.
    pub fn with_record_ttl(mut self, ttl: Duration) -> Self {
        self.record_ttl = ttl;
        self
    }

    /// Set the blob freshness window.
    pub fn with_blob_ttl(mut self, ttl: Duration) -> Self {
        self.blob_ttl = ttl;
        self
    }

    /// Set the per-file size ceiling.
    pub fn with_max_file_bytes(mut self, limit: u64) -> Self {
        self.max_file_bytes = limit;
        self
    }

    /// Validate the configuration before use.
    pub fn validate(&self) -> Result<()> {
        if self.collection_path.is_empty() {
            return Err(DossierError::Config {
                message: "collection_path must not be empty".to_string(),
            });
        }
        if self.max_file_bytes == 0 {
            return Err(DossierError::Config {
                message: "max_file_bytes must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Remote document path for a group record.
    pub fn group_path(&self, group_id: &str) -> String {
        format!("{}/{}", self.collection_path, group_id)
    }
}

impl Default for DossierConfig {
    fn default() -> Self {
        Self::new()
    }
}
