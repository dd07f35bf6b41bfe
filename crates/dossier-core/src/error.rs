//! Error types for the Dossier core.
//!
//! One error enum covers the whole crate so callers can match on the exact
//! failure class: packaging input problems, archive corruption, remote
//! transport failures, and embedded-cache I/O. Cache errors are special in
//! that the rest of the crate treats them as misses rather than failures.

use std::time::Duration;
use thiserror::Error;

/// Main error type for Dossier operations.
#[derive(Debug, Error)]
pub enum DossierError {
    // Archive assembly errors
    #[error("Cannot pack an archive from an empty file set")]
    EmptyPack,

    #[error("File '{logical_name}' is {size_bytes} bytes, exceeding the {limit_bytes} byte limit")]
    EntryTooLarge {
        logical_name: String,
        size_bytes: u64,
        limit_bytes: u64,
    },

    // Archive read errors
    #[error("Archive is corrupt or unreadable: {message}")]
    CorruptArchive { message: String },

    #[error("Entry not found in archive: {name}")]
    EntryNotFound { name: String },

    // Remote object storage errors
    #[error("Upload to '{path}' failed: {message}")]
    Upload { path: String, message: String },

    // Group record errors
    #[error("No archive version '{version}' recorded for group '{group_id}'")]
    ReferenceNotFound { group_id: String, version: String },

    #[error("Remote store unreachable for '{path}': {message}")]
    RemoteUnavailable { path: String, message: String },

    // Subscription errors
    #[error("A subscription for '{path}' is already active")]
    SubscriptionActive { path: String },

    // Embedded cache errors (swallowed by consumers, never user-facing)
    #[error("Cache storage error: {message}")]
    CacheStorage {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // File system errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for Dossier operations.
pub type Result<T> = std::result::Result<T, DossierError>;

// Conversion implementations for common error types

impl From<std::io::Error> for DossierError {
    fn from(err: std::io::Error) -> Self {
        DossierError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for DossierError {
    fn from(err: serde_json::Error) -> Self {
        DossierError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for DossierError {
    fn from(err: rusqlite::Error) -> Self {
        DossierError::CacheStorage {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for DossierError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DossierError::Timeout(Duration::from_secs(0))
        } else {
            DossierError::Network {
                message: err.to_string(),
                source: Some(err),
            }
        }
    }
}

impl DossierError {
    /// Check if this error should trigger a retry at the remote boundary.
    ///
    /// Only transport-level failures are retryable. Input errors, missing
    /// entries, and cache errors never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DossierError::Network { .. }
                | DossierError::Timeout(_)
                | DossierError::RemoteUnavailable { .. }
        )
    }

    /// Check if this error came from archive assembly input validation.
    ///
    /// Used by callers to surface the specific offending file instead of a
    /// generic failure.
    pub fn is_pack_error(&self) -> bool {
        matches!(
            self,
            DossierError::EmptyPack | DossierError::EntryTooLarge { .. }
        )
    }
}
