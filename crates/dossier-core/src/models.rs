//! Typed record shapes shared across the crate.
//!
//! The remote document store holds whole-record snapshots; every shape this
//! core reads or writes is a variant of [`RecordPayload`] so invariants stay
//! checkable instead of living in loose key/value bags.

use crate::archive::ArchiveManifest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for one uploaded archive, stored in the group record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiveReference {
    /// Version tag, unique within the group; also the object-storage key.
    pub version: String,
    /// Human-readable title for the submission bundle.
    pub display_title: String,
    /// Logical-name to stored-name mapping for this archive.
    pub manifest: ArchiveManifest,
    /// Content type of the archive container as uploaded.
    pub content_type: String,
    /// Hex SHA-256 of the archive bytes, verified after every fetch.
    pub checksum_sha256: String,
    pub uploaded_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Mirrored document for one submission group.
///
/// `archives` is append-only history: a new submission appends a reference
/// and never rewrites or removes earlier ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupRecord {
    pub group_id: String,
    pub archives: Vec<ArchiveReference>,
    pub updated_at: DateTime<Utc>,
}

impl GroupRecord {
    /// Create an empty record for a group with no submissions yet.
    pub fn empty(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            archives: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Find the archive reference for a version tag.
    pub fn find_archive(&self, version: &str) -> Option<&ArchiveReference> {
        self.archives.iter().find(|a| a.version == version)
    }
}

/// Tagged union of every record shape the core mirrors from the remote
/// store. One variant today; the tag keeps old cache rows readable when new
/// shapes are added.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordPayload {
    Group(GroupRecord),
}

impl RecordPayload {
    /// Borrow the group record, if this payload is one.
    pub fn as_group(&self) -> Option<&GroupRecord> {
        match self {
            RecordPayload::Group(record) => Some(record),
        }
    }

    /// Consume the payload into a group record, if it is one.
    pub fn into_group(self) -> Option<GroupRecord> {
        match self {
            RecordPayload::Group(record) => Some(record),
        }
    }
}

/// One file handed to `submit_documents`.
#[derive(Debug, Clone)]
pub struct SubmittedFile {
    pub logical_name: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// A renderable document handle returned by `resolve_document`.
#[derive(Debug, Clone)]
pub struct ResolvedDocument {
    pub bytes: Vec<u8>,
    pub content_type: String,
    /// The name stored inside the archive for this entry.
    pub file_name: String,
}
