//! Archive assembly and extraction.
//!
//! Builds a single zip container from a set of named byte payloads and
//! extracts named entries back out. Pure in-memory transformations with no
//! state; the services own when this work is moved off the async threads.

mod naming;

pub use naming::StoredNamer;

use crate::error::{DossierError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read, Write};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// One input file for archive assembly.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Caller-chosen name, resolved through the manifest on extraction.
    pub logical_name: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Mapping from one logical name to its stored entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    pub logical_name: String,
    pub stored_name: String,
    pub content_type: String,
    pub size_bytes: u64,
}

/// The manifest produced by [`pack`]: a total, injective mapping from
/// logical names to stored names, plus the archive's total size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiveManifest {
    pub entries: Vec<ManifestEntry>,
    pub archive_size_bytes: u64,
}

impl ArchiveManifest {
    /// Look up the manifest entry for a logical name.
    pub fn entry(&self, logical_name: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.logical_name == logical_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of [`pack`].
#[derive(Debug, Clone)]
pub struct PackedArchive {
    pub bytes: Vec<u8>,
    pub manifest: ArchiveManifest,
}

/// One extracted entry from [`unpack`].
#[derive(Debug, Clone)]
pub struct UnpackedEntry {
    pub stored_name: String,
    pub bytes: Vec<u8>,
}

/// Hex-encoded SHA-256 digest, used to verify archive bytes after transport.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Build a zip archive from `entries`.
///
/// Stored names are derived with [`StoredNamer`]: sanitized, length-capped,
/// unique. Every input file appears exactly once in the returned manifest.
///
/// # Errors
///
/// `EmptyPack` when `entries` is empty; `EntryTooLarge` naming the first
/// offending file when any entry exceeds `max_file_bytes`.
pub fn pack(entries: &[ArchiveEntry], max_file_bytes: u64) -> Result<PackedArchive> {
    if entries.is_empty() {
        return Err(DossierError::EmptyPack);
    }
    for entry in entries {
        if entry.bytes.len() as u64 > max_file_bytes {
            return Err(DossierError::EntryTooLarge {
                logical_name: entry.logical_name.clone(),
                size_bytes: entry.bytes.len() as u64,
                limit_bytes: max_file_bytes,
            });
        }
    }

    let mut namer = StoredNamer::new();
    let mut manifest_entries = Vec::with_capacity(entries.len());
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    for entry in entries {
        let stored_name = namer.allocate(&entry.logical_name);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        writer
            .start_file(stored_name.as_str(), options)
            .map_err(zip_write_error)?;
        writer.write_all(&entry.bytes).map_err(|e| DossierError::Io {
            message: format!("Failed to write archive entry '{}': {}", stored_name, e),
            source: Some(e),
        })?;
        manifest_entries.push(ManifestEntry {
            logical_name: entry.logical_name.clone(),
            stored_name,
            content_type: entry.content_type.clone(),
            size_bytes: entry.bytes.len() as u64,
        });
    }

    let bytes = writer.finish().map_err(zip_write_error)?.into_inner();
    let manifest = ArchiveManifest {
        entries: manifest_entries,
        archive_size_bytes: bytes.len() as u64,
    };

    Ok(PackedArchive { bytes, manifest })
}

/// Extract every entry from an archive.
pub fn unpack(archive_bytes: &[u8]) -> Result<Vec<UnpackedEntry>> {
    let mut archive = open(archive_bytes)?;
    let mut entries = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(zip_read_error)?;
        let mut bytes = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut bytes)
            .map_err(|e| DossierError::CorruptArchive {
                message: format!("Failed to decompress entry {}: {}", i, e),
            })?;
        entries.push(UnpackedEntry {
            stored_name: file.name().to_string(),
            bytes,
        });
    }

    Ok(entries)
}

/// Enumerate stored entry names without decompressing any payloads.
pub fn list_entries(archive_bytes: &[u8]) -> Result<Vec<String>> {
    let archive = open(archive_bytes)?;
    Ok(archive.file_names().map(String::from).collect())
}

/// Extract a single entry by its stored name.
pub fn unpack_one(archive_bytes: &[u8], stored_name: &str) -> Result<Vec<u8>> {
    let mut archive = open(archive_bytes)?;
    let mut file = match archive.by_name(stored_name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => {
            return Err(DossierError::EntryNotFound {
                name: stored_name.to_string(),
            })
        }
        Err(e) => return Err(zip_read_error(e)),
    };

    let mut bytes = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut bytes)
        .map_err(|e| DossierError::CorruptArchive {
            message: format!("Failed to decompress entry '{}': {}", stored_name, e),
        })?;
    Ok(bytes)
}

fn open(archive_bytes: &[u8]) -> Result<ZipArchive<Cursor<&[u8]>>> {
    ZipArchive::new(Cursor::new(archive_bytes)).map_err(|e| DossierError::CorruptArchive {
        message: format!("Failed to parse archive structure: {}", e),
    })
}

fn zip_read_error(err: ZipError) -> DossierError {
    DossierError::CorruptArchive {
        message: err.to_string(),
    }
}

fn zip_write_error(err: ZipError) -> DossierError {
    match err {
        ZipError::Io(e) => DossierError::Io {
            message: format!("Archive write failed: {}", e),
            source: Some(e),
        },
        other => DossierError::Io {
            message: format!("Archive write failed: {}", other),
            source: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, bytes: &[u8]) -> ArchiveEntry {
        ArchiveEntry {
            logical_name: name.to_string(),
            bytes: bytes.to_vec(),
            content_type: "application/octet-stream".to_string(),
        }
    }

    #[test]
    fn test_round_trip() {
        let inputs = vec![
            entry("consent.pdf", b"pdf bytes here"),
            entry("protocol.docx", b"docx bytes"),
            entry("budget.xlsx", &[0u8, 1, 2, 3, 255]),
        ];

        let packed = pack(&inputs, 1024).unwrap();
        assert_eq!(packed.manifest.len(), 3);
        assert_eq!(packed.manifest.archive_size_bytes, packed.bytes.len() as u64);

        let unpacked = unpack(&packed.bytes).unwrap();
        assert_eq!(unpacked.len(), inputs.len());
        for input in &inputs {
            let stored = &packed.manifest.entry(&input.logical_name).unwrap().stored_name;
            let extracted = unpacked.iter().find(|e| &e.stored_name == stored).unwrap();
            assert_eq!(extracted.bytes, input.bytes);
        }
    }

    #[test]
    fn test_empty_input_rejected() {
        let err = pack(&[], 1024).unwrap_err();
        assert!(matches!(err, DossierError::EmptyPack));
    }

    #[test]
    fn test_oversized_entry_named() {
        let inputs = vec![entry("ok.pdf", b"ok"), entry("huge.pdf", &[0u8; 64])];
        let err = pack(&inputs, 32).unwrap_err();
        match err {
            DossierError::EntryTooLarge {
                logical_name,
                size_bytes,
                limit_bytes,
            } => {
                assert_eq!(logical_name, "huge.pdf");
                assert_eq!(size_bytes, 64);
                assert_eq!(limit_bytes, 32);
            }
            other => panic!("Expected EntryTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_logical_names_both_recovered() {
        let inputs = vec![entry("a.pdf", b"first-10by"), entry("a.pdf", b"second10by")];
        let packed = pack(&inputs, 1024).unwrap();

        let stored: Vec<_> = packed
            .manifest
            .entries
            .iter()
            .map(|e| e.stored_name.clone())
            .collect();
        assert_eq!(stored, vec!["a.pdf", "a_1.pdf"]);

        assert_eq!(unpack_one(&packed.bytes, "a.pdf").unwrap(), b"first-10by");
        assert_eq!(unpack_one(&packed.bytes, "a_1.pdf").unwrap(), b"second10by");
    }

    #[test]
    fn test_list_entries_without_decompression() {
        let packed = pack(&[entry("x.txt", b"x"), entry("y.txt", b"y")], 1024).unwrap();
        let mut names = list_entries(&packed.bytes).unwrap();
        names.sort();
        assert_eq!(names, vec!["x.txt", "y.txt"]);
    }

    #[test]
    fn test_unpack_one_missing_entry() {
        let packed = pack(&[entry("x.txt", b"x")], 1024).unwrap();
        let err = unpack_one(&packed.bytes, "missing.txt").unwrap_err();
        assert!(matches!(err, DossierError::EntryNotFound { .. }));
    }

    #[test]
    fn test_corrupt_archive_detected() {
        let err = unpack(b"this is not a zip file").unwrap_err();
        assert!(matches!(err, DossierError::CorruptArchive { .. }));

        let err = list_entries(&[0x50, 0x4b, 0x03, 0x04, 9, 9]).unwrap_err();
        assert!(matches!(err, DossierError::CorruptArchive { .. }));
    }

    #[test]
    fn test_checksum_stable() {
        let digest = sha256_hex(b"hello");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, sha256_hex(b"hello"));
        assert_ne!(digest, sha256_hex(b"hello!"));
    }
}
