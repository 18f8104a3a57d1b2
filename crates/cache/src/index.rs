//! Persistent URL → blob index.
//!
//! The index is a single JSON file at the cache root. It maps canonical
//! URLs to the digest of their verified bytes and records the build
//! generation that last used each entry, which drives pruning.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

/// Current on-disk index format.
pub const INDEX_VERSION: u32 = 1;

/// Index file name under the cache root.
pub const INDEX_FILE: &str = "index.json";

/// One URL's cache record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    /// SHA-256 of the verified bytes.
    pub hash: String,
    /// Size of the blob in bytes.
    pub size: u64,
    /// Tool name at the time of download.
    pub name: String,
    /// Last build generation that used this entry.
    pub last_generation: u64,
    /// When the bytes were first verified.
    pub fetched_at: DateTime<Utc>,
}

/// Serialized form of the index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexFile {
    /// Format version.
    pub version: u32,
    /// Most recent build generation.
    pub generation: u64,
    /// Entries keyed by canonical URL.
    pub entries: BTreeMap<String, IndexEntry>,
}

impl IndexFile {
    /// Load the index, treating a missing file as empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptIndex`] if the file exists but cannot be parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    version: INDEX_VERSION,
                    ..Self::default()
                });
            }
            Err(e) => return Err(Error::io(e, path, "read")),
        };

        let index: Self =
            serde_json::from_str(&content).map_err(|e| Error::CorruptIndex {
                path: path.into(),
                message: e.to_string(),
            })?;
        if index.version != INDEX_VERSION {
            return Err(Error::CorruptIndex {
                path: path.into(),
                message: format!(
                    "unsupported index version {} (expected {INDEX_VERSION})",
                    index.version
                ),
            });
        }
        Ok(index)
    }

    /// Write the index atomically (temp file in the same directory, then rename).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or renamed.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let json =
            serde_json::to_vec_pretty(self).map_err(|e| Error::serialization(e.to_string()))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".index-")
            .tempfile_in(dir)
            .map_err(|e| Error::io(e, dir, "create temp index"))?;
        tmp.write_all(&json)
            .map_err(|e| Error::io(e, tmp.path(), "write"))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| Error::io(e, tmp.path(), "sync"))?;
        tmp.persist(path)
            .map_err(|e| Error::io(e.error, path, "rename"))?;
        Ok(())
    }
}
