//! Content-addressed tool store.
//!
//! Verified tool bytes are stored by their SHA-256 digest in a two-level
//! directory structure. A secondary index maps canonical URLs to digests so
//! a known URL can be served without touching the network.
//!
//! ## Directory Structure
//!
//! ```text
//! <root>/
//!   blobs/sha256/ab/abcdef123456...   verified bytes
//!   tmp/                               in-flight downloads
//!   index.json                         URL → digest index
//! ```
//!
//! Workers resolving the same URL serialize on a per-key lock
//! ([`ToolCache::lock_key`]); workers resolving different URLs never block
//! each other. Downloads are staged under `tmp/` and only renamed into
//! `blobs/` after verification, so a partial download is never visible.

use crate::index::{INDEX_FILE, IndexEntry, IndexFile, INDEX_VERSION};
use crate::{Error, Result};
use artools_core::{normalize_digest, sha256_file};
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::NamedTempFile;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace, warn};

/// A verified blob in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBlob {
    /// SHA-256 digest.
    pub hash: String,
    /// Absolute path of the blob.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Cache root.
    pub root: PathBuf,
    /// URL index entries.
    pub entries: usize,
    /// Blobs on disk.
    pub blobs: usize,
    /// Total blob bytes.
    pub total_bytes: u64,
    /// Current build generation.
    pub generation: u64,
}

/// Content-addressed tool cache.
///
/// Shared between download workers behind an [`Arc`].
#[derive(Debug)]
pub struct ToolCache {
    root: PathBuf,
    index: DashMap<String, IndexEntry>,
    generation: AtomicU64,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ToolCache {
    /// Open (creating if needed) a cache at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the layout cannot be created or the index is corrupt.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [root.join("blobs").join("sha256"), root.join("tmp")] {
            std::fs::create_dir_all(&dir).map_err(|e| Error::io(e, &dir, "create_dir_all"))?;
        }

        let index_file = IndexFile::load(&root.join(INDEX_FILE))?;
        debug!(
            root = %root.display(),
            entries = index_file.entries.len(),
            generation = index_file.generation,
            "Opened tool cache"
        );

        Ok(Self {
            root,
            index: index_file.entries.into_iter().collect(),
            generation: AtomicU64::new(index_file.generation),
            locks: DashMap::new(),
        })
    }

    /// Cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Staging directory for in-flight downloads.
    #[must_use]
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Directory holding all blobs.
    #[must_use]
    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join("blobs").join("sha256")
    }

    /// Path for a blob digest: `blobs/sha256/{hash[0:2]}/{hash}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDigest`] unless `hash` is a SHA-256 hex digest.
    pub fn blob_path(&self, hash: &str) -> Result<PathBuf> {
        let hash = normalize_digest(hash).ok_or_else(|| Error::InvalidDigest {
            digest: hash.to_string(),
        })?;
        Ok(self.blobs_dir().join(&hash[0..2]).join(&hash))
    }

    /// Acquire the lock for one canonical URL.
    ///
    /// The guard must be held across lookup, fetch and commit so that a
    /// second worker for the same URL observes the first worker's result.
    pub async fn lock_key(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Index entry for a URL.
    #[must_use]
    pub fn entry(&self, key: &str) -> Option<IndexEntry> {
        self.index.get(key).map(|e| e.value().clone())
    }

    /// Look up a verified blob for `key`.
    ///
    /// The expected hash, when known, takes precedence over the URL index.
    /// The blob is always re-hashed; a blob whose bytes no longer match its
    /// digest is deleted and reported as a miss. The index entry survives
    /// eviction so the URL keeps its recorded hash for the re-download.
    ///
    /// # Errors
    ///
    /// Returns an error only for unexpected I/O failures.
    pub fn lookup(&self, key: &str, expected_hash: Option<&str>) -> Result<Option<CachedBlob>> {
        let indexed = self.index.get(key).map(|e| e.hash.clone());
        let Some(hash) = expected_hash.map(String::from).or(indexed) else {
            trace!(url = key, "Cache miss (unknown url)");
            return Ok(None);
        };
        let Some(hash) = normalize_digest(&hash) else {
            return Ok(None);
        };

        let path = self.blob_path(&hash)?;
        if !path.is_file() {
            trace!(url = key, %hash, "Cache miss (no blob)");
            return Ok(None);
        }

        let (actual, size) = sha256_file(&path)?;
        if actual != hash {
            warn!(
                url = key,
                expected = %hash,
                actual = %actual,
                path = %path.display(),
                "Cached blob failed re-verification, evicting"
            );
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io(e, &path, "remove corrupt blob")),
            }
            return Ok(None);
        }

        trace!(url = key, %hash, "Cache hit");
        Ok(Some(CachedBlob { hash, path, size }))
    }

    /// Create a staging file for a download.
    ///
    /// The file is deleted when dropped unless passed to [`Self::commit`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn stage(&self) -> Result<NamedTempFile> {
        let dir = self.tmp_dir();
        tempfile::Builder::new()
            .prefix("dl-")
            .tempfile_in(&dir)
            .map_err(|e| Error::io(e, &dir, "create staging file"))
    }

    /// Promote verified staged bytes into the store and index them under `key`.
    ///
    /// If a blob with the same digest already exists the staged file is
    /// discarded.
    ///
    /// # Errors
    ///
    /// Returns an error if the rename fails or `hash` is not a valid digest.
    pub fn commit(
        &self,
        staged: NamedTempFile,
        hash: &str,
        key: &str,
        name: &str,
    ) -> Result<CachedBlob> {
        let path = self.blob_path(hash)?;
        let hash = normalize_digest(hash).unwrap_or_else(|| hash.to_string());

        if path.is_file() {
            drop(staged);
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::io(e, parent, "create_dir_all"))?;
            }
            staged
                .persist(&path)
                .map_err(|e| Error::io(e.error, &path, "rename"))?;
        }

        let size = std::fs::metadata(&path)
            .map_err(|e| Error::io(e, &path, "metadata"))?
            .len();
        let blob = CachedBlob { hash, path, size };
        self.touch(key, name, &blob);
        debug!(url = key, hash = %blob.hash, size, "Committed blob to cache");
        Ok(blob)
    }

    /// Record that `key` resolved to `blob` during the current generation.
    pub fn touch(&self, key: &str, name: &str, blob: &CachedBlob) {
        let generation = self.generation();
        self.index
            .entry(key.to_string())
            .and_modify(|entry| {
                if entry.hash != blob.hash {
                    entry.hash.clone_from(&blob.hash);
                    entry.fetched_at = Utc::now();
                }
                entry.size = blob.size;
                entry.last_generation = generation;
            })
            .or_insert_with(|| IndexEntry {
                hash: blob.hash.clone(),
                size: blob.size,
                name: name.to_string(),
                last_generation: generation,
                fetched_at: Utc::now(),
            });
    }

    /// Start a new build generation and return its number.
    pub fn begin_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Current build generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Persist the index atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be written.
    pub fn flush(&self) -> Result<()> {
        let snapshot = IndexFile {
            version: INDEX_VERSION,
            generation: self.generation(),
            entries: self
                .index
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        };
        snapshot.save(&self.root.join(INDEX_FILE))?;
        debug!(entries = snapshot.entries.len(), "Flushed cache index");
        Ok(())
    }

    /// Entry count, blob count and size.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob directory cannot be walked.
    pub fn stats(&self) -> Result<CacheStats> {
        let mut blobs = 0usize;
        let mut total_bytes = 0u64;
        for (_, size) in self.blob_files()? {
            blobs += 1;
            total_bytes += size;
        }
        Ok(CacheStats {
            root: self.root.clone(),
            entries: self.index.len(),
            blobs,
            total_bytes,
            generation: self.generation(),
        })
    }

    /// Every blob file on disk with its size.
    pub(crate) fn blob_files(&self) -> Result<Vec<(PathBuf, u64)>> {
        let dir = self.blobs_dir();
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&dir).min_depth(2) {
            let entry = entry.map_err(|e| {
                let path = e.path().map_or_else(|| dir.clone(), Path::to_path_buf);
                Error::io(
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("directory loop")),
                    path,
                    "read_dir",
                )
            })?;
            if entry.file_type().is_file() {
                let size = entry
                    .metadata()
                    .map_err(|e| {
                        Error::io(
                            e.into_io_error()
                                .unwrap_or_else(|| std::io::Error::other("metadata")),
                            entry.path(),
                            "metadata",
                        )
                    })?
                    .len();
                files.push((entry.into_path(), size));
            }
        }
        Ok(files)
    }

    /// Snapshot of all index entries.
    pub(crate) fn entries(&self) -> Vec<(String, IndexEntry)> {
        self.index
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub(crate) fn remove_entry(&self, key: &str) {
        self.index.remove(key);
    }
}
