//! Explicit pruning of stale cache entries.
//!
//! Pruning is generation based: every build that touches the cache stamps
//! the entries it used with the current generation. Entries not used by any
//! of the most recent N generations are dropped, then blobs no longer
//! referenced by any entry are deleted. Never triggered during a build.

use crate::store::ToolCache;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Staging files younger than this may belong to a running download.
pub const STALE_STAGING_AGE: Duration = Duration::from_secs(60 * 60);

/// Result of a prune operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneReport {
    /// Number of index entries removed
    pub entries_removed: usize,
    /// Number of blobs removed
    pub blobs_removed: usize,
    /// Bytes freed
    pub bytes_freed: u64,
    /// Staging files older than [`STALE_STAGING_AGE`] removed
    pub staged_removed: usize,
}

impl ToolCache {
    /// Remove entries unused by the last `keep_generations` builds.
    ///
    /// The index is flushed afterwards.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `keep_generations` is zero, or an
    /// I/O error if blobs cannot be listed or the index cannot be written.
    pub fn prune(&self, keep_generations: u64) -> Result<PruneReport> {
        if keep_generations == 0 {
            return Err(Error::configuration(
                "keep_generations must be at least 1",
            ));
        }

        let current = self.generation();
        // Oldest generation still considered recent.
        let oldest_kept = (current + 1).saturating_sub(keep_generations);
        let mut report = PruneReport::default();

        let mut referenced = HashSet::new();
        for (key, entry) in self.entries() {
            if entry.last_generation < oldest_kept {
                debug!(url = %key, generation = entry.last_generation, "Pruning index entry");
                self.remove_entry(&key);
                report.entries_removed += 1;
            } else {
                referenced.insert(entry.hash);
            }
        }

        for (path, size) in self.blob_files()? {
            let hash = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if referenced.contains(&hash) {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    report.blobs_removed += 1;
                    report.bytes_freed += size;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove blob"),
            }
        }

        report.staged_removed = self.remove_stale_staging(STALE_STAGING_AGE)?;
        self.flush()?;

        info!(
            generation = current,
            keep_generations,
            entries_removed = report.entries_removed,
            blobs_removed = report.blobs_removed,
            bytes_freed = report.bytes_freed,
            "Pruned tool cache"
        );
        Ok(report)
    }

    /// Delete staging files last modified at least `max_age` ago.
    fn remove_stale_staging(&self, max_age: Duration) -> Result<usize> {
        let tmp = self.tmp_dir();
        let staged = std::fs::read_dir(&tmp).map_err(|e| Error::io(e, &tmp, "read_dir"))?;
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in staged.flatten() {
            let age = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|modified| now.duration_since(modified).unwrap_or_default());
            match age {
                Ok(age) if age >= max_age => {}
                _ => continue,
            }
            if std::fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
