//! Content-addressed tool cache for artools
//!
//! This crate provides the only long-lived mutable state of artools:
//! - Content-addressed storage of verified tool bytes keyed by SHA-256
//! - A URL → digest index for lookup before any network access
//! - Per-URL locks so concurrent workers never download the same tool twice
//! - Generation-based pruning, run only on explicit request
//!
//! # Overview
//!
//! The cache is append-only during builds. A lookup always re-hashes the
//! blob it returns, so a corrupted entry is evicted and re-downloaded
//! rather than packaged.

mod error;
pub mod index;
pub mod prune;
pub mod store;

// Re-export error types at crate root
pub use error::{Error, Result};

// Re-export main types
pub use index::{IndexEntry, IndexFile};
pub use prune::PruneReport;
pub use store::{CacheStats, CachedBlob, ToolCache};
