//! Artifact scanning and tool dependency resolution for artools
//!
//! This crate holds the single-threaded front half of the pipeline:
//! - Scanning a corpus of artifact definitions for tool references
//! - Canonicalizing references so identical tools collapse to one key
//! - Building the deterministic artifact ↔ tool dependency graph
//!
//! It also owns the types every other artools crate shares: the run
//! context, configuration, warnings, platform and packaging mode.
//!
//! # Overview
//!
//! ```text
//! Scanner → Normalizer → DependencyGraph
//! ```
//!
//! Recoverable problems (malformed artifacts, reference conflicts) become
//! [`Warning`]s on the [`RunContext`]. Only failures that prevent a run from
//! producing anything at all are returned as [`Error`].

pub mod artifact;
pub mod config;
mod context;
mod error;
pub mod filter;
pub mod graph;
pub mod hash;
pub mod normalize;
pub mod platform;
pub mod scanner;
mod warning;

pub use artifact::{
    ArtifactDefinition, ArtifactKind, ParseMode, ReferenceOrigin, ToolReference, name_from_url,
};
pub use config::{Config, ConflictPolicy, RetrySettings};
pub use context::RunContext;
pub use error::{Error, Result};
pub use filter::NameFilter;
pub use graph::{DependencyGraph, ToolKey, ToolNode};
pub use hash::{normalize_digest, sha256_file, sha256_hex};
pub use normalize::{
    NormalizeError, NormalizeOutput, NormalizedReference, Normalizer, canonicalize_url,
    is_local_reference,
};
pub use platform::{PackageMode, Platform};
pub use scanner::{ScanOptions, ScanOutput, Scanner};
pub use warning::Warning;

/// Scan, normalize and build the graph in one step.
///
/// # Errors
///
/// Returns an error if the artifact root cannot be read, or
/// [`Error::Conflicts`] when conflicts are rejected by the strict policy.
pub fn resolve(
    root: &std::path::Path,
    options: &ScanOptions,
    ctx: &mut RunContext,
) -> Result<(ScanOutput, DependencyGraph)> {
    let scan = Scanner::scan(root, options, ctx)?;
    let policy = ctx.config.conflict_policy;
    let normalized = Normalizer::new(policy).normalize(&scan.artifacts, ctx);
    if normalized.rejected(policy) {
        return Err(Error::Conflicts {
            count: normalized.conflicts,
        });
    }
    let graph = DependencyGraph::build(&scan.artifacts, &normalized.references);
    Ok((scan, graph))
}
