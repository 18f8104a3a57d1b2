//! Tool cache maintenance actions.

use super::{ActionResult, Outcome};
use crate::cli::CliError;
use artools_cache::ToolCache;
use artools_core::Config;

pub(super) fn prune(config: &Config, keep_generations: u64) -> Result<Outcome, CliError> {
    let cache = ToolCache::open(config.cache_dir())?;
    let report = cache.prune(keep_generations)?;
    let summary = format!(
        "Pruned {} entries and {} blobs ({} bytes freed)",
        report.entries_removed, report.blobs_removed, report.bytes_freed
    );
    Outcome::new(ActionResult::ok(report), summary)
}

pub(super) fn stats(config: &Config) -> Result<Outcome, CliError> {
    let cache = ToolCache::open(config.cache_dir())?;
    let stats = cache.stats()?;
    let summary = format!(
        "Cache {}: {} entries, {} blobs, {} bytes, generation {}",
        stats.root.display(),
        stats.entries,
        stats.blobs,
        stats.total_bytes,
        stats.generation
    );
    Outcome::new(ActionResult::ok(stats), summary)
}
