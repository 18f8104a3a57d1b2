//! Bounded-concurrency tool download orchestrator.
//!
//! Every tool of the dependency graph is resolved by its own task on a
//! [`JoinSet`]; a [`Semaphore`] caps how many are resolving at any instant.
//! Each task holds the cache's per-URL lock across lookup, fetch and commit,
//! so two runs racing on the same URL download it once.
//!
//! Failures are collected, never propagated: one tool's permanent failure
//! does not stop the others unless all-or-nothing mode is requested.

use crate::http::Fetcher;
use crate::retry::{RetryConfig, with_retry};
use crate::{Error, FailureKind, FetchError, Result};
use artools_cache::{CachedBlob, ToolCache};
use artools_core::{Config, DependencyGraph, ToolKey, ToolNode, Warning, sha256_hex};
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Options for one download run.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Maximum number of tools resolved concurrently.
    pub max_concurrent: usize,
    /// Fetch missing tools over the network. When false only the cache is
    /// consulted and misses stay pending.
    pub offline_mode: bool,
    /// Cancel outstanding work at the first failure.
    pub all_or_nothing: bool,
    /// Retry policy for transient failures.
    pub retry: RetryConfig,
    /// External cancellation signal.
    pub cancellation: CancellationToken,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            max_concurrent: artools_core::config::DEFAULT_MAX_CONCURRENT,
            offline_mode: true,
            all_or_nothing: false,
            retry: RetryConfig::default(),
            cancellation: CancellationToken::new(),
        }
    }
}

impl DownloadOptions {
    /// Build options from the run configuration.
    #[must_use]
    pub fn from_config(config: &Config, offline_mode: bool, cancellation: CancellationToken) -> Self {
        Self {
            max_concurrent: config.max_concurrent_downloads,
            offline_mode,
            all_or_nothing: config.all_or_nothing,
            retry: RetryConfig::from(&config.retry),
            cancellation,
        }
    }
}

/// Resolution state of one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "camelCase")]
pub enum DownloadStatus {
    /// Not yet resolved (or left for the deployed server to fetch).
    Pending,
    /// Being looked up or fetched.
    InFlight,
    /// Bytes present in the cache and verified.
    Verified,
    /// Permanently failed.
    Failed(String),
}

impl DownloadStatus {
    /// Short label used in manifests and logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "inFlight",
            Self::Verified => "verified",
            Self::Failed(_) => "failed",
        }
    }

    /// Failure reason, if failed.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// A tool after deduplication and (attempted) resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedTool {
    /// Canonical URL.
    pub canonical_url: ToolKey,
    /// Tool name (first declared).
    pub name: String,
    /// Verified SHA-256, or the declared one while unresolved.
    pub content_hash: Option<String>,
    /// Blob path in the tool cache once verified.
    pub local_cache_path: Option<PathBuf>,
    /// Size in bytes once verified.
    pub size_bytes: Option<u64>,
    /// Resolution state.
    #[serde(flatten)]
    pub status: DownloadStatus,
    /// Artifacts referencing this tool.
    pub referenced_by: BTreeSet<String>,
    /// Served from the cache without a network fetch.
    pub cache_hit: bool,
}

impl ResolvedTool {
    fn from_node(node: &ToolNode, status: DownloadStatus) -> Self {
        Self {
            canonical_url: node.key.clone(),
            name: node.name.clone(),
            content_hash: node.expected_hash.clone(),
            local_cache_path: None,
            size_bytes: None,
            status,
            referenced_by: node.referenced_by.clone(),
            cache_hit: false,
        }
    }

    fn verified(node: &ToolNode, blob: CachedBlob, cache_hit: bool) -> Self {
        Self {
            content_hash: Some(blob.hash),
            local_cache_path: Some(blob.path),
            size_bytes: Some(blob.size),
            cache_hit,
            ..Self::from_node(node, DownloadStatus::Verified)
        }
    }

    /// Whether the bytes are available in the cache.
    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.status == DownloadStatus::Verified
    }
}

/// A permanent per-tool failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolFailure {
    /// Canonical URL.
    pub url: String,
    /// Tool name.
    pub name: String,
    /// Human-readable reason.
    pub reason: String,
    /// Failure category.
    pub kind: FailureKind,
}

impl std::fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tool '{}' ({}) failed: {}", self.name, self.url, self.reason)
    }
}

/// Outcome of a download run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadReport {
    /// One entry per requested tool, sorted by canonical URL.
    pub resolved: Vec<ResolvedTool>,
    /// Failed tools, sorted by URL.
    pub failures: Vec<ToolFailure>,
    /// Warnings observed while downloading.
    pub warnings: Vec<Warning>,
    /// Tools served from the cache.
    pub cache_hits: usize,
    /// Tools not found in the cache.
    pub cache_misses: usize,
    /// Network fetches that completed with bytes.
    pub fetches: usize,
    /// External cancellation was observed.
    pub cancelled: bool,
}

impl DownloadReport {
    /// No tool failed and the run was not cancelled.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    /// Resolved record for `key`.
    #[must_use]
    pub fn tool(&self, key: &ToolKey) -> Option<&ResolvedTool> {
        self.resolved
            .binary_search_by(|t| t.canonical_url.cmp(key))
            .ok()
            .map(|idx| &self.resolved[idx])
    }

    /// Verified tools.
    pub fn verified(&self) -> impl Iterator<Item = &ResolvedTool> {
        self.resolved.iter().filter(|t| t.is_verified())
    }
}

/// Result of resolving one tool inside a worker task.
struct ToolOutcome {
    tool: ResolvedTool,
    failure: Option<ToolFailure>,
    warning: Option<Warning>,
    cache_hit: bool,
    fetched: bool,
}

impl ToolOutcome {
    fn failed(node: &ToolNode, error: &FetchError) -> Self {
        let reason = error.to_string();
        Self {
            tool: ResolvedTool::from_node(node, DownloadStatus::Failed(reason.clone())),
            failure: Some(ToolFailure {
                url: node.key.to_string(),
                name: node.name.clone(),
                reason,
                kind: error.kind(),
            }),
            warning: None,
            cache_hit: false,
            fetched: false,
        }
    }
}

/// Fills the tool cache for a dependency graph.
#[derive(Clone)]
pub struct DownloadOrchestrator {
    fetcher: Arc<dyn Fetcher>,
    cache: Arc<ToolCache>,
    progress: Arc<DashMap<ToolKey, DownloadStatus>>,
}

impl std::fmt::Debug for DownloadOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOrchestrator")
            .field("cache", &self.cache.root())
            .finish_non_exhaustive()
    }
}

impl DownloadOrchestrator {
    /// Create an orchestrator over a fetcher and a shared cache.
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher>, cache: Arc<ToolCache>) -> Self {
        Self {
            fetcher,
            cache,
            progress: Arc::new(DashMap::new()),
        }
    }

    /// The cache this orchestrator fills.
    #[must_use]
    pub fn cache(&self) -> &Arc<ToolCache> {
        &self.cache
    }

    /// Current status of every tool of the running (or last) download.
    #[must_use]
    pub fn progress(&self) -> BTreeMap<ToolKey, DownloadStatus> {
        self.progress
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Resolve every tool of `graph`.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid options or if the cache index cannot be
    /// persisted. Per-tool failures are reported in the [`DownloadReport`].
    pub async fn download(
        &self,
        graph: &DependencyGraph,
        options: &DownloadOptions,
    ) -> Result<DownloadReport> {
        let all: BTreeSet<ToolKey> = graph.tools().map(|t| t.key.clone()).collect();
        self.download_selected(graph, &all, options).await
    }

    /// Resolve the tools of `graph` whose keys are in `selected`.
    ///
    /// # Errors
    ///
    /// See [`Self::download`].
    pub async fn download_selected(
        &self,
        graph: &DependencyGraph,
        selected: &BTreeSet<ToolKey>,
        options: &DownloadOptions,
    ) -> Result<DownloadReport> {
        if options.max_concurrent == 0 {
            return Err(Error::configuration("max_concurrent must be at least 1"));
        }

        let generation = self.cache.begin_generation();
        let nodes: Vec<ToolNode> = selected
            .iter()
            .filter_map(|key| graph.tool(key))
            .cloned()
            .collect();

        info!(
            tools = nodes.len(),
            max_concurrent = options.max_concurrent,
            offline_mode = options.offline_mode,
            generation,
            "Starting tool download"
        );

        self.progress.clear();
        for node in &nodes {
            self.progress.insert(node.key.clone(), DownloadStatus::Pending);
        }

        // Child token: all-or-nothing aborts this run without touching the caller's token.
        let run_cancel = options.cancellation.child_token();
        let semaphore = Arc::new(Semaphore::new(options.max_concurrent));
        let mut join_set = JoinSet::new();

        for node in nodes.iter().cloned() {
            let worker = Worker {
                fetcher: Arc::clone(&self.fetcher),
                cache: Arc::clone(&self.cache),
                progress: Arc::clone(&self.progress),
                retry: options.retry.clone(),
                offline_mode: options.offline_mode,
                cancel: run_cancel.clone(),
            };
            let semaphore = Arc::clone(&semaphore);

            join_set.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    () = worker.cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let outcome = match permit {
                    Some(_permit) => worker.resolve(&node).await,
                    None => ToolOutcome::failed(&node, &FetchError::cancelled(node.key.as_str())),
                };
                worker.set_status(&node.key, outcome.tool.status.clone());
                outcome
            });
        }

        let mut report = DownloadReport::default();
        while let Some(joined) = join_set.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Worker panicked; there is no node to attribute it to.
                    warn!(error = %e, "Download worker aborted");
                    continue;
                }
            };

            if outcome.failure.is_some() && options.all_or_nothing && !run_cancel.is_cancelled() {
                warn!(
                    url = %outcome.tool.canonical_url,
                    "Tool failed in all-or-nothing mode, cancelling remaining downloads"
                );
                run_cancel.cancel();
            }

            report.cache_hits += usize::from(outcome.cache_hit);
            report.cache_misses += usize::from(!outcome.cache_hit);
            report.fetches += usize::from(outcome.fetched);
            report.warnings.extend(outcome.warning);
            report.failures.extend(outcome.failure);
            report.resolved.push(outcome.tool);
        }

        // Tools whose worker panicked still get a record.
        for node in &nodes {
            if !report.resolved.iter().any(|t| t.canonical_url == node.key) {
                let outcome = ToolOutcome::failed(
                    node,
                    &FetchError::cache(node.key.as_str(), "download worker aborted"),
                );
                report.failures.extend(outcome.failure);
                report.resolved.push(outcome.tool);
            }
        }

        report
            .resolved
            .sort_by(|a, b| a.canonical_url.cmp(&b.canonical_url));
        report.failures.sort_by(|a, b| a.url.cmp(&b.url));
        report.cancelled = options.cancellation.is_cancelled();

        self.cache.flush()?;

        info!(
            verified = report.verified().count(),
            failed = report.failures.len(),
            cache_hits = report.cache_hits,
            cache_misses = report.cache_misses,
            fetches = report.fetches,
            cancelled = report.cancelled,
            "Tool download complete"
        );
        Ok(report)
    }
}

/// Everything one worker task needs, owned.
struct Worker {
    fetcher: Arc<dyn Fetcher>,
    cache: Arc<ToolCache>,
    progress: Arc<DashMap<ToolKey, DownloadStatus>>,
    retry: RetryConfig,
    offline_mode: bool,
    cancel: CancellationToken,
}

impl Worker {
    fn set_status(&self, key: &ToolKey, status: DownloadStatus) {
        self.progress.insert(key.clone(), status);
    }

    async fn resolve(&self, node: &ToolNode) -> ToolOutcome {
        let url = node.key.as_str();
        self.set_status(&node.key, DownloadStatus::InFlight);

        let _guard = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                return ToolOutcome::failed(node, &FetchError::cancelled(url));
            }
            guard = self.cache.lock_key(url) => guard,
        };

        // With no declared hash, the first recorded download is the identity.
        // Read it before the lookup, which drops entries of evicted blobs.
        let expected = node
            .expected_hash
            .clone()
            .or_else(|| self.cache.entry(url).map(|entry| entry.hash));

        match self.lookup(node).await {
            Ok(Some(blob)) => {
                debug!(%url, hash = %blob.hash, "Tool served from cache");
                self.cache.touch(url, &node.name, &blob);
                return ToolOutcome {
                    tool: ResolvedTool::verified(node, blob, true),
                    failure: None,
                    warning: None,
                    cache_hit: true,
                    fetched: false,
                };
            }
            Ok(None) => {}
            Err(e) => return ToolOutcome::failed(node, &e),
        }

        if !self.offline_mode {
            debug!(%url, "Cache miss left for the deployed server");
            return ToolOutcome {
                tool: ResolvedTool::from_node(node, DownloadStatus::Pending),
                failure: None,
                warning: None,
                cache_hit: false,
                fetched: false,
            };
        }

        let fetcher = Arc::clone(&self.fetcher);
        let bytes = match with_retry(&self.retry, url, &self.cancel, |attempt| {
            let fetcher = Arc::clone(&fetcher);
            let url = url.to_string();
            async move {
                debug!(%url, attempt, "Fetching tool");
                fetcher.fetch(&url).await
            }
        })
        .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%url, error = %e, "Tool fetch failed");
                return ToolOutcome::failed(node, &e);
            }
        };

        match self.verify_and_commit(node, expected, bytes).await {
            Ok((blob, warning)) => ToolOutcome {
                tool: ResolvedTool::verified(node, blob, false),
                failure: None,
                warning,
                cache_hit: false,
                fetched: true,
            },
            Err(e) => {
                warn!(%url, error = %e, "Tool verification failed");
                let mut outcome = ToolOutcome::failed(node, &e);
                outcome.fetched = !matches!(e, FetchError::Cancelled { .. });
                outcome
            }
        }
    }

    async fn lookup(&self, node: &ToolNode) -> std::result::Result<Option<CachedBlob>, FetchError> {
        let cache = Arc::clone(&self.cache);
        let key = node.key.to_string();
        let expected = node.expected_hash.clone();
        tokio::task::spawn_blocking(move || cache.lookup(&key, expected.as_deref()))
            .await
            .map_err(|e| FetchError::cache(node.key.as_str(), e))?
            .map_err(|e| FetchError::cache(node.key.as_str(), e))
    }

    /// Hash, compare and promote downloaded bytes. `expected` is the
    /// declared hash or, failing that, the hash recorded by an earlier
    /// download. Staging happens on a blocking thread; the staged file is
    /// dropped (deleted) on any error.
    async fn verify_and_commit(
        &self,
        node: &ToolNode,
        expected: Option<String>,
        bytes: Bytes,
    ) -> std::result::Result<(CachedBlob, Option<Warning>), FetchError> {
        let url = node.key.to_string();
        let cache = Arc::clone(&self.cache);
        let cancel = self.cancel.clone();
        let name = node.name.clone();

        tokio::task::spawn_blocking(move || {
            let actual = sha256_hex(&bytes);
            let warning = match expected {
                Some(expected) if expected != actual => {
                    return Err(FetchError::Integrity {
                        url,
                        expected,
                        actual,
                    });
                }
                Some(_) => None,
                None => Some(Warning::MissingExpectedHash {
                    url: url.clone(),
                    computed: actual.clone(),
                }),
            };

            let mut staged = cache.stage().map_err(|e| FetchError::cache(&url, e))?;
            staged
                .write_all(&bytes)
                .and_then(|()| staged.as_file().sync_all())
                .map_err(|e| FetchError::cache(&url, e))?;

            if cancel.is_cancelled() {
                return Err(FetchError::cancelled(url));
            }

            let blob = cache
                .commit(staged, &actual, &url, &name)
                .map_err(|e| FetchError::cache(&url, e))?;
            Ok((blob, warning))
        })
        .await
        .map_err(|e| FetchError::cache(node.key.as_str(), e))?
    }
}
