//! Integration tests for the download orchestrator.
//!
//! An instrumented in-memory fetcher stands in for the network so the tests
//! can count fetches, track the number of fetches in flight and inject
//! transient or permanent failures.

use artools_cache::ToolCache;
use artools_core::{
    ArtifactDefinition, ArtifactKind, DependencyGraph, ParseMode, ReferenceOrigin, ToolKey,
    Warning, normalize::NormalizedReference, sha256_hex,
};
use artools_fetch::{
    DownloadOptions, DownloadOrchestrator, DownloadStatus, FailureKind, FetchError, Fetcher,
    RetryConfig,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Instrumented fetcher
// =============================================================================

#[derive(Clone)]
enum Behavior {
    Serve(Vec<u8>),
    FailTransient,
    FailPermanent,
    /// Fail transiently this many times, then serve.
    Flaky(usize, Vec<u8>),
}

struct MockFetcher {
    behaviors: HashMap<String, Behavior>,
    calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
}

impl MockFetcher {
    fn new(behaviors: &[(&str, Behavior)], delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            behaviors: behaviors
                .iter()
                .map(|(url, b)| ((*url).to_string(), b.clone()))
                .collect(),
            calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay,
        })
    }

    fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.behaviors.get(url) {
            Some(Behavior::Serve(bytes)) => Ok(Bytes::from(bytes.clone())),
            Some(Behavior::Flaky(failures, bytes)) if call > *failures => {
                Ok(Bytes::from(bytes.clone()))
            }
            Some(Behavior::Flaky(..) | Behavior::FailTransient) => {
                Err(FetchError::transient(url, "HTTP 503"))
            }
            Some(Behavior::FailPermanent) | None => Err(FetchError::permanent(url, "HTTP 404")),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn artifact(name: &str) -> ArtifactDefinition {
    ArtifactDefinition {
        name: name.into(),
        description: String::new(),
        kind: ArtifactKind::Client,
        tool_references: Vec::new(),
        source_path: PathBuf::from(format!("{name}.yaml")),
        parse_mode: ParseMode::Structured,
        raw_text: String::new(),
    }
}

/// Graph from (artifact, url, expected hash) triples.
fn graph(refs: &[(&str, &str, Option<String>)]) -> DependencyGraph {
    let mut artifacts: Vec<_> = refs.iter().map(|(a, _, _)| artifact(a)).collect();
    artifacts.dedup_by(|a, b| a.name == b.name);
    let references: Vec<_> = refs
        .iter()
        .map(|(a, url, hash)| NormalizedReference {
            key: ToolKey::new(*url),
            name: url.rsplit('/').next().unwrap().to_string(),
            expected_hash: hash.clone(),
            source_artifact: (*a).to_string(),
            origin: ReferenceOrigin::ToolSection,
        })
        .collect();
    DependencyGraph::build(&artifacts, &references)
}

fn options(max_concurrent: usize) -> DownloadOptions {
    DownloadOptions {
        max_concurrent,
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            exponential_base: 2.0,
        },
        ..DownloadOptions::default()
    }
}

fn orchestrator(fetcher: &Arc<MockFetcher>, temp: &TempDir) -> DownloadOrchestrator {
    let cache = Arc::new(ToolCache::open(temp.path().join("cache")).unwrap());
    DownloadOrchestrator::new(fetcher.clone(), cache)
}

const A: &str = "https://example.com/A";
const B: &str = "https://example.com/B";

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_aab_downloads_each_tool_once() {
    let temp = TempDir::new().unwrap();
    let fetcher = MockFetcher::new(
        &[(A, Behavior::Serve(b"a".to_vec())), (B, Behavior::Serve(b"b".to_vec()))],
        Duration::ZERO,
    );
    let g = graph(&[("One", A, None), ("Two", A, None), ("Three", B, None)]);
    assert_eq!(g.tool_count(), 2);

    let report = orchestrator(&fetcher, &temp)
        .download(&g, &options(1))
        .await
        .unwrap();

    assert_eq!(fetcher.total_calls(), 2);
    assert_eq!(report.fetches, 2);
    assert_eq!(report.verified().count(), 2);
    assert!(report.is_success());
    let a = report.tool(&ToolKey::new(A)).unwrap();
    assert_eq!(a.referenced_by.len(), 2);
    assert_eq!(a.content_hash.as_deref(), Some(sha256_hex(b"a").as_str()));
    assert!(a.local_cache_path.as_ref().unwrap().is_file());
    assert_eq!(report.warnings.len(), 2);
    assert!(matches!(
        report.warnings[0],
        Warning::MissingExpectedHash { .. }
    ));
}

#[tokio::test]
async fn test_concurrency_bound_respected() {
    let temp = TempDir::new().unwrap();
    let urls: Vec<String> = (0..12).map(|i| format!("https://example.com/t{i}")).collect();
    let behaviors: Vec<(&str, Behavior)> = urls
        .iter()
        .map(|u| (u.as_str(), Behavior::Serve(u.as_bytes().to_vec())))
        .collect();
    let fetcher = MockFetcher::new(&behaviors, Duration::from_millis(20));
    let refs: Vec<_> = urls.iter().map(|u| ("Art", u.as_str(), None)).collect();

    let report = orchestrator(&fetcher, &temp)
        .download(&graph(&refs), &options(3))
        .await
        .unwrap();

    assert_eq!(report.verified().count(), 12);
    let peak = fetcher.max_in_flight.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak in-flight {peak} exceeded bound");
    assert!(peak >= 1);
}

#[tokio::test]
async fn test_transient_failures_retried() {
    let temp = TempDir::new().unwrap();
    let fetcher = MockFetcher::new(&[(A, Behavior::Flaky(2, b"a".to_vec()))], Duration::ZERO);

    let report = orchestrator(&fetcher, &temp)
        .download(&graph(&[("One", A, None)]), &options(2))
        .await
        .unwrap();

    assert_eq!(fetcher.calls(A), 3);
    assert!(report.is_success());
}

#[tokio::test]
async fn test_retries_exhausted_is_network_failure() {
    let temp = TempDir::new().unwrap();
    let fetcher = MockFetcher::new(&[(A, Behavior::FailTransient)], Duration::ZERO);

    let report = orchestrator(&fetcher, &temp)
        .download(&graph(&[("One", A, None)]), &options(2))
        .await
        .unwrap();

    assert_eq!(fetcher.calls(A), 3);
    assert_eq!(report.failures[0].kind, FailureKind::Network);
}

#[tokio::test]
async fn test_permanent_failure_continues_with_others() {
    let temp = TempDir::new().unwrap();
    let fetcher = MockFetcher::new(
        &[(A, Behavior::FailPermanent), (B, Behavior::Serve(b"b".to_vec()))],
        Duration::ZERO,
    );

    let report = orchestrator(&fetcher, &temp)
        .download(&graph(&[("One", A, None), ("Two", B, None)]), &options(2))
        .await
        .unwrap();

    assert_eq!(fetcher.calls(A), 1);
    assert!(!report.is_success());
    assert!(!report.cancelled);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, FailureKind::Http);
    assert!(matches!(
        report.tool(&ToolKey::new(A)).unwrap().status,
        DownloadStatus::Failed(_)
    ));
    assert!(report.tool(&ToolKey::new(B)).unwrap().is_verified());
}

#[tokio::test]
async fn test_integrity_mismatch_not_retried_nor_cached() {
    let temp = TempDir::new().unwrap();
    let fetcher = MockFetcher::new(&[(A, Behavior::Serve(b"tampered".to_vec()))], Duration::ZERO);
    let declared = sha256_hex(b"genuine");
    let orch = orchestrator(&fetcher, &temp);

    let report = orch
        .download(&graph(&[("One", A, Some(declared))]), &options(1))
        .await
        .unwrap();

    assert_eq!(fetcher.calls(A), 1);
    assert_eq!(report.failures[0].kind, FailureKind::Integrity);
    assert_eq!(orch.cache().stats().unwrap().blobs, 0);
    assert_eq!(
        std::fs::read_dir(orch.cache().tmp_dir()).unwrap().count(),
        0
    );
}

#[tokio::test]
async fn test_second_run_is_cache_hit() {
    let temp = TempDir::new().unwrap();
    let fetcher = MockFetcher::new(&[(A, Behavior::Serve(b"a".to_vec()))], Duration::ZERO);
    let orch = orchestrator(&fetcher, &temp);
    let g = graph(&[("One", A, None)]);

    orch.download(&g, &options(1)).await.unwrap();
    let second = orch.download(&g, &options(1)).await.unwrap();

    assert_eq!(fetcher.calls(A), 1);
    assert_eq!(second.cache_hits, 1);
    assert_eq!(second.fetches, 0);
    assert!(second.resolved[0].cache_hit);
}

#[tokio::test]
async fn test_corrupt_cache_triggers_redownload() {
    let temp = TempDir::new().unwrap();
    let fetcher = MockFetcher::new(&[(A, Behavior::Serve(b"a".to_vec()))], Duration::ZERO);
    let orch = orchestrator(&fetcher, &temp);
    let g = graph(&[("One", A, None)]);

    let first = orch.download(&g, &options(1)).await.unwrap();
    let blob = first.resolved[0].local_cache_path.clone().unwrap();
    std::fs::write(&blob, b"corrupted").unwrap();

    let second = orch.download(&g, &options(1)).await.unwrap();

    assert_eq!(fetcher.calls(A), 2);
    assert_eq!(second.cache_misses, 1);
    assert!(second.is_success());
    assert_eq!(std::fs::read(&blob).unwrap(), b"a");
}

#[tokio::test]
async fn test_first_download_defines_identity_after_eviction() {
    let temp = TempDir::new().unwrap();
    let g = graph(&[("One", A, None)]);

    let original = MockFetcher::new(&[(A, Behavior::Serve(b"original".to_vec()))], Duration::ZERO);
    let first = orchestrator(&original, &temp)
        .download(&g, &options(1))
        .await
        .unwrap();
    assert_eq!(first.warnings.len(), 1);
    let recorded = sha256_hex(b"original");
    let blob = first.resolved[0].local_cache_path.clone().unwrap();
    std::fs::write(&blob, b"corrupted").unwrap();

    // Upstream now serves different bytes under the same URL.
    let changed = MockFetcher::new(
        &[(A, Behavior::Serve(b"changed upstream".to_vec()))],
        Duration::ZERO,
    );
    let orch = orchestrator(&changed, &temp);
    let second = orch.download(&g, &options(1)).await.unwrap();

    assert_eq!(changed.calls(A), 1);
    assert_eq!(second.failures[0].kind, FailureKind::Integrity);
    assert!(second.warnings.is_empty());
    assert_eq!(orch.cache().entry(A).unwrap().hash, recorded);

    // The same bytes as the first download are accepted again.
    let restored = MockFetcher::new(&[(A, Behavior::Serve(b"original".to_vec()))], Duration::ZERO);
    let third = orchestrator(&restored, &temp)
        .download(&g, &options(1))
        .await
        .unwrap();
    assert!(third.is_success());
    assert!(third.warnings.is_empty());
}

#[tokio::test]
async fn test_online_mode_only_consults_cache() {
    let temp = TempDir::new().unwrap();
    let fetcher = MockFetcher::new(&[(A, Behavior::Serve(b"a".to_vec()))], Duration::ZERO);
    let orch = orchestrator(&fetcher, &temp);
    let g = graph(&[("One", A, None)]);
    let online = DownloadOptions {
        offline_mode: false,
        ..options(1)
    };

    let report = orch.download(&g, &online).await.unwrap();
    assert_eq!(fetcher.total_calls(), 0);
    assert_eq!(report.resolved[0].status, DownloadStatus::Pending);
    assert!(report.is_success());

    orch.download(&g, &options(1)).await.unwrap();
    let report = orch.download(&g, &online).await.unwrap();
    assert!(report.resolved[0].is_verified());
    assert!(report.resolved[0].cache_hit);
}

#[tokio::test]
async fn test_all_or_nothing_cancels_remaining() {
    let temp = TempDir::new().unwrap();
    let mut behaviors = vec![(A, Behavior::FailPermanent)];
    let slow: Vec<String> = (0..5).map(|i| format!("https://example.com/slow{i}")).collect();
    behaviors.extend(
        slow.iter()
            .map(|u| (u.as_str(), Behavior::Serve(b"x".to_vec()))),
    );
    let fetcher = MockFetcher::new(&behaviors, Duration::from_millis(50));
    let mut refs = vec![("Art", A, None)];
    refs.extend(slow.iter().map(|u| ("Art", u.as_str(), None)));
    let opts = DownloadOptions {
        all_or_nothing: true,
        ..options(1)
    };

    let report = orchestrator(&fetcher, &temp)
        .download(&graph(&refs), &opts)
        .await
        .unwrap();

    assert!(!report.is_success());
    assert!(!report.cancelled);
    assert!(
        report
            .failures
            .iter()
            .any(|f| f.kind == FailureKind::Cancelled)
    );
    assert_eq!(report.resolved.len(), 6);
}

#[tokio::test]
async fn test_external_cancellation() {
    let temp = TempDir::new().unwrap();
    let fetcher = MockFetcher::new(&[(A, Behavior::Serve(b"a".to_vec()))], Duration::ZERO);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let opts = DownloadOptions {
        cancellation: cancel,
        ..options(1)
    };

    let orch = orchestrator(&fetcher, &temp);
    let report = orch.download(&graph(&[("One", A, None)]), &opts).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(fetcher.total_calls(), 0);
    assert_eq!(
        report.resolved[0].status,
        DownloadStatus::Failed("cancelled".into())
    );
    assert_eq!(orch.cache().stats().unwrap().blobs, 0);
}

#[tokio::test]
async fn test_racing_runs_share_one_download() {
    let temp = TempDir::new().unwrap();
    let fetcher = MockFetcher::new(&[(A, Behavior::Serve(b"a".to_vec()))], Duration::from_millis(30));
    let cache = Arc::new(ToolCache::open(temp.path().join("cache")).unwrap());
    let first = DownloadOrchestrator::new(fetcher.clone(), Arc::clone(&cache));
    let second = DownloadOrchestrator::new(fetcher.clone(), Arc::clone(&cache));
    let g = graph(&[("One", A, None)]);
    let opts = options(2);

    let (one, two) = tokio::join!(first.download(&g, &opts), second.download(&g, &opts));
    let (one, two) = (one.unwrap(), two.unwrap());

    assert_eq!(fetcher.calls(A), 1);
    assert_eq!(one.cache_hits + two.cache_hits, 1);
    assert!(one.is_success() && two.is_success());
}

#[tokio::test]
async fn test_zero_concurrency_rejected() {
    let temp = TempDir::new().unwrap();
    let fetcher = MockFetcher::new(&[], Duration::ZERO);
    let err = orchestrator(&fetcher, &temp)
        .download(&graph(&[("One", A, None)]), &options(0))
        .await
        .unwrap_err();
    assert!(matches!(err, artools_fetch::Error::Configuration { .. }));
}
