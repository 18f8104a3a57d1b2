//! End-to-end packaging tests: scan a corpus on disk, download through an
//! in-memory fetcher into a real cache, then build and verify packages.

use artools_cache::ToolCache;
use artools_core::{
    Config, DependencyGraph, NameFilter, PackageMode, Platform, RunContext, ScanOptions,
    ScanOutput, sha256_hex,
};
use artools_fetch::{
    DownloadOptions, DownloadOrchestrator, DownloadReport, FetchError, Fetcher, RetryConfig,
};
use artools_package::{
    Error, Manifest, PackageBuilder, PackageRequest, layout::MANIFEST_FILE, verify_package,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const TOOL_A: &str = "https://example.com/bin/toolA";
const TOOL_B: &str = "https://example.com/bin/toolB";

struct MapFetcher {
    bodies: HashMap<String, Vec<u8>>,
}

#[async_trait]
impl Fetcher for MapFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        self.bodies
            .get(url)
            .map(|b| Bytes::from(b.clone()))
            .ok_or_else(|| FetchError::permanent(url, "HTTP 404"))
    }
}

fn body(url: &str) -> Vec<u8> {
    format!("binary for {url}").into_bytes()
}

fn artifact_yaml(name: &str, tools: &[&str]) -> String {
    let mut text = format!("name: {name}\ndescription: Collects things.\ntype: CLIENT\ntools:\n");
    for url in tools {
        let tool = url.rsplit('/').next().unwrap();
        text.push_str(&format!(
            "  - name: {tool}\n    url: {url}\n    expected_hash: {}\n",
            sha256_hex(&body(url))
        ));
    }
    text.push_str("sources:\n  - query: SELECT * FROM info()\n");
    text
}

fn write_corpus(root: &Path, artifacts: &[(&str, &[&str])]) {
    for (name, tools) in artifacts {
        std::fs::write(root.join(format!("{name}.yaml")), artifact_yaml(name, tools)).unwrap();
    }
}

struct Pipeline {
    scan: ScanOutput,
    graph: DependencyGraph,
    report: DownloadReport,
    ctx: RunContext,
}

async fn run_pipeline(corpus: &Path, cache_dir: &Path, served: &[&str], fetch: bool) -> Pipeline {
    run_pinned(corpus, cache_dir, served, fetch, &BTreeMap::new()).await
}

async fn run_pinned(
    corpus: &Path,
    cache_dir: &Path,
    served: &[&str],
    fetch: bool,
    pins: &BTreeMap<String, String>,
) -> Pipeline {
    let mut ctx = RunContext::new(Config::default());
    let (scan, mut graph) =
        artools_core::resolve(corpus, &ScanOptions::default(), &mut ctx).unwrap();
    graph.apply_pins(pins);

    let fetcher = Arc::new(MapFetcher {
        bodies: served.iter().map(|u| ((*u).to_string(), body(u))).collect(),
    });
    let cache = Arc::new(ToolCache::open(cache_dir).unwrap());
    let orchestrator = DownloadOrchestrator::new(fetcher, cache);
    let options = DownloadOptions {
        max_concurrent: 2,
        offline_mode: fetch,
        retry: RetryConfig {
            max_attempts: 1,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            exponential_base: 2.0,
        },
        ..DownloadOptions::default()
    };
    let report = orchestrator.download(&graph, &options).await.unwrap();
    Pipeline {
        scan,
        graph,
        report,
        ctx,
    }
}

fn request<'a>(p: &'a Pipeline, output: PathBuf, mode: PackageMode) -> PackageRequest<'a> {
    PackageRequest {
        artifacts: &p.scan.artifacts,
        graph: &p.graph,
        report: &p.report,
        output,
        platform: Platform::Linux,
        mode,
        filter: NameFilter::all(),
        overwrite: false,
        warnings: p.ctx.warning_messages(),
        errors: p.ctx.errors().to_vec(),
    }
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

fn leftovers(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with(".artools-"))
        .collect()
}

#[tokio::test]
async fn test_offline_package_shares_tools() {
    let corpus = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_corpus(
        corpus.path(),
        &[
            ("Linux.Collect.One", &[TOOL_A]),
            ("Linux.Collect.Two", &[TOOL_A]),
            ("Linux.Collect.Three", &[TOOL_B]),
            ("Windows.Collect.Other", &[TOOL_B]),
        ],
    );
    let p = run_pipeline(corpus.path(), cache.path(), &[TOOL_A, TOOL_B], true).await;
    assert_eq!(p.report.fetches, 2);

    let output = out.path().join("pkg");
    let built = PackageBuilder::build(&request(&p, output.clone(), PackageMode::Offline)).unwrap();

    assert!(built.is_complete());
    assert_eq!(std::fs::read(output.join("tools/toolA")).unwrap(), body(TOOL_A));
    assert_eq!(std::fs::read(output.join("tools/toolB")).unwrap(), body(TOOL_B));
    assert_eq!(std::fs::read_dir(output.join("tools")).unwrap().count(), 2);
    // Windows artifact excluded from a Linux package.
    assert_eq!(std::fs::read_dir(output.join("artifacts")).unwrap().count(), 3);
    assert!(!output.join("artifacts/Windows.Collect.Other.yaml").exists());

    let one = read(&output.join("artifacts/Linux.Collect.One.yaml"));
    assert!(one.contains("url: tools/toolA"));
    assert!(!one.contains(TOOL_A));

    let manifest = Manifest::load(&built.manifest_path).unwrap();
    assert_eq!(manifest.artifacts.len(), 3);
    assert_eq!(manifest.tools.len(), 2);
    assert!(manifest.tools.iter().all(|t| t.is_verified()));
    let tool_a = manifest.tool(TOOL_A).unwrap();
    assert_eq!(tool_a.referenced_by, vec!["Linux.Collect.One", "Linux.Collect.Two"]);
    assert_eq!(tool_a.local_path.as_deref(), Some("tools/toolA"));
    assert_eq!(manifest.package.files.len(), 5);
    assert!(leftovers(out.path()).is_empty());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(output.join("tools/toolA"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}

#[tokio::test]
async fn test_partial_failure_still_packages() {
    let corpus = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let urls: Vec<String> = (1..=5)
        .map(|i| format!("https://example.com/bin/tool{i}"))
        .collect();
    let url_refs: Vec<&str> = urls.iter().map(String::as_str).collect();
    for (i, url) in url_refs.iter().enumerate() {
        let name = format!("Generic.Collect.Tool{i}");
        write_corpus(corpus.path(), &[(name.as_str(), &[*url])]);
    }
    // tool5 is never served.
    let p = run_pipeline(corpus.path(), cache.path(), &url_refs[..4], true).await;
    assert_eq!(p.report.failures.len(), 1);

    let output = out.path().join("pkg");
    let built = PackageBuilder::build(&request(&p, output.clone(), PackageMode::Offline)).unwrap();

    assert_eq!(built.missing_tools, 1);
    assert_eq!(std::fs::read_dir(output.join("tools")).unwrap().count(), 4);
    assert!(!output.join("tools/tool5").exists());
    let failed = built.manifest.tool(url_refs[4]).unwrap();
    assert_eq!(failed.status, "failed");
    assert!(failed.reason.is_some());
    assert!(failed.local_path.is_none());
    // The failed tool keeps its original URL.
    let text = read(&output.join("artifacts/Generic.Collect.Tool4.yaml"));
    assert!(text.contains(url_refs[4]));
}

#[tokio::test]
async fn test_online_package_copies_artifacts_verbatim() {
    let corpus = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_corpus(corpus.path(), &[("Linux.Collect.One", &[TOOL_A])]);
    let p = run_pipeline(corpus.path(), cache.path(), &[TOOL_A], false).await;
    assert_eq!(p.report.fetches, 0);

    let output = out.path().join("pkg");
    let built = PackageBuilder::build(&request(&p, output.clone(), PackageMode::Online)).unwrap();

    assert!(built.is_complete());
    assert!(!output.join("tools").exists());
    assert_eq!(
        read(&output.join("artifacts/Linux.Collect.One.yaml")),
        read(&corpus.path().join("Linux.Collect.One.yaml"))
    );
    assert_eq!(built.manifest.tools[0].status, "pending");
    assert_eq!(built.manifest.package.mode, PackageMode::Online);
}

#[tokio::test]
async fn test_existing_output_requires_overwrite() {
    let corpus = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_corpus(corpus.path(), &[("Linux.Collect.One", &[TOOL_A])]);
    let p = run_pipeline(corpus.path(), cache.path(), &[TOOL_A], true).await;

    let output = out.path().join("pkg");
    std::fs::create_dir(&output).unwrap();
    std::fs::write(output.join("keep.txt"), b"previous").unwrap();

    let err = PackageBuilder::build(&request(&p, output.clone(), PackageMode::Offline)).unwrap_err();
    assert!(matches!(err, Error::OutputExists { .. }));
    assert!(output.join("keep.txt").exists());

    let mut req = request(&p, output.clone(), PackageMode::Offline);
    req.overwrite = true;
    PackageBuilder::build(&req).unwrap();
    assert!(!output.join("keep.txt").exists());
    assert!(output.join(MANIFEST_FILE).exists());
    assert!(leftovers(out.path()).is_empty());
}

#[tokio::test]
async fn test_tampered_cache_aborts_without_partial_package() {
    let corpus = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_corpus(corpus.path(), &[("Linux.Collect.One", &[TOOL_A])]);
    let p = run_pipeline(corpus.path(), cache.path(), &[TOOL_A], true).await;

    let blob = p.report.resolved[0].local_cache_path.clone().unwrap();
    std::fs::write(&blob, b"tampered").unwrap();

    let output = out.path().join("pkg");
    let err = PackageBuilder::build(&request(&p, output.clone(), PackageMode::Offline)).unwrap_err();
    assert!(matches!(err, Error::Integrity { .. }));
    assert!(!output.exists());
    assert!(leftovers(out.path()).is_empty());
}

#[tokio::test]
async fn test_verify_round_trip_and_tampering() {
    let corpus = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_corpus(
        corpus.path(),
        &[("Linux.Collect.One", &[TOOL_A]), ("Linux.Collect.Two", &[TOOL_B])],
    );
    let p = run_pipeline(corpus.path(), cache.path(), &[TOOL_A, TOOL_B], true).await;
    let output = out.path().join("pkg");
    PackageBuilder::build(&request(&p, output.clone(), PackageMode::Offline)).unwrap();

    let clean = verify_package(&output).unwrap();
    assert!(clean.is_clean(), "{clean:?}");
    assert_eq!(clean.files_checked, 4);

    std::fs::write(output.join("tools/toolA"), b"swapped").unwrap();
    std::fs::write(output.join("tools/extra"), b"?").unwrap();
    let report = verify_package(&output).unwrap();
    assert!(!report.is_clean());
    assert_eq!(report.mismatched.len(), 1);
    assert_eq!(report.mismatched[0].path, "tools/toolA");
    assert_eq!(report.unexpected, vec!["tools/extra"]);
    assert_eq!(report.reference_mismatches.len(), 1);
    assert!(report.reference_mismatches[0].contains("tools/toolA"));

    std::fs::remove_file(output.join("tools/toolB")).unwrap();
    let report = verify_package(&output).unwrap();
    assert_eq!(report.missing, vec!["tools/toolB"]);
}

#[tokio::test]
async fn test_verify_rejects_paths_outside_package() {
    let corpus = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_corpus(corpus.path(), &[("Linux.Collect.One", &[TOOL_A])]);
    let p = run_pipeline(corpus.path(), cache.path(), &[TOOL_A], true).await;
    let output = out.path().join("pkg");
    PackageBuilder::build(&request(&p, output.clone(), PackageMode::Offline)).unwrap();

    std::fs::write(out.path().join("secret"), b"outside").unwrap();
    let manifest_path = output.join(MANIFEST_FILE);
    let mut manifest = Manifest::load(&manifest_path).unwrap();
    manifest.package.files[0].path = "../secret".into();
    manifest.write(&manifest_path).unwrap();

    let err = verify_package(&output).unwrap_err();
    assert!(matches!(err, Error::Manifest { .. }), "{err:?}");
    assert!(err.to_string().contains("../secret"));
}

#[tokio::test]
async fn test_rebuild_from_manifest_pins() {
    let corpus = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_corpus(
        corpus.path(),
        &[("Linux.Collect.One", &[TOOL_A]), ("Linux.Collect.Two", &[TOOL_B])],
    );
    let p = run_pipeline(corpus.path(), cache.path(), &[TOOL_A, TOOL_B], true).await;
    let first =
        PackageBuilder::build(&request(&p, out.path().join("first"), PackageMode::Offline))
            .unwrap();

    let pins = Manifest::load(&first.manifest_path).unwrap().pins();
    assert_eq!(pins.len(), 2);

    let second = run_pinned(corpus.path(), cache.path(), &[], true, &pins).await;
    assert_eq!(second.report.cache_hits, 2);
    let rebuilt =
        PackageBuilder::build(&request(&second, out.path().join("second"), PackageMode::Offline))
            .unwrap();

    assert!(first.manifest.selection_matches(&rebuilt.manifest).is_empty());
    assert!(rebuilt.manifest.tools.iter().all(|t| t.cache_hit));
    assert_eq!(rebuilt.manifest.cache.hits, 2);
}
