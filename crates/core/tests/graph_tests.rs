//! Dedup and idempotence of the scan → normalize → graph pipeline.

use artools_core::{
    Config, ConflictPolicy, Error, RunContext, ScanOptions, ToolKey, resolve,
};
use std::path::Path;
use tempfile::TempDir;

const HASH_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const HASH_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

fn write_artifact(root: &Path, name: &str, tools: &[(&str, &str, Option<&str>)]) {
    let mut yaml = format!("name: {name}\n");
    yaml.push_str(if tools.is_empty() { "tools: []\n" } else { "tools:\n" });
    for (tool, url, hash) in tools {
        yaml.push_str(&format!("  - name: {tool}\n    url: {url}\n"));
        if let Some(hash) = hash {
            yaml.push_str(&format!("    expected_hash: {hash}\n"));
        }
    }
    yaml.push_str("sources:\n  - query: SELECT * FROM info()\n");
    std::fs::write(root.join(format!("{name}.yaml")), yaml).unwrap();
}

fn corpus_aab(root: &Path) {
    write_artifact(root, "Linux.One", &[("A", "https://example.com/A", None)]);
    write_artifact(root, "Linux.Two", &[("A", "HTTPS://EXAMPLE.com/A#x", None)]);
    write_artifact(root, "Linux.Three", &[("B", "https://example.com/B", None)]);
}

#[test]
fn test_aab_corpus_has_two_tool_nodes() {
    let temp = TempDir::new().unwrap();
    corpus_aab(temp.path());

    let mut ctx = RunContext::default();
    let (scan, graph) = resolve(temp.path(), &ScanOptions::default(), &mut ctx).unwrap();

    assert_eq!(scan.artifacts.len(), 3);
    assert_eq!(graph.artifact_count(), 3);
    assert_eq!(graph.tool_count(), 2);
    let a = graph
        .artifacts_for(&ToolKey::new("https://example.com/A"))
        .unwrap();
    assert_eq!(a.len(), 2);
}

#[test]
fn test_dedup_many_artifacts_one_tool() {
    let temp = TempDir::new().unwrap();
    for i in 0..10 {
        write_artifact(
            temp.path(),
            &format!("Generic.Art{i}"),
            &[("shared", "https://example.com/shared.exe", None)],
        );
    }

    let mut ctx = RunContext::default();
    let (_, graph) = resolve(temp.path(), &ScanOptions::default(), &mut ctx).unwrap();

    assert_eq!(graph.tool_count(), 1);
    assert_eq!(graph.tools().next().unwrap().referenced_by.len(), 10);
}

#[test]
fn test_resolve_twice_is_byte_identical() {
    let temp = TempDir::new().unwrap();
    corpus_aab(temp.path());
    write_artifact(temp.path(), "Windows.Empty", &[]);

    let first = {
        let mut ctx = RunContext::default();
        let (_, graph) = resolve(temp.path(), &ScanOptions::default(), &mut ctx).unwrap();
        graph.to_canonical_json().unwrap()
    };
    let second = {
        let mut ctx = RunContext::default();
        let (_, graph) = resolve(temp.path(), &ScanOptions::default(), &mut ctx).unwrap();
        graph.to_canonical_json().unwrap()
    };

    assert_eq!(first, second);
    assert!(first.contains("Windows.Empty"));
}

#[test]
fn test_strict_policy_rejects_conflicts() {
    let temp = TempDir::new().unwrap();
    write_artifact(temp.path(), "Generic.A", &[("t", "https://x/t", Some(HASH_A))]);
    write_artifact(temp.path(), "Generic.B", &[("t", "https://x/t", Some(HASH_B))]);

    let config = Config {
        conflict_policy: ConflictPolicy::Strict,
        ..Config::default()
    };
    let mut ctx = RunContext::new(config);
    let err = resolve(temp.path(), &ScanOptions::default(), &mut ctx).unwrap_err();
    assert!(matches!(err, Error::Conflicts { count: 1 }));

    let mut ctx = RunContext::default();
    let (_, graph) = resolve(temp.path(), &ScanOptions::default(), &mut ctx).unwrap();
    assert_eq!(
        graph.tools().next().unwrap().expected_hash.as_deref(),
        Some(HASH_A)
    );
    assert_eq!(ctx.warnings().len(), 1);
}
