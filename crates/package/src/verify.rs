//! Re-verify a package on disk against its manifest.

use crate::layout::{ARTIFACTS_DIR, MANIFEST_FILE, TOOLS_DIR};
use crate::manifest::Manifest;
use crate::{Error, Result};
use artools_core::{Config, RunContext, ScanOptions, Scanner, sha256_file};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A file whose content no longer matches the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    /// Package-relative path.
    pub path: String,
    /// Hash recorded in the manifest.
    pub expected: String,
    /// Hash found on disk.
    pub actual: String,
}

/// Outcome of [`verify_package`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyReport {
    /// Files listed in the manifest and re-hashed.
    pub files_checked: usize,
    /// Files whose hash differs from the manifest.
    pub mismatched: Vec<Mismatch>,
    /// Files listed in the manifest but absent.
    pub missing: Vec<String>,
    /// Files present under `artifacts/` or `tools/` but not listed.
    pub unexpected: Vec<String>,
    /// Local tool references whose target does not hash to the tool's
    /// recorded hash.
    pub reference_mismatches: Vec<String>,
}

impl VerifyReport {
    /// Whether the package matches its manifest exactly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.mismatched.is_empty()
            && self.missing.is_empty()
            && self.unexpected.is_empty()
            && self.reference_mismatches.is_empty()
    }
}

/// Verify the package at `dir`.
///
/// Every listed file is re-hashed, `artifacts/` and `tools/` are walked for
/// files the manifest does not know, and the packaged artifacts are scanned
/// again so each local `tools/<file>` reference can be checked against the
/// hash the manifest records for that tool.
///
/// # Errors
///
/// Returns an error if the manifest cannot be loaded, lists a path that
/// leaves the package directory, or the package cannot be read.
pub fn verify_package(dir: &Path) -> Result<VerifyReport> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let manifest = Manifest::load(&manifest_path)?;
    let mut report = VerifyReport::default();

    if let Some(file) = manifest
        .package
        .files
        .iter()
        .find(|f| !is_package_relative(&f.path))
    {
        return Err(Error::Manifest {
            path: manifest_path.into_boxed_path(),
            message: format!("file path '{}' is outside the package", file.path),
        });
    }

    let listed: BTreeMap<&str, &str> = manifest
        .package
        .files
        .iter()
        .map(|f| (f.path.as_str(), f.hash.as_str()))
        .collect();

    for (rel, expected) in &listed {
        let path = dir.join(rel);
        if !path.is_file() {
            report.missing.push((*rel).to_string());
            continue;
        }
        let (actual, _) = sha256_file(&path)?;
        report.files_checked += 1;
        if actual != *expected {
            warn!(path = %rel, "Package file does not match manifest");
            report.mismatched.push(Mismatch {
                path: (*rel).to_string(),
                expected: (*expected).to_string(),
                actual,
            });
        }
    }

    for sub in [ARTIFACTS_DIR, TOOLS_DIR] {
        let root = dir.join(sub);
        if !root.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&root).to_path_buf();
                Error::io(std::io::Error::other(e.to_string()), path, "walk")
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = relative(dir, entry.path());
            if !listed.contains_key(rel.as_str()) {
                report.unexpected.push(rel);
            }
        }
    }

    check_local_references(dir, &manifest, &mut report)?;

    info!(
        path = %dir.display(),
        files = report.files_checked,
        clean = report.is_clean(),
        "Package verified"
    );
    Ok(report)
}

fn check_local_references(dir: &Path, manifest: &Manifest, report: &mut VerifyReport) -> Result<()> {
    let artifacts_dir = dir.join(ARTIFACTS_DIR);
    if !artifacts_dir.is_dir() {
        return Ok(());
    }

    // local path → recorded tool hash
    let recorded: BTreeMap<&str, &str> = manifest
        .tools
        .iter()
        .filter_map(|t| Some((t.local_path.as_deref()?, t.hash.as_deref()?)))
        .collect();
    let files: BTreeMap<&str, &str> = manifest
        .package
        .files
        .iter()
        .map(|f| (f.path.as_str(), f.hash.as_str()))
        .collect();

    let mut ctx = RunContext::new(Config::default());
    let options = ScanOptions {
        legacy_fallback: true,
        ..ScanOptions::default()
    };
    let scan = Scanner::scan(&artifacts_dir, &options, &mut ctx)?;

    let mut checked = BTreeSet::new();
    for artifact in &scan.artifacts {
        for reference in &artifact.tool_references {
            let url = reference.url.trim();
            if !url.starts_with(&format!("{TOOLS_DIR}/")) || !checked.insert(url.to_string()) {
                continue;
            }
            let ok = match (recorded.get(url), files.get(url)) {
                (Some(expected), Some(_)) if is_package_relative(url) => {
                    let path = dir.join(url);
                    path.is_file() && sha256_file(&path)?.0 == *expected
                }
                _ => false,
            };
            if ok {
                debug!(artifact = %artifact.name, path = %url, "Local tool reference verified");
            } else {
                warn!(artifact = %artifact.name, path = %url, "Local tool reference does not match manifest");
                report
                    .reference_mismatches
                    .push(format!("{}: {url}", artifact.name));
            }
        }
    }
    Ok(())
}

/// A non-empty path made of plain components only.
fn is_package_relative(rel: &str) -> bool {
    let path = Path::new(rel);
    path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

fn relative(base: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_relative_paths() {
        assert!(is_package_relative("tools/collector.exe"));
        assert!(is_package_relative("artifacts/Windows.Collect.yaml"));
        assert!(!is_package_relative("../outside"));
        assert!(!is_package_relative("tools/../../etc/passwd"));
        assert!(!is_package_relative("/etc/passwd"));
        assert!(!is_package_relative("./tools/a"));
        assert!(!is_package_relative(""));
    }
}
