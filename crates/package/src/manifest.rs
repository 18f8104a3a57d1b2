//! Package manifest: the audit and reproducibility record of a build.
//!
//! The manifest lists the selected artifacts, every tool of their closure
//! with its resolution status, the dependency graph restricted to the
//! selection, cache statistics, and the exact file list of the package with
//! hashes. All collections are sorted so that the same build state always
//! serializes the same way (apart from `generatedAt`).

use crate::{Error, Result};
use artools_core::{PackageMode, Platform};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Current manifest format.
pub const FORMAT_VERSION: u32 = 1;

/// Program that produced the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generator {
    /// Program name.
    pub name: String,
    /// Program version.
    pub version: String,
}

impl Default for Generator {
    fn default() -> Self {
        Self {
            name: "artools".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// One tool of the package closure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestTool {
    /// Canonical URL.
    pub url: String,
    /// Tool name.
    pub name: String,
    /// Verified (or declared) SHA-256.
    pub hash: Option<String>,
    /// `verified`, `failed` or `pending`.
    pub status: String,
    /// Failure reason.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
    /// Size in bytes, once verified.
    pub size_bytes: Option<u64>,
    /// Served from the cache.
    pub cache_hit: bool,
    /// Package-relative path when embedded.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub local_path: Option<String>,
    /// Artifacts referencing the tool.
    pub referenced_by: Vec<String>,
}

impl ManifestTool {
    /// Whether the tool was verified.
    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.status == "verified"
    }
}

/// Dependency graph restricted to the package selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestGraph {
    /// Artifact name → tool URLs.
    pub artifacts: BTreeMap<String, Vec<String>>,
    /// Tool URL → artifact names.
    pub tools: BTreeMap<String, Vec<String>>,
}

/// Cache statistics of the build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheCounts {
    /// Tools served from the cache.
    pub hits: usize,
    /// Tools not in the cache.
    pub misses: usize,
}

/// One file of the package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageFile {
    /// Package-relative path with `/` separators.
    pub path: String,
    /// SHA-256 of the file.
    pub hash: String,
    /// Size in bytes.
    pub size: u64,
}

/// Package description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSection {
    /// Online or Offline.
    pub mode: PackageMode,
    /// Target platform.
    pub platform: Platform,
    /// Files sorted by path (the manifest itself excluded).
    pub files: Vec<PackageFile>,
}

/// Serialized build record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Manifest format version.
    pub format_version: u32,
    /// Producing program.
    pub generator: Generator,
    /// Build time.
    pub generated_at: DateTime<Utc>,
    /// Selected artifact names, sorted.
    pub artifacts: Vec<String>,
    /// Tool closure, sorted by URL.
    pub tools: Vec<ManifestTool>,
    /// Graph restricted to the selection.
    pub graph: ManifestGraph,
    /// Cache statistics.
    pub cache: CacheCounts,
    /// Package contents.
    pub package: PackageSection,
    /// All warnings of the run.
    pub warnings: Vec<String>,
    /// All errors of the run.
    pub errors: Vec<String>,
}

impl Manifest {
    /// Load a manifest from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable or not a supported manifest.
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| Error::io(e, path, "read manifest"))?;
        let manifest: Self = serde_json::from_str(&content).map_err(|e| Error::Manifest {
            path: path.into(),
            message: e.to_string(),
        })?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(Error::Manifest {
                path: path.into(),
                message: format!(
                    "unsupported format version {} (expected {FORMAT_VERSION})",
                    manifest.format_version
                ),
            });
        }
        Ok(manifest)
    }

    /// Pretty-printed JSON with a trailing newline.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        let mut json =
            serde_json::to_string_pretty(self).map_err(|e| Error::serialization(e.to_string()))?;
        json.push('\n');
        Ok(json)
    }

    /// Write the manifest to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails.
    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?).map_err(|e| Error::io(e, path, "write manifest"))
    }

    /// Tool entry by canonical URL.
    #[must_use]
    pub fn tool(&self, url: &str) -> Option<&ManifestTool> {
        self.tools.iter().find(|t| t.url == url)
    }

    /// Canonical URL → verified hash, for reproducible rebuilds.
    #[must_use]
    pub fn pins(&self) -> BTreeMap<String, String> {
        self.tools
            .iter()
            .filter(|t| t.is_verified())
            .filter_map(|t| t.hash.clone().map(|h| (t.url.clone(), h)))
            .collect()
    }

    /// Differences in selection and tool status between two manifests.
    ///
    /// Compares the artifact list and each tool's (url, status, hash).
    /// An empty result means the selection was reproduced.
    #[must_use]
    pub fn selection_matches(&self, other: &Self) -> Vec<String> {
        let mut differences = Vec::new();
        if self.artifacts != other.artifacts {
            differences.push(format!(
                "artifact selection differs: {} vs {} artifacts",
                self.artifacts.len(),
                other.artifacts.len()
            ));
        }

        let ours: BTreeMap<&str, &ManifestTool> =
            self.tools.iter().map(|t| (t.url.as_str(), t)).collect();
        let theirs: BTreeMap<&str, &ManifestTool> =
            other.tools.iter().map(|t| (t.url.as_str(), t)).collect();

        for (url, tool) in &ours {
            match theirs.get(url) {
                None => differences.push(format!("tool {url} missing from other manifest")),
                Some(other) if other.status != tool.status => differences.push(format!(
                    "tool {url} status differs: {} vs {}",
                    tool.status, other.status
                )),
                Some(other) if other.hash != tool.hash => {
                    differences.push(format!("tool {url} hash differs"));
                }
                Some(_) => {}
            }
        }
        for url in theirs.keys().filter(|url| !ours.contains_key(*url)) {
            differences.push(format!("tool {url} only in other manifest"));
        }
        differences
    }
}
