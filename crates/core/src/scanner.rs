//! Artifact corpus scanner.
//!
//! Walks an artifact directory, parses every matching file and extracts the
//! tool references it declares. Scanning is a pure read: nothing on disk is
//! modified. Malformed files are skipped with a recorded warning so that one
//! broken third-party artifact never aborts a run.

use crate::artifact::{
    ArtifactDefinition, ArtifactDocument, ArtifactKind, ParseMode, ReferenceOrigin,
    ToolReference, name_from_url,
};
use crate::{Config, Error, NameFilter, Result, RunContext, Warning};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[allow(clippy::expect_used)] // static pattern, verified by tests
static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bhttps?://[^\s'"<>`(){}\[\]|,\\]+"#).expect("valid URL regex")
});

#[allow(clippy::expect_used)] // static pattern, verified by tests
static LEGACY_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^name:[ \t]*['"]?([^'"\r\n#]+?)['"]?[ \t]*(?:#.*)?$"#)
        .expect("valid name regex")
});

#[allow(clippy::expect_used)] // static pattern, verified by tests
static LEGACY_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^type:[ \t]*['"]?([A-Za-z_]+)"#).expect("valid type regex")
});

/// Options controlling a scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// File extensions to consider (without the dot, case-insensitive).
    pub extensions: Vec<String>,
    /// Artifact name filter.
    pub filter: NameFilter,
    /// Recover malformed files with the legacy text extractor.
    pub legacy_fallback: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::from_config(&Config::default(), NameFilter::all())
    }
}

impl ScanOptions {
    /// Build scan options from the run configuration.
    #[must_use]
    pub fn from_config(config: &Config, filter: NameFilter) -> Self {
        Self {
            extensions: config
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            filter,
            legacy_fallback: config.legacy_fallback,
        }
    }

    fn accepts_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
    }
}

/// Result of scanning a corpus.
#[derive(Debug, Clone, Default)]
pub struct ScanOutput {
    /// Parsed artifacts, sorted by name.
    pub artifacts: Vec<ArtifactDefinition>,
}

impl ScanOutput {
    /// All tool references across artifacts, in artifact order.
    pub fn tool_references(&self) -> impl Iterator<Item = &ToolReference> {
        self.artifacts.iter().flat_map(|a| a.tool_references.iter())
    }

    /// Look up an artifact by name.
    #[must_use]
    pub fn artifact(&self, name: &str) -> Option<&ArtifactDefinition> {
        self.artifacts
            .binary_search_by(|a| a.name.as_str().cmp(name))
            .ok()
            .map(|idx| &self.artifacts[idx])
    }
}

/// Artifact corpus scanner.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scanner;

impl Scanner {
    /// Scan `root` recursively for artifact definitions.
    ///
    /// # Errors
    ///
    /// Returns an error only when the root itself cannot be read. Problems with
    /// individual files are recorded as warnings on `ctx`.
    pub fn scan(root: &Path, options: &ScanOptions, ctx: &mut RunContext) -> Result<ScanOutput> {
        scan_tree(root, options, ctx)
    }
}

fn scan_tree(root: &Path, options: &ScanOptions, ctx: &mut RunContext) -> Result<ScanOutput> {
    let scan_span = tracing::info_span!("scanner.scan", root = %root.display());
    let _guard = scan_span.enter();

    // Probe the root up front so an unreadable corpus is fatal, not a warning.
    std::fs::read_dir(root).map_err(|e| Error::io(e, root, "read artifact root"))?;

    let mut by_name: BTreeMap<String, ArtifactDefinition> = BTreeMap::new();
    let mut files_seen = 0usize;

    for entry in WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map_or_else(|| root.to_path_buf(), Path::to_path_buf);
                ctx.warn(Warning::Parse {
                    path,
                    message: e.to_string(),
                });
                continue;
            }
        };

        let path = entry.path();
        if !entry.file_type().is_file() || !options.accepts_extension(path) {
            continue;
        }
        files_seen += 1;

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                ctx.warn(Warning::Parse {
                    path: path.to_path_buf(),
                    message: format!("unreadable: {e}"),
                });
                continue;
            }
        };

        let Some(artifact) = parse_artifact(path, text, options, ctx) else {
            continue;
        };

        if !options.filter.matches(&artifact.name) {
            debug!(artifact = %artifact.name, "Excluded by name filter");
            continue;
        }

        if by_name.contains_key(&artifact.name) {
            ctx.warn(Warning::DuplicateArtifact {
                artifact: artifact.name.clone(),
                path: path.to_path_buf(),
            });
            continue;
        }

        debug!(
            artifact = %artifact.name,
            references = artifact.tool_references.len(),
            "Scanned artifact"
        );
        by_name.insert(artifact.name.clone(), artifact);
    }

    let output = ScanOutput {
        artifacts: by_name.into_values().collect(),
    };

    info!(
        files = files_seen,
        artifacts = output.artifacts.len(),
        references = output.tool_references().count(),
        "Artifact scan complete"
    );

    Ok(output)
}

/// Parse one artifact file.
///
/// Returns `None` (after recording a warning) when the file must be skipped.
pub fn parse_artifact(
    path: &Path,
    text: String,
    options: &ScanOptions,
    ctx: &mut RunContext,
) -> Option<ArtifactDefinition> {
    match serde_yaml::from_str::<ArtifactDocument>(&text) {
        Ok(doc) => parse_structured(path, doc, text, ctx),
        Err(e) if options.legacy_fallback => {
            warn!(
                path = %path.display(),
                error = %e,
                "Structured parse failed, using legacy text extraction"
            );
            parse_legacy(path, text, &e.to_string(), ctx)
        }
        Err(e) => {
            ctx.warn(Warning::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            });
            None
        }
    }
}

fn parse_structured(
    path: &Path,
    doc: ArtifactDocument,
    text: String,
    ctx: &mut RunContext,
) -> Option<ArtifactDefinition> {
    let name = doc.name.trim().to_string();
    if name.is_empty() {
        ctx.warn(Warning::Parse {
            path: path.to_path_buf(),
            message: "artifact name is empty".into(),
        });
        return None;
    }

    let kind = match doc.kind.as_deref() {
        None => ArtifactKind::default(),
        Some(raw) => {
            if let Some(kind) = ArtifactKind::parse(raw) {
                kind
            } else {
                ctx.warn(Warning::Parse {
                    path: path.to_path_buf(),
                    message: format!("unknown artifact type '{raw}'"),
                });
                return None;
            }
        }
    };

    let mut references = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    // Structural pass: the tools section is authoritative.
    for decl in &doc.tools {
        let url = decl.url.as_deref().map(str::trim).unwrap_or_default();
        let declared = decl
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());

        if url.is_empty() {
            let reason = match (
                decl.github_project.as_deref(),
                decl.github_asset_regex.as_deref(),
            ) {
                (Some(project), Some(asset)) => format!(
                    "resolved from GitHub project '{project}' (asset /{asset}/) at runtime; no url to fetch"
                ),
                (Some(project), None) => {
                    format!("resolved from GitHub project '{project}' at runtime; no url to fetch")
                }
                (None, _) => "no url declared".to_string(),
            };
            ctx.warn(Warning::UnresolvableReference {
                artifact: name.clone(),
                reference: declared.unwrap_or("<unnamed>").to_string(),
                reason,
            });
            continue;
        }

        let Some(declared_name) = declared
            .map(String::from)
            .or_else(|| name_from_url(url))
        else {
            ctx.warn(Warning::UnresolvableReference {
                artifact: name.clone(),
                reference: url.to_string(),
                reason: "no name declared and none can be inferred from the url".into(),
            });
            continue;
        };

        seen.insert(url.to_string());
        references.push(ToolReference {
            declared_name,
            url: url.to_string(),
            expected_hash: decl
                .expected_hash
                .as_deref()
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(String::from),
            source_artifact: name.clone(),
            origin: ReferenceOrigin::ToolSection,
            version: decl.version.clone(),
            serve_locally: decl.serve_locally,
        });
    }

    // Documentation links are never tools.
    seen.extend(doc.reference.iter().map(|r| r.trim().to_string()));
    if let Some(description) = &doc.description {
        seen.extend(extract_urls(description));
    }

    references.extend(textual_references(&text, &name, &mut seen));

    Some(ArtifactDefinition {
        name,
        description: doc.description.unwrap_or_default(),
        kind,
        tool_references: references,
        source_path: path.to_path_buf(),
        parse_mode: ParseMode::Structured,
        raw_text: text,
    })
}

fn parse_legacy(
    path: &Path,
    text: String,
    parse_error: &str,
    ctx: &mut RunContext,
) -> Option<ArtifactDefinition> {
    let Some(name) = LEGACY_NAME
        .captures(&text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|n| !n.is_empty())
    else {
        ctx.warn(Warning::Parse {
            path: path.to_path_buf(),
            message: format!("{parse_error}; no artifact name recoverable"),
        });
        return None;
    };

    let kind = LEGACY_TYPE
        .captures(&text)
        .and_then(|c| c.get(1))
        .and_then(|m| ArtifactKind::parse(m.as_str()))
        .unwrap_or_default();

    let mut seen = HashSet::new();
    let references = textual_references(&text, &name, &mut seen);

    ctx.warn(Warning::LegacyFallback {
        path: path.to_path_buf(),
        artifact: name.clone(),
    });

    Some(ArtifactDefinition {
        name,
        description: String::new(),
        kind,
        tool_references: references,
        source_path: path.to_path_buf(),
        parse_mode: ParseMode::Legacy,
        raw_text: text,
    })
}

/// Fallback pass: URL-like tokens not already claimed.
fn textual_references(
    text: &str,
    artifact: &str,
    seen: &mut HashSet<String>,
) -> Vec<ToolReference> {
    let mut references = Vec::new();
    for url in extract_urls(text) {
        if seen.contains(&url) {
            continue;
        }
        let Some(declared_name) = name_from_url(&url) else {
            debug!(%url, artifact, "Ignoring URL without a file segment");
            continue;
        };
        seen.insert(url.clone());
        references.push(ToolReference {
            declared_name,
            url,
            expected_hash: None,
            source_artifact: artifact.to_string(),
            origin: ReferenceOrigin::BodyText,
            version: None,
            serve_locally: None,
        });
    }
    references
}

/// Extract URL-like tokens from text, trimming trailing punctuation.
#[must_use]
pub fn extract_urls(text: &str) -> Vec<String> {
    URL_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ';', ':', '!', '?']).to_string())
        .collect()
}

/// Collect artifact files under `root` without parsing them.
///
/// # Errors
///
/// Returns an error if `root` cannot be read.
pub fn artifact_files(root: &Path, options: &ScanOptions) -> Result<Vec<PathBuf>> {
    std::fs::read_dir(root).map_err(|e| Error::io(e, root, "read artifact root"))?;
    Ok(WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file() && options.accepts_extension(e.path()))
        .map(walkdir::DirEntry::into_path)
        .collect())
}
