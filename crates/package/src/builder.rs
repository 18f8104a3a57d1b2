//! Assemble online and offline packages.
//!
//! A package is built in a sibling staging directory and renamed into place
//! only once every file has been written and hashed, so an interrupted or
//! failed build never leaves a partial package at the output path.

use crate::layout::{
    ARTIFACTS_DIR, MANIFEST_FILE, TOOLS_DIR, assign_unique_names, local_tool_path, replace_url,
};
use crate::manifest::{
    CacheCounts, FORMAT_VERSION, Generator, Manifest, ManifestGraph, ManifestTool, PackageFile,
    PackageSection,
};
use crate::{Error, Result};
use artools_core::{
    ArtifactDefinition, DependencyGraph, NameFilter, PackageMode, Platform, ToolKey,
    canonicalize_url, sha256_hex,
};
use artools_fetch::{DownloadReport, DownloadStatus};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const STAGING_PREFIX: &str = ".artools-staging-";
const BACKUP_PREFIX: &str = ".artools-previous-";

/// Everything needed to build one package.
#[derive(Debug)]
pub struct PackageRequest<'a> {
    /// All scanned artifacts.
    pub artifacts: &'a [ArtifactDefinition],
    /// Dependency graph of the scanned artifacts.
    pub graph: &'a DependencyGraph,
    /// Result of the download stage.
    pub report: &'a DownloadReport,
    /// Output directory.
    pub output: PathBuf,
    /// Target platform.
    pub platform: Platform,
    /// Online or Offline.
    pub mode: PackageMode,
    /// Include/exclude name filter.
    pub filter: NameFilter,
    /// Replace an existing output directory.
    pub overwrite: bool,
    /// Run warnings embedded in the manifest.
    pub warnings: Vec<String>,
    /// Run errors embedded in the manifest.
    pub errors: Vec<String>,
}

/// A package that has been renamed into place.
#[derive(Debug, Clone)]
pub struct BuiltPackage {
    /// Package directory.
    pub path: PathBuf,
    /// Path of `manifest.json`.
    pub manifest_path: PathBuf,
    /// The manifest as written.
    pub manifest: Manifest,
    /// Closure tools the package could not provide.
    pub missing_tools: usize,
}

impl BuiltPackage {
    /// Whether every tool the mode needed is present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing_tools == 0
    }
}

/// Package assembler.
pub struct PackageBuilder;

impl PackageBuilder {
    /// Build the package described by `request`.
    ///
    /// Tools that failed (or, in Offline mode, were never verified) are left
    /// out and counted in [`BuiltPackage::missing_tools`]; their URLs stay
    /// untouched in the artifact text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutputExists`] if the output exists and `overwrite`
    /// is not set, [`Error::Integrity`] if a cached tool no longer matches its
    /// verified hash, or an I/O error. No package is left behind on error.
    pub fn build(request: &PackageRequest<'_>) -> Result<BuiltPackage> {
        let output = request.output.clone();
        if output.exists() && !request.overwrite {
            return Err(Error::OutputExists {
                path: output.into(),
            });
        }
        let parent = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(|e| Error::io(e, &parent, "create"))?;

        let selected = select_artifacts(request);
        let closure = request
            .graph
            .closure(selected.iter().map(|a| a.name.as_str()));
        info!(
            artifacts = selected.len(),
            tools = closure.len(),
            mode = %request.mode,
            platform = %request.platform,
            output = %output.display(),
            "Building package"
        );

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&parent)
            .map_err(|e| Error::io(e, &parent, "create staging directory"))?;

        let mut files = Vec::new();
        let (tool_files, missing_tools) = if request.mode.embeds_tools() {
            write_tools(request, &closure, staging.path(), &mut files)?
        } else {
            let failed = closure
                .iter()
                .filter(|key| {
                    request
                        .report
                        .tool(key)
                        .is_some_and(|t| matches!(t.status, DownloadStatus::Failed(_)))
                })
                .count();
            (BTreeMap::new(), failed)
        };
        write_artifacts(request, &selected, &tool_files, staging.path(), &mut files)?;
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let manifest = build_manifest(request, &selected, &closure, &tool_files, files);
        manifest.write(&staging.path().join(MANIFEST_FILE))?;

        install(staging, &output, &parent)?;

        info!(
            output = %output.display(),
            files = manifest.package.files.len(),
            missing_tools,
            "Package written"
        );
        Ok(BuiltPackage {
            manifest_path: output.join(MANIFEST_FILE),
            path: output,
            manifest,
            missing_tools,
        })
    }
}

fn select_artifacts<'a>(request: &PackageRequest<'a>) -> Vec<&'a ArtifactDefinition> {
    let mut selected: Vec<&ArtifactDefinition> = request
        .artifacts
        .iter()
        .filter(|a| request.filter.matches(&a.name) && request.platform.selects(&a.name))
        .collect();
    selected.sort_by(|a, b| a.name.cmp(&b.name));
    selected
}

/// Copy verified closure tools into `tools/`. Returns key → file name and the
/// number of tools that could not be embedded.
fn write_tools(
    request: &PackageRequest<'_>,
    closure: &BTreeSet<ToolKey>,
    staging: &Path,
    files: &mut Vec<PackageFile>,
) -> Result<(BTreeMap<String, String>, usize)> {
    let mut embeddable = Vec::new();
    let mut missing = 0;
    for key in closure {
        match request.report.tool(key) {
            Some(tool) if tool.is_verified() => match (&tool.local_cache_path, &tool.content_hash) {
                (Some(path), Some(hash)) => embeddable.push((key, tool.name.as_str(), path, hash)),
                _ => missing += 1,
            },
            Some(tool) => {
                debug!(url = %key, status = tool.status.label(), "Tool not embedded");
                missing += 1;
            }
            None => {
                debug!(url = %key, "Tool absent from download report");
                missing += 1;
            }
        }
    }

    let names = assign_unique_names(embeddable.iter().map(|(key, name, _, _)| (key.as_str(), *name)));
    let tools_dir = staging.join(TOOLS_DIR);
    if !embeddable.is_empty() {
        std::fs::create_dir_all(&tools_dir).map_err(|e| Error::io(e, &tools_dir, "create"))?;
    }

    let mut tool_files = BTreeMap::new();
    for (key, _, source, expected) in embeddable {
        let Some(file_name) = names.get(key.as_str()) else {
            continue;
        };
        let dest = tools_dir.join(file_name);
        let (actual, size) = copy_hashed(source, &dest)?;
        if &actual != expected {
            return Err(Error::Integrity {
                path: source.as_path().into(),
                expected: expected.clone(),
                actual,
            });
        }
        set_executable(&dest)?;
        debug!(url = %key, file = %file_name, size, "Embedded tool");
        files.push(PackageFile {
            path: local_tool_path(file_name),
            hash: actual,
            size,
        });
        tool_files.insert(key.as_str().to_string(), file_name.clone());
    }
    if missing > 0 {
        warn!(missing, "Some tools are not embedded in the offline package");
    }
    Ok((tool_files, missing))
}

/// Write selected artifacts, rewriting embedded tool URLs to local paths.
fn write_artifacts(
    request: &PackageRequest<'_>,
    selected: &[&ArtifactDefinition],
    tool_files: &BTreeMap<String, String>,
    staging: &Path,
    files: &mut Vec<PackageFile>,
) -> Result<()> {
    let artifacts_dir = staging.join(ARTIFACTS_DIR);
    std::fs::create_dir_all(&artifacts_dir).map_err(|e| Error::io(e, &artifacts_dir, "create"))?;

    let preferred: Vec<(String, String)> = selected
        .iter()
        .map(|a| (a.name.clone(), format!("{}.yaml", a.name)))
        .collect();
    let names = assign_unique_names(preferred.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    for artifact in selected {
        let Some(file_name) = names.get(&artifact.name) else {
            continue;
        };
        let text = if request.mode.embeds_tools() {
            rewrite_references(artifact, tool_files)
        } else {
            artifact.raw_text.clone()
        };
        let dest = artifacts_dir.join(file_name);
        std::fs::write(&dest, text.as_bytes()).map_err(|e| Error::io(e, &dest, "write"))?;
        files.push(PackageFile {
            path: format!("{ARTIFACTS_DIR}/{file_name}"),
            hash: sha256_hex(text.as_bytes()),
            size: text.len() as u64,
        });
    }
    Ok(())
}

fn rewrite_references(artifact: &ArtifactDefinition, tool_files: &BTreeMap<String, String>) -> String {
    let mut text = artifact.raw_text.clone();
    let mut seen = BTreeSet::new();
    for reference in &artifact.tool_references {
        if !seen.insert(reference.url.as_str()) {
            continue;
        }
        let Ok(key) = canonicalize_url(&reference.url) else {
            continue;
        };
        if let Some(file_name) = tool_files.get(&key) {
            text = replace_url(&text, &reference.url, &local_tool_path(file_name));
        }
    }
    text
}

fn build_manifest(
    request: &PackageRequest<'_>,
    selected: &[&ArtifactDefinition],
    closure: &BTreeSet<ToolKey>,
    tool_files: &BTreeMap<String, String>,
    files: Vec<PackageFile>,
) -> Manifest {
    let selected_names: BTreeSet<&str> = selected.iter().map(|a| a.name.as_str()).collect();

    let mut graph = ManifestGraph::default();
    for name in &selected_names {
        let urls = request
            .graph
            .tools_for(name)
            .map(|keys| keys.iter().map(|k| k.as_str().to_string()).collect())
            .unwrap_or_default();
        graph.artifacts.insert((*name).to_string(), urls);
    }

    let mut tools = Vec::with_capacity(closure.len());
    let mut cache = CacheCounts::default();
    for key in closure {
        let referenced_by: Vec<String> = request
            .graph
            .artifacts_for(key)
            .map(|names| {
                names
                    .iter()
                    .filter(|n| selected_names.contains(n.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        graph
            .tools
            .insert(key.as_str().to_string(), referenced_by.clone());

        let entry = if let Some(tool) = request.report.tool(key) {
            if tool.cache_hit {
                cache.hits += 1;
            } else {
                cache.misses += 1;
            }
            ManifestTool {
                url: key.as_str().to_string(),
                name: tool.name.clone(),
                hash: tool.content_hash.clone(),
                status: tool.status.label().to_string(),
                reason: tool.status.reason().map(String::from),
                size_bytes: tool.size_bytes,
                cache_hit: tool.cache_hit,
                local_path: tool_files.get(key.as_str()).map(|f| local_tool_path(f)),
                referenced_by,
            }
        } else {
            cache.misses += 1;
            let node = request.graph.tool(key);
            ManifestTool {
                url: key.as_str().to_string(),
                name: node.map(|n| n.name.clone()).unwrap_or_default(),
                hash: node.and_then(|n| n.expected_hash.clone()),
                status: DownloadStatus::Pending.label().to_string(),
                reason: None,
                size_bytes: None,
                cache_hit: false,
                local_path: None,
                referenced_by,
            }
        };
        tools.push(entry);
    }

    Manifest {
        format_version: FORMAT_VERSION,
        generator: Generator::default(),
        generated_at: Utc::now(),
        artifacts: selected_names.iter().map(|n| (*n).to_string()).collect(),
        tools,
        graph,
        cache,
        package: PackageSection {
            mode: request.mode,
            platform: request.platform,
            files,
        },
        warnings: request.warnings.clone(),
        errors: request.errors.clone(),
    }
}

/// Copy `source` to `dest`, hashing the bytes as they are written.
fn copy_hashed(source: &Path, dest: &Path) -> Result<(String, u64)> {
    let mut reader = std::fs::File::open(source).map_err(|e| Error::io(e, source, "open"))?;
    let mut writer = std::fs::File::create(dest).map_err(|e| Error::io(e, dest, "create"))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    let mut size = 0u64;

    loop {
        let n = reader
            .read(&mut buffer)
            .map_err(|e| Error::io(e, source, "read"))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        writer
            .write_all(&buffer[..n])
            .map_err(|e| Error::io(e, dest, "write"))?;
        size += n as u64;
    }
    writer.sync_all().map_err(|e| Error::io(e, dest, "sync"))?;

    Ok((hex::encode(hasher.finalize()), size))
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(|e| Error::io(e, path, "chmod"))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Move the staging directory to `output`, replacing any previous package.
fn install(staging: tempfile::TempDir, output: &Path, parent: &Path) -> Result<()> {
    let backup = if output.exists() {
        let holder = tempfile::Builder::new()
            .prefix(BACKUP_PREFIX)
            .tempdir_in(parent)
            .map_err(|e| Error::io(e, parent, "create backup directory"))?;
        let previous = holder.path().join("package");
        std::fs::rename(output, &previous).map_err(|e| Error::io(e, output, "rename"))?;
        debug!(output = %output.display(), "Moved previous package aside");
        Some((holder, previous))
    } else {
        None
    };

    if let Err(e) = std::fs::rename(staging.path(), output) {
        if let Some((_, previous)) = &backup {
            if let Err(restore) = std::fs::rename(previous, output) {
                warn!(error = %restore, output = %output.display(), "Failed to restore previous package");
            }
        }
        return Err(Error::io(e, output, "rename"));
    }
    // The directory now lives at `output`; stop the guard from removing it.
    let _ = staging.keep();
    // Dropping the holder deletes the previous package.
    drop(backup);
    Ok(())
}
