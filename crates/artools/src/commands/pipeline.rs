//! Scan, resolve, download and package stages as CLI actions.

use super::{ActionResult, Outcome, PackageParams, Selection};
use crate::cli::CliError;
use crate::perf_event;
use artools_cache::ToolCache;
use artools_core::{
    ArtifactDefinition, DependencyGraph, PackageMode, Platform, RunContext, ScanOptions,
    ScanOutput, Scanner, ToolKey,
};
use artools_fetch::{DownloadOptions, DownloadOrchestrator, DownloadReport, HttpFetcher};
use artools_package::{Manifest, PackageBuilder, PackageRequest, verify_package};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Payload of `scan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanData {
    /// Parsed artifacts sorted by name.
    pub artifacts: Vec<ArtifactDefinition>,
    /// Total number of tool references.
    pub tool_references: usize,
}

/// Payload of `package` and `all`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageData {
    /// Package directory.
    pub package_path: PathBuf,
    /// Manifest path.
    pub manifest_path: PathBuf,
    /// Package mode.
    pub mode: PackageMode,
    /// Target platform.
    pub platform: Platform,
    /// Packaged artifacts.
    pub artifacts: usize,
    /// Tools of the selection closure.
    pub tools: usize,
    /// Tools the package could not provide.
    pub missing_tools: usize,
}

fn check_cancelled(ctx: &RunContext, stage: &str) -> Result<(), CliError> {
    if ctx.is_cancelled() {
        Err(CliError::cancelled(stage))
    } else {
        Ok(())
    }
}

fn resolve_graph(
    ctx: &mut RunContext,
    selection: &Selection,
) -> Result<(ScanOutput, DependencyGraph), CliError> {
    let options = ScanOptions::from_config(&ctx.config, selection.filter()?);
    let started = Instant::now();
    let resolved = artools_core::resolve(&selection.artifact_path, &options, ctx)?;
    perf_event!("resolve", started.elapsed());
    check_cancelled(ctx, "resolve")?;
    Ok(resolved)
}

pub(super) fn scan(ctx: &mut RunContext, selection: &Selection) -> Result<Outcome, CliError> {
    let options = ScanOptions::from_config(&ctx.config, selection.filter()?);
    let started = Instant::now();
    let output = Scanner::scan(&selection.artifact_path, &options, ctx)?;
    perf_event!("scan", started.elapsed());

    let tool_references = output.tool_references().count();
    let summary = format!(
        "Scanned {} artifacts with {} tool references ({} warnings)",
        output.artifacts.len(),
        tool_references,
        ctx.warnings().len()
    );
    let data = ScanData {
        artifacts: output.artifacts,
        tool_references,
    };
    Outcome::new(ActionResult::from_context(ctx, data), summary)
}

pub(super) fn resolve(ctx: &mut RunContext, selection: &Selection) -> Result<Outcome, CliError> {
    let (_, graph) = resolve_graph(ctx, selection)?;
    let summary = format!(
        "Resolved {} artifacts referencing {} unique tools",
        graph.artifact_count(),
        graph.tool_count()
    );
    Outcome::new(ActionResult::from_context(ctx, graph), summary)
}

/// Run the orchestrator over `selected` and fold its findings into `ctx`.
async fn fetch_tools(
    ctx: &mut RunContext,
    graph: &DependencyGraph,
    selected: &BTreeSet<ToolKey>,
    offline_mode: bool,
    all_or_nothing: bool,
) -> Result<DownloadReport, CliError> {
    let cache = Arc::new(ToolCache::open(ctx.config.cache_dir())?);
    let fetcher = Arc::new(HttpFetcher::from_config(&ctx.config)?);
    let orchestrator = DownloadOrchestrator::new(fetcher, cache);
    let mut options =
        DownloadOptions::from_config(&ctx.config, offline_mode, ctx.cancellation().clone());
    options.all_or_nothing = all_or_nothing;

    let started = Instant::now();
    let report = orchestrator
        .download_selected(graph, selected, &options)
        .await?;
    perf_event!("download", started.elapsed());

    if report.cancelled {
        return Err(CliError::cancelled("download"));
    }
    for warning in &report.warnings {
        ctx.warn(warning.clone());
    }
    for failure in &report.failures {
        ctx.error(failure.to_string());
    }
    Ok(report)
}

pub(super) async fn download(
    ctx: &mut RunContext,
    selection: &Selection,
    offline_mode: bool,
) -> Result<Outcome, CliError> {
    let (_, graph) = resolve_graph(ctx, selection)?;
    let all: BTreeSet<ToolKey> = graph.tools().map(|t| t.key.clone()).collect();
    let all_or_nothing = ctx.config.all_or_nothing;
    let report = fetch_tools(ctx, &graph, &all, offline_mode, all_or_nothing).await?;

    let summary = format!(
        "{} tools: {} verified, {} failed, {} cache hits, {} fetched",
        report.resolved.len(),
        report.verified().count(),
        report.failures.len(),
        report.cache_hits,
        report.fetches
    );
    Outcome::new(ActionResult::from_context(ctx, report), summary)
}

pub(super) async fn package(
    ctx: &mut RunContext,
    params: &PackageParams,
    all_or_nothing: bool,
) -> Result<Outcome, CliError> {
    let all_or_nothing = all_or_nothing || ctx.config.all_or_nothing;
    let previous = params
        .from_manifest
        .as_deref()
        .map(Manifest::load)
        .transpose()?;
    let (scan, mut graph) = resolve_graph(ctx, &params.selection)?;

    let artifacts: Vec<ArtifactDefinition> = match &previous {
        Some(manifest) => {
            let pinned = graph.apply_pins(&manifest.pins());
            info!(pinned, "Applied hashes from previous manifest");
            for name in &manifest.artifacts {
                if scan.artifact(name).is_none() {
                    ctx.error(format!("artifact '{name}' from the manifest is not in the corpus"));
                }
            }
            scan.artifacts
                .into_iter()
                .filter(|a| manifest.artifacts.binary_search(&a.name).is_ok())
                .collect()
        }
        None => scan.artifacts,
    };
    let platform = params
        .platform
        .or_else(|| previous.as_ref().map(|m| m.package.platform))
        .unwrap_or_default();
    let mode = params
        .mode
        .or_else(|| previous.as_ref().map(|m| m.package.mode))
        .unwrap_or_default();
    let filter = params.selection.filter()?;

    let selected = artifacts
        .iter()
        .filter(|a| filter.matches(&a.name) && platform.selects(&a.name))
        .map(|a| a.name.as_str());
    let closure = graph.closure(selected);

    // Online packages never embed binaries, so only the cache is consulted.
    let report = fetch_tools(ctx, &graph, &closure, mode.embeds_tools(), all_or_nothing).await?;
    if all_or_nothing && !report.failures.is_empty() {
        return Err(CliError::fatal_with_help(
            format!(
                "{} tool(s) failed; no package written in all-or-nothing mode",
                report.failures.len()
            ),
            "Rerun without --all-or-nothing to package the tools that succeeded",
        ));
    }
    check_cancelled(ctx, "package")?;

    let request = PackageRequest {
        artifacts: &artifacts,
        graph: &graph,
        report: &report,
        output: params.output_path.clone(),
        platform,
        mode,
        filter,
        overwrite: params.overwrite,
        warnings: ctx.warning_messages(),
        errors: ctx.errors().to_vec(),
    };
    let started = Instant::now();
    let built = PackageBuilder::build(&request)?;
    perf_event!("package", started.elapsed());

    if let Some(manifest) = &previous {
        for difference in manifest.selection_matches(&built.manifest) {
            warn!(%difference, "Rebuild differs from previous manifest");
        }
    }

    let data = PackageData {
        package_path: built.path.clone(),
        manifest_path: built.manifest_path.clone(),
        mode,
        platform,
        artifacts: built.manifest.artifacts.len(),
        tools: built.manifest.tools.len(),
        missing_tools: built.missing_tools,
    };
    let summary = format!(
        "Wrote {mode} package for {platform} to {} ({} artifacts, {} tools, {} missing)",
        data.package_path.display(),
        data.artifacts,
        data.tools,
        data.missing_tools
    );
    let mut result = ActionResult::from_context(ctx, data);
    result.success &= built.is_complete();
    Outcome::new(result, summary)
}

pub(super) fn verify(package_path: &Path) -> Result<Outcome, CliError> {
    let report = verify_package(package_path)?;
    let mut errors = Vec::new();
    errors.extend(
        report
            .mismatched
            .iter()
            .map(|m| format!("{}: hash mismatch", m.path)),
    );
    errors.extend(report.missing.iter().map(|p| format!("{p}: missing")));
    errors.extend(report.unexpected.iter().map(|p| format!("{p}: not in manifest")));
    errors.extend(
        report
            .reference_mismatches
            .iter()
            .map(|r| format!("{r}: local tool does not match manifest")),
    );

    let summary = if errors.is_empty() {
        format!(
            "Package {} verified: {} files match the manifest",
            package_path.display(),
            report.files_checked
        )
    } else {
        format!(
            "Package {} has {} problem(s)",
            package_path.display(),
            errors.len()
        )
    };
    let result = ActionResult {
        success: errors.is_empty(),
        errors,
        warnings: Vec::new(),
        data: Some(report),
    };
    Outcome::new(result, summary)
}
