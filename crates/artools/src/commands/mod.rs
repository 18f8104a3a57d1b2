//! Typed command contract and dispatch.
//!
//! Every command produces an [`ActionResult`]; the binary turns it into a
//! human summary or a JSON document and picks the exit code from it.

mod cache;
mod pipeline;

pub use pipeline::{PackageData, ScanData};

use crate::cli::{CliError, EXIT_OK, EXIT_PARTIAL};
use artools_core::{Config, NameFilter, PackageMode, Platform, RunContext};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Which artifacts of a corpus a command works on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Directory holding artifact definitions.
    pub artifact_path: PathBuf,
    /// Include globs; empty selects everything.
    pub include: Vec<String>,
    /// Exclude globs; exclusions win.
    pub exclude: Vec<String>,
}

impl Selection {
    /// Compile the include/exclude patterns.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid glob.
    pub fn filter(&self) -> Result<NameFilter, CliError> {
        Ok(NameFilter::new(&self.include, &self.exclude)?)
    }
}

/// Parameters of `Package` and `All`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageParams {
    /// Corpus selection.
    pub selection: Selection,
    /// Package output directory.
    pub output_path: PathBuf,
    /// Target platform; falls back to the manifest's, then `Generic`.
    pub platform: Option<Platform>,
    /// Package mode; falls back to the manifest's, then `Online`.
    pub mode: Option<PackageMode>,
    /// Previous manifest whose selection and hashes are reused.
    pub from_manifest: Option<PathBuf>,
    /// Replace an existing output directory.
    pub overwrite: bool,
}

/// A user-facing action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Scan artifacts for tool references.
    Scan {
        /// Corpus selection.
        selection: Selection,
    },
    /// Build the dependency graph.
    Resolve {
        /// Corpus selection.
        selection: Selection,
    },
    /// Fill the tool cache.
    Download {
        /// Corpus selection.
        selection: Selection,
        /// Override of the configured concurrency.
        max_concurrent: Option<usize>,
        /// Fetch over the network; when false only the cache is consulted.
        offline_mode: bool,
    },
    /// Build a package.
    Package {
        /// Package parameters.
        params: PackageParams,
    },
    /// Full pipeline.
    All {
        /// Package parameters.
        params: PackageParams,
        /// Write nothing if any tool fails.
        all_or_nothing: bool,
    },
    /// Verify a package against its manifest.
    Verify {
        /// Package directory.
        package_path: PathBuf,
    },
    /// Prune the tool cache.
    Prune {
        /// Number of recent builds whose tools are kept.
        keep_generations: u64,
    },
    /// Show cache statistics.
    CacheStats,
}

impl Command {
    /// Command name used in spans and logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Scan { .. } => "scan",
            Self::Resolve { .. } => "resolve",
            Self::Download { .. } => "download",
            Self::Package { .. } => "package",
            Self::All { .. } => "all",
            Self::Verify { .. } => "verify",
            Self::Prune { .. } => "prune",
            Self::CacheStats => "cache-stats",
        }
    }
}

/// Uniform result of every action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult<T> {
    /// Nothing failed.
    pub success: bool,
    /// Non-fatal errors (failed tools, rejected conflicts, mismatches).
    pub errors: Vec<String>,
    /// Warnings recorded during the run.
    pub warnings: Vec<String>,
    /// Command payload.
    pub data: Option<T>,
}

impl<T> ActionResult<T> {
    /// Build a result from the run context; `success` is false when the
    /// context recorded errors.
    #[must_use]
    pub fn from_context(ctx: &RunContext, data: T) -> Self {
        Self {
            success: ctx.errors().is_empty(),
            errors: ctx.errors().to_vec(),
            warnings: ctx.warning_messages(),
            data: Some(data),
        }
    }

    /// A successful result with no warnings.
    #[must_use]
    pub const fn ok(data: T) -> Self {
        Self {
            success: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            data: Some(data),
        }
    }
}

impl<T: Serialize> ActionResult<T> {
    /// Erase the payload type for rendering.
    ///
    /// # Errors
    ///
    /// Returns a fatal error if the payload cannot be serialized.
    pub fn into_value(self) -> Result<ActionResult<serde_json::Value>, CliError> {
        let data = self
            .data
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| CliError::fatal(format!("Failed to serialize result: {e}")))?;
        Ok(ActionResult {
            success: self.success,
            errors: self.errors,
            warnings: self.warnings,
            data,
        })
    }
}

/// Rendered outcome of a command.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// Machine-readable result.
    pub result: ActionResult<serde_json::Value>,
    /// One-paragraph human summary.
    pub summary: String,
}

impl Outcome {
    fn new<T: Serialize>(result: ActionResult<T>, summary: String) -> Result<Self, CliError> {
        Ok(Self {
            result: result.into_value()?,
            summary,
        })
    }

    /// Exit code for a command that produced output.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        if self.result.success {
            EXIT_OK
        } else {
            EXIT_PARTIAL
        }
    }
}

/// Runs commands against one configuration and cancellation token.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    config: Config,
    cancellation: CancellationToken,
}

impl CommandExecutor {
    /// Create an executor.
    #[must_use]
    pub const fn new(config: Config, cancellation: CancellationToken) -> Self {
        Self {
            config,
            cancellation,
        }
    }

    fn context(&self, config: Config) -> RunContext {
        RunContext::new(config).with_cancellation(self.cancellation.clone())
    }

    /// Execute `command`.
    ///
    /// # Errors
    ///
    /// Returns a [`CliError`] when the command cannot produce any output:
    /// invalid configuration, an unreadable corpus, cancellation, or a
    /// package that could not be written.
    pub async fn execute(&self, command: Command) -> Result<Outcome, CliError> {
        let span = crate::command_span!(command.name());
        async move {
            match command {
                Command::Scan { selection } => {
                    let mut ctx = self.context(self.config.clone());
                    pipeline::scan(&mut ctx, &selection)
                }
                Command::Resolve { selection } => {
                    let mut ctx = self.context(self.config.clone());
                    pipeline::resolve(&mut ctx, &selection)
                }
                Command::Download {
                    selection,
                    max_concurrent,
                    offline_mode,
                } => {
                    let mut config = self.config.clone();
                    if let Some(max) = max_concurrent {
                        config = config.with_max_concurrent(max);
                    }
                    config.validate()?;
                    let mut ctx = self.context(config);
                    pipeline::download(&mut ctx, &selection, offline_mode).await
                }
                Command::Package { params } => {
                    let mut ctx = self.context(self.config.clone());
                    pipeline::package(&mut ctx, &params, false).await
                }
                Command::All {
                    params,
                    all_or_nothing,
                } => {
                    let mut ctx = self.context(self.config.clone());
                    pipeline::package(&mut ctx, &params, all_or_nothing).await
                }
                Command::Verify { package_path } => pipeline::verify(&package_path),
                Command::Prune { keep_generations } => cache::prune(&self.config, keep_generations),
                Command::CacheStats => cache::stats(&self.config),
            }
        }
        .instrument(span)
        .await
    }
}
