use crate::commands::{Command, PackageParams, Selection};
use crate::tracing::{LogLevel, TracingFormat};
use artools_core::{Config, PackageMode, Platform};
use clap::{Args, Parser, Subcommand};
use miette::{Diagnostic, Report};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the CLI application
pub const EXIT_OK: i32 = 0;
/// Some tools failed (or verification found mismatches) but output was produced
pub const EXIT_PARTIAL: i32 = 1;
/// Fatal error before any output was produced
pub const EXIT_FATAL: i32 = 2;

/// CLI-specific error types with proper exit code mapping
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum CliError {
    /// Invalid arguments or configuration (exit code 2)
    #[error("Configuration error: {message}")]
    #[diagnostic(code(artools::cli::config))]
    Config {
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
    /// The run could not produce any output (exit code 2)
    #[error("{message}")]
    #[diagnostic(code(artools::cli::fatal))]
    Fatal {
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
    /// The run was interrupted (exit code 2)
    #[error("Cancelled during {stage}")]
    #[diagnostic(
        code(artools::cli::cancelled),
        help("No package was written; completed downloads remain in the cache")
    )]
    Cancelled {
        /// Stage that observed the cancellation
        stage: String,
    },
}

impl CliError {
    /// Create a new configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    /// Create a new fatal error
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            help: None,
        }
    }

    /// Create a new fatal error with help text
    #[must_use]
    pub fn fatal_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create a cancellation error
    #[must_use]
    pub fn cancelled(stage: impl Into<String>) -> Self {
        Self::Cancelled {
            stage: stage.into(),
        }
    }

    /// Keep the message and help text of any diagnostic.
    fn from_diagnostic(err: &dyn Diagnostic) -> Self {
        Self::Fatal {
            message: err.to_string(),
            help: err.help().map(|h| h.to_string()),
        }
    }

    /// Short machine-readable code for the JSON error envelope.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Fatal { .. } => "fatal",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

/// Convert `artools_core::Error` to the matching `CliError` variant.
impl From<artools_core::Error> for CliError {
    fn from(err: artools_core::Error) -> Self {
        match err {
            // Extract just the message to avoid "Configuration error: Configuration error:"
            artools_core::Error::Configuration { message, help } => Self::Config { message, help },
            artools_core::Error::Cancelled { stage } => Self::Cancelled { stage },
            other => Self::from_diagnostic(&other),
        }
    }
}

impl From<artools_cache::Error> for CliError {
    fn from(err: artools_cache::Error) -> Self {
        match err {
            artools_cache::Error::Core(core) => core.into(),
            artools_cache::Error::Configuration { message } => Self::config(message),
            other => Self::from_diagnostic(&other),
        }
    }
}

impl From<artools_fetch::Error> for CliError {
    fn from(err: artools_fetch::Error) -> Self {
        match err {
            artools_fetch::Error::Configuration { message } => Self::config(message),
            artools_fetch::Error::Cache(cache) => cache.into(),
        }
    }
}

impl From<artools_package::Error> for CliError {
    fn from(err: artools_package::Error) -> Self {
        match err {
            artools_package::Error::Core(core) => core.into(),
            other => Self::from_diagnostic(&other),
        }
    }
}

/// Map CLI error to appropriate exit code
#[must_use]
pub const fn exit_code_for(err: &CliError) -> i32 {
    match err {
        CliError::Config { .. } | CliError::Fatal { .. } | CliError::Cancelled { .. } => {
            EXIT_FATAL
        }
    }
}

/// Render error appropriately based on JSON flag
pub fn render_error(err: &CliError, json_mode: bool) {
    if json_mode {
        let error_envelope = ErrorEnvelope::new(serde_json::json!({
            "code": err.code(),
            "message": err.to_string()
        }));

        match serde_json::to_string_pretty(&error_envelope) {
            Ok(json) => println!("{json}"),
            Err(_) => eprintln!("Error serializing error response"),
        }
    } else {
        // Use miette for human-friendly error display
        let report = Report::new(err.clone());
        eprintln!("{report:?}");
        // Ensure output is flushed before potential process exit
        let _ = io::stderr().flush();
    }
}

/// Error response envelope for JSON output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope<E> {
    /// Status indicator - always "error" for failures
    pub status: &'static str,
    /// The error details
    pub error: E,
}

impl<E> ErrorEnvelope<E> {
    /// Create a new error envelope
    #[must_use]
    pub const fn new(error: E) -> Self {
        Self {
            status: "error",
            error,
        }
    }
}

/// Main CLI entry point for artools.
///
/// Resolves the tools referenced by a corpus of forensic artifact
/// definitions and builds online or offline deployment packages.
#[derive(Parser, Debug)]
#[command(name = "artools")]
#[command(about = "Resolve artifact tool dependencies and build offline deployment packages")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Logging verbosity level.
    #[arg(
        short = 'L',
        long,
        global = true,
        help = "Set logging level",
        default_value = "warn",
        value_enum
    )]
    pub level: LogLevel,

    /// Log output format.
    #[arg(
        long,
        global = true,
        help = "Log output format",
        default_value = "compact",
        value_enum
    )]
    pub log_format: TracingFormat,

    /// Emit the result as JSON on stdout.
    #[arg(long, global = true, help = "Emit the result as JSON on stdout")]
    pub json: bool,

    /// Config file (defaults to ./artools.toml when present).
    #[arg(
        long,
        short = 'c',
        global = true,
        value_name = "FILE",
        help = "Config file (defaults to ./artools.toml when present)"
    )]
    pub config: Option<PathBuf>,

    /// Tool cache directory.
    #[arg(
        long,
        global = true,
        env = "ARTOOLS_CACHE_DIR",
        value_name = "DIR",
        help = "Tool cache directory"
    )]
    pub cache_dir: Option<PathBuf>,

    /// Maximum number of concurrent downloads.
    #[arg(
        long,
        global = true,
        env = "ARTOOLS_MAX_CONCURRENT",
        value_name = "N",
        help = "Maximum number of concurrent downloads"
    )]
    pub max_concurrent: Option<usize>,
}

/// Artifact corpus selection shared by most subcommands.
#[derive(Args, Debug, Clone)]
pub struct SelectionArgs {
    /// Directory holding artifact definitions.
    #[arg(
        long = "artifacts",
        short = 'a',
        value_name = "DIR",
        default_value = ".",
        help = "Directory holding artifact definitions"
    )]
    pub artifact_path: PathBuf,
    /// Only artifacts matching this glob (repeatable).
    #[arg(
        long = "include",
        short = 'i',
        value_name = "GLOB",
        action = clap::ArgAction::Append,
        help = "Only artifacts matching this glob (repeatable)"
    )]
    pub include: Vec<String>,
    /// Skip artifacts matching this glob (repeatable).
    #[arg(
        long = "exclude",
        short = 'x',
        value_name = "GLOB",
        action = clap::ArgAction::Append,
        help = "Skip artifacts matching this glob (repeatable)"
    )]
    pub exclude: Vec<String>,
}

impl From<SelectionArgs> for Selection {
    fn from(args: SelectionArgs) -> Self {
        Self {
            artifact_path: args.artifact_path,
            include: args.include,
            exclude: args.exclude,
        }
    }
}

/// Arguments of `package` and `all`.
#[derive(Args, Debug, Clone)]
pub struct PackageArgs {
    /// Corpus selection.
    #[command(flatten)]
    pub selection: SelectionArgs,
    /// Output directory of the package.
    #[arg(long = "output", short = 'o', value_name = "DIR", help = "Output directory")]
    pub output_path: PathBuf,
    /// Target platform (windows, linux, macos, generic).
    #[arg(long, help = "Target platform (windows, linux, macos, generic)")]
    pub platform: Option<Platform>,
    /// Package mode (online, offline).
    #[arg(long, help = "Package mode (online, offline)")]
    pub mode: Option<PackageMode>,
    /// Reuse the selection and pinned hashes of a previous manifest.
    #[arg(
        long,
        value_name = "FILE",
        help = "Reuse the selection and pinned hashes of a previous manifest"
    )]
    pub from_manifest: Option<PathBuf>,
    /// Replace an existing output directory.
    #[arg(long, help = "Replace an existing output directory")]
    pub overwrite: bool,
}

impl From<PackageArgs> for PackageParams {
    fn from(args: PackageArgs) -> Self {
        Self {
            selection: args.selection.into(),
            output_path: args.output_path,
            platform: args.platform,
            mode: args.mode,
            from_manifest: args.from_manifest,
            overwrite: args.overwrite,
        }
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan artifacts and list their tool references.
    #[command(about = "Scan artifacts and list their tool references")]
    Scan {
        /// Corpus selection.
        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// Build the artifact/tool dependency graph.
    #[command(about = "Build the artifact/tool dependency graph")]
    Resolve {
        /// Corpus selection.
        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// Download and verify every referenced tool into the cache.
    #[command(about = "Download and verify every referenced tool into the cache")]
    Download {
        /// Corpus selection.
        #[command(flatten)]
        selection: SelectionArgs,
        /// Only consult the cache; never fetch over the network.
        #[arg(long, help = "Only consult the cache; never fetch over the network")]
        cache_only: bool,
    },
    /// Build an online or offline package.
    #[command(about = "Build an online or offline package")]
    Package(PackageArgs),
    /// Run the full pipeline: scan, resolve, download and package.
    #[command(about = "Run the full pipeline: scan, resolve, download and package")]
    All {
        /// Package arguments.
        #[command(flatten)]
        package: PackageArgs,
        /// Abort without writing a package at the first tool failure.
        #[arg(long, help = "Abort without writing a package at the first tool failure")]
        all_or_nothing: bool,
    },
    /// Verify a package against its manifest.
    #[command(about = "Verify a package against its manifest")]
    Verify {
        /// Package directory.
        #[arg(value_name = "PACKAGE")]
        package_path: PathBuf,
    },
    /// Tool cache maintenance.
    #[command(about = "Tool cache maintenance")]
    Cache {
        /// Cache subcommand to execute.
        #[command(subcommand)]
        subcommand: CacheCommands,
    },
}

/// Cache subcommands.
#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show cache statistics.
    #[command(about = "Show cache statistics")]
    Stats,
    /// Remove tools unused by recent builds.
    #[command(about = "Remove tools unused by recent builds")]
    Prune {
        /// Number of most recent builds whose tools are kept.
        #[arg(
            long = "keep",
            default_value_t = 3,
            help = "Number of most recent builds whose tools are kept"
        )]
        keep_generations: u64,
    },
}

impl Cli {
    /// Load the configuration file and apply flag and environment overrides.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unreadable or invalid config.
    pub fn load_config(&self) -> Result<Config, CliError> {
        let cwd = std::env::current_dir()
            .map_err(|e| CliError::config(format!("Cannot determine working directory: {e}")))?;
        let mut config = Config::discover(self.config.as_deref(), &cwd)?;
        if let Some(dir) = &self.cache_dir {
            config = config.with_cache_dir(dir.clone());
        }
        if let Some(max) = self.max_concurrent {
            config = config.with_max_concurrent(max);
        }
        config.validate()?;
        Ok(config)
    }

    /// Convert parsed arguments into the typed command contract.
    #[must_use]
    pub fn into_command(self) -> Command {
        match self.command {
            Commands::Scan { selection } => Command::Scan {
                selection: selection.into(),
            },
            Commands::Resolve { selection } => Command::Resolve {
                selection: selection.into(),
            },
            Commands::Download {
                selection,
                cache_only,
            } => Command::Download {
                selection: selection.into(),
                max_concurrent: self.max_concurrent,
                offline_mode: !cache_only,
            },
            Commands::Package(args) => Command::Package {
                params: args.into(),
            },
            Commands::All {
                package,
                all_or_nothing,
            } => Command::All {
                params: package.into(),
                all_or_nothing,
            },
            Commands::Verify { package_path } => Command::Verify { package_path },
            Commands::Cache { subcommand } => match subcommand {
                CacheCommands::Stats => Command::CacheStats,
                CacheCommands::Prune { keep_generations } => Command::Prune { keep_generations },
            },
        }
    }
}

/// Parse command line arguments.
#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}
