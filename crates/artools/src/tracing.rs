//! Log output of the artools CLI
//!
//! Logs always go to stderr so that `--json` output on stdout stays
//! machine-readable. `RUST_LOG` overrides the level chosen with `--level`.

use std::io;
use std::sync::OnceLock;
pub use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Crates whose events `--level` enables.
const LOG_TARGETS: [&str; 5] = [
    "artools",
    "artools_core",
    "artools_cache",
    "artools_fetch",
    "artools_package",
];

/// Log line format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum TracingFormat {
    /// Multi-line output with targets and thread ids
    Pretty,
    /// One line per event
    #[default]
    Compact,
    /// One JSON object per event, with the active spans
    Json,
}

/// `--level` values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    /// Everything, including per-tool cache traces
    Trace,
    /// Per-tool progress
    Debug,
    /// One line per pipeline stage
    Info,
    /// Recorded warnings only
    #[default]
    Warn,
    /// Errors only
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Options for [`init_tracing`].
#[derive(Debug, Clone, Copy)]
pub struct TracingConfig {
    /// Output format.
    pub format: TracingFormat,
    /// Level used when `RUST_LOG` is unset.
    pub level: Level,
}

static CORRELATION_ID: OnceLock<Uuid> = OnceLock::new();

/// Identifier shared by every command span of this process.
pub fn correlation_id() -> Uuid {
    *CORRELATION_ID.get_or_init(Uuid::new_v4)
}

fn level_directive(level: Level) -> String {
    let level = level.as_str().to_lowercase();
    LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if `RUST_LOG` is unusable and the level directive is
/// rejected, or a subscriber is already installed.
pub fn init_tracing(config: TracingConfig) -> miette::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level_directive(config.level)))
        .map_err(|e| miette::miette!("Failed to create tracing filter: {e}"))?;
    let registry = tracing_subscriber::registry().with(env_filter);
    let fmt = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    match config.format {
        TracingFormat::Pretty => registry
            .with(fmt.pretty().with_target(true).with_thread_ids(true))
            .try_init(),
        TracingFormat::Compact => registry.with(fmt.compact().with_target(false)).try_init(),
        TracingFormat::Json => registry
            .with(fmt.json().with_current_span(true).with_span_list(true))
            .try_init(),
    }
    .map_err(|e| miette::miette!("Failed to initialize tracing: {e}"))?;

    tracing::debug!(
        correlation_id = %correlation_id(),
        version = env!("CARGO_PKG_VERSION"),
        format = ?config.format,
        "Tracing initialized"
    );
    Ok(())
}

/// Span wrapping one command, tagged with the correlation id
#[macro_export]
macro_rules! command_span {
    ($command:expr) => {
        tracing::info_span!(
            "command",
            command = %$command,
            correlation_id = %$crate::tracing::correlation_id(),
            start_time = %chrono::Utc::now().to_rfc3339(),
        )
    };
}

/// Debug event with the duration of a pipeline stage
#[macro_export]
macro_rules! perf_event {
    ($stage:expr, $duration:expr) => {
        tracing::debug!(
            stage = %$stage,
            duration_ms = u64::try_from($duration.as_millis()).unwrap_or(u64::MAX),
            "Stage finished"
        );
    };
}
