//! Run configuration.
//!
//! Loaded from an optional `artools.toml`, then overridden by command-line
//! flags and environment variables in the binary.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "artools.toml";

/// Default number of concurrent downloads.
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// How conflicting tool declarations are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Keep the first declaration and record a warning.
    #[default]
    FirstDeclared,
    /// Treat every conflict as an error.
    Strict,
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FirstDeclared => write!(f, "first-declared"),
            Self::Strict => write!(f, "strict"),
        }
    }
}

impl std::str::FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "first-declared" | "first" => Ok(Self::FirstDeclared),
            "strict" => Ok(Self::Strict),
            _ => Err(format!("Unknown conflict policy: {s}")),
        }
    }
}

/// Retry settings for transient download failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay in milliseconds
    pub max_delay_ms: u64,
    /// Backoff multiplier applied after each failed attempt
    pub multiplier: f32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    /// Delay before the first retry.
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Cap applied to every delay.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Top-level configuration shared by every pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Artifact file extensions to scan (without the dot).
    pub extensions: Vec<String>,
    /// Tool cache root. `None` uses [`default_cache_dir`].
    pub cache_dir: Option<PathBuf>,
    /// Upper bound on concurrent tool resolutions.
    pub max_concurrent_downloads: usize,
    /// Retry policy for transient failures.
    pub retry: RetrySettings,
    /// Timeout for a single HTTP request in seconds.
    pub request_timeout_secs: u64,
    /// Conflict handling for tool declarations.
    pub conflict_policy: ConflictPolicy,
    /// Recover malformed artifacts with the legacy text extractor.
    pub legacy_fallback: bool,
    /// Abort the download stage at the first permanent tool failure.
    pub all_or_nothing: bool,
    /// User agent sent with every HTTP request.
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            extensions: vec!["yaml".to_string(), "yml".to_string()],
            cache_dir: None,
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT,
            retry: RetrySettings::default(),
            request_timeout_secs: 300,
            conflict_policy: ConflictPolicy::default(),
            legacy_fallback: false,
            all_or_nothing: false,
            user_agent: format!("artools/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Config {
    /// Load a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| Error::io(e, path, "read config"))?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            Error::configuration_with_help(
                format!("Invalid config file {}: {e}", path.display()),
                "See the Config section of the documentation for valid keys",
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, otherwise `artools.toml` from `dir` if it exists,
    /// otherwise defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit path is missing or any file is invalid.
    pub fn discover(path: Option<&Path>, dir: &Path) -> Result<Self> {
        if let Some(explicit) = path {
            return Self::load(explicit);
        }
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            tracing::debug!(path = %candidate.display(), "Loading config file");
            return Self::load(&candidate);
        }
        Ok(Self::default())
    }

    /// Reject values that would make the pipeline unusable.
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_downloads == 0 {
            return Err(Error::configuration(
                "max_concurrent_downloads must be at least 1",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::configuration("retry.max_attempts must be at least 1"));
        }
        if self.retry.multiplier < 1.0 {
            return Err(Error::configuration("retry.multiplier must be >= 1.0"));
        }
        if self.extensions.is_empty() {
            return Err(Error::configuration("extensions must not be empty"));
        }
        Ok(())
    }

    /// Set the cache directory.
    #[must_use]
    pub fn with_cache_dir(mut self, path: PathBuf) -> Self {
        self.cache_dir = Some(path);
        self
    }

    /// Set the download concurrency.
    #[must_use]
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_downloads = max;
        self
    }

    /// Get the cache directory, defaulting to `<cache>/artools/tools`.
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }

    /// Per-request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Get the default cache directory for tools.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("artools")
        .join("tools")
}
