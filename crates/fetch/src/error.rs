//! Error types for the fetch crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single tool fetch.
///
/// Only [`FetchError::Transient`] is retried.
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum FetchError {
    /// Timeout, connection failure, truncated body or HTTP 5xx
    #[error("transient failure fetching {url}: {message}")]
    #[diagnostic(code(artools::fetch::transient))]
    Transient {
        /// URL being fetched
        url: String,
        /// Failure description
        message: String,
        /// HTTP status, if a response was received
        status: Option<u16>,
    },

    /// HTTP 4xx, invalid URL or unsupported scheme
    #[error("permanent failure fetching {url}: {message}")]
    #[diagnostic(code(artools::fetch::permanent))]
    Permanent {
        /// URL being fetched
        url: String,
        /// Failure description
        message: String,
        /// HTTP status, if a response was received
        status: Option<u16>,
    },

    /// Downloaded bytes do not match the declared hash
    #[error("integrity check failed for {url}: expected {expected}, got {actual}")]
    #[diagnostic(
        code(artools::fetch::integrity),
        help("The upstream file changed or the artifact declares a stale hash")
    )]
    Integrity {
        /// URL being fetched
        url: String,
        /// Declared SHA-256
        expected: String,
        /// Computed SHA-256
        actual: String,
    },

    /// The tool could not be staged or committed to the cache
    #[error("cache failure for {url}: {message}")]
    #[diagnostic(code(artools::fetch::cache))]
    Cache {
        /// URL being resolved
        url: String,
        /// Failure description
        message: String,
    },

    /// The run was cancelled before this tool completed
    #[error("cancelled")]
    #[diagnostic(code(artools::fetch::cancelled))]
    Cancelled {
        /// URL being fetched
        url: String,
    },
}

impl FetchError {
    /// Create a transient error
    #[must_use]
    pub fn transient(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            url: url.into(),
            message: message.into(),
            status: None,
        }
    }

    /// Create a permanent error
    #[must_use]
    pub fn permanent(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Permanent {
            url: url.into(),
            message: message.into(),
            status: None,
        }
    }

    /// Create a cache error
    #[must_use]
    pub fn cache(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Cache {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a cancellation error
    #[must_use]
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Whether retrying may succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// HTTP status carried by the error, if any
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } | Self::Permanent { status, .. } => *status,
            _ => None,
        }
    }

    /// Failure category for reports
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Transient { .. } => FailureKind::Network,
            Self::Permanent { .. } => FailureKind::Http,
            Self::Integrity { .. } => FailureKind::Integrity,
            Self::Cache { .. } => FailureKind::Cache,
            Self::Cancelled { .. } => FailureKind::Cancelled,
        }
    }
}

/// Category of a permanent tool failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// Transient errors that exhausted all retries
    Network,
    /// Non-retryable HTTP or URL error
    Http,
    /// Hash mismatch
    Integrity,
    /// Local cache failure
    Cache,
    /// Cancelled before completion
    Cancelled,
}

/// Fatal orchestrator errors
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Invalid download options
    #[error("Download configuration error: {message}")]
    #[diagnostic(code(artools::fetch::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Cache error outside of any single tool
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] artools_cache::Error),
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }
}

/// Result type for orchestrator operations
pub type Result<T> = std::result::Result<T, Error>;
