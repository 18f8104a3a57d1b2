//! Error types for the core crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Fatal errors that abort a run before any package is produced.
///
/// Recoverable problems (malformed artifacts, reference conflicts) are not
/// errors; they are recorded as [`crate::Warning`]s on the run context.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error while reading the corpus or writing output
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(artools::core::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "rename")
        operation: String,
    },

    /// Invalid configuration or command parameters
    #[error("Configuration error: {message}")]
    #[diagnostic(code(artools::core::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },

    /// Reference conflicts rejected under the strict conflict policy
    #[error("{count} tool reference conflict(s) rejected by strict conflict policy")]
    #[diagnostic(
        code(artools::core::conflict),
        help("Fix the conflicting artifact declarations or use the first-declared policy")
    )]
    Conflicts {
        /// Number of rejected conflicts
        count: usize,
    },

    /// The run was cancelled before completion
    #[error("Run cancelled: {stage}")]
    #[diagnostic(code(artools::core::cancelled))]
    Cancelled {
        /// Stage that observed the cancellation
        stage: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(artools::core::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },
}

impl Error {
    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
            help: None,
        }
    }

    /// Create a configuration error with help text
    #[must_use]
    pub fn configuration_with_help(msg: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
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

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::io_no_path(source, "io")
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;
