//! Error types for the package crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for package and manifest operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error while assembling or reading a package
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(artools::package::io),
        help("Check file permissions and available disk space")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "copy", "write", "rename")
        operation: String,
    },

    /// Output directory already exists
    #[error("Output directory already exists: {}", path.display())]
    #[diagnostic(
        code(artools::package::exists),
        help("Pass --overwrite to replace it, or choose another output path")
    )]
    OutputExists {
        /// The existing output path
        path: Box<Path>,
    },

    /// A cached tool changed between download and packaging
    #[error("Tool {} does not match its verified hash: expected {expected}, got {actual}", path.display())]
    #[diagnostic(
        code(artools::package::integrity),
        help("Run the download again; the cached copy will be re-verified")
    )]
    Integrity {
        /// Source path in the cache
        path: Box<Path>,
        /// Verified hash
        expected: String,
        /// Hash computed while copying
        actual: String,
    },

    /// Manifest could not be read or parsed
    #[error("Invalid manifest {}: {message}", path.display())]
    #[diagnostic(code(artools::package::manifest))]
    Manifest {
        /// Manifest path
        path: Box<Path>,
        /// Parser message
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(artools::package::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },

    /// Error from the core crate (re-scanning a package)
    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] artools_core::Error),
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

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }
}

/// Result type for package operations
pub type Result<T> = std::result::Result<T, Error>;
