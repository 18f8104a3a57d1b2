//! artools command-line front end
//!
//! Wires the pipeline crates together behind a typed command contract:
//!
//! ```text
//! scan → resolve → download → package → manifest
//! ```
//!
//! - [`cli`]: argument parsing, exit codes and error rendering
//! - [`commands`]: the [`commands::Command`] enum and its executor
//! - [`tracing`]: subscriber setup with a per-process correlation ID

// CLI crate renders results and errors to stdout/stderr
#![allow(clippy::print_stdout, clippy::print_stderr)]

/// CLI argument parsing and exit codes.
pub mod cli;
/// Command contract and execution.
pub mod commands;
/// Tracing and logging configuration.
pub mod tracing;

pub use cli::{CliError, EXIT_FATAL, EXIT_OK, EXIT_PARTIAL};
pub use commands::{ActionResult, Command, CommandExecutor, Outcome};
