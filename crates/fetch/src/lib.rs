//! Tool download orchestration for artools
//!
//! Fetches every tool of a dependency graph at most once, with bounded
//! concurrency, retry on transient failures and SHA-256 verification,
//! filling the shared [`artools_cache::ToolCache`].
//!
//! # Key Types
//!
//! - [`Fetcher`]: the fetch seam; [`HttpFetcher`] is the `reqwest` implementation
//! - [`DownloadOrchestrator`]: runs a download over a graph
//! - [`DownloadReport`]: per-tool status, failures and cache statistics

mod error;
pub mod http;
pub mod orchestrator;
pub mod retry;

pub use error::{Error, FailureKind, FetchError, Result};
pub use http::{Fetcher, HttpFetcher, is_transient_status};
pub use orchestrator::{
    DownloadOptions, DownloadOrchestrator, DownloadReport, DownloadStatus, ResolvedTool,
    ToolFailure,
};
pub use retry::{RetryConfig, with_retry};
