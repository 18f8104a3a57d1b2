//! Explicit per-run state passed through every pipeline stage.

use crate::{Config, Warning};
use tokio_util::sync::CancellationToken;

/// State shared by the stages of one run.
///
/// Each stage takes the context by `&mut` (or `&` for read-only stages) and
/// appends the warnings and errors it observes. Nothing here is global.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// Effective configuration for this run.
    pub config: Config,
    warnings: Vec<Warning>,
    errors: Vec<String>,
    cancel: CancellationToken,
}

impl RunContext {
    /// Create a context for the given configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            warnings: Vec::new(),
            errors: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token (e.g. wired to Ctrl-C).
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Record a warning and log it.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!(%warning, "Recorded warning");
        self.warnings.push(warning);
    }

    /// Record a non-fatal error (a failed tool, a rejected conflict).
    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(%message, "Recorded error");
        self.errors.push(message);
    }

    /// Warnings recorded so far, in order.
    #[must_use]
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Errors recorded so far, in order.
    #[must_use]
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Warnings rendered for result payloads and manifests.
    #[must_use]
    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(ToString::to_string).collect()
    }

    /// Cancellation token for this run.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
