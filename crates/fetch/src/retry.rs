//! Retry logic with exponential backoff

use crate::FetchError;
use artools_core::RetrySettings;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Base for exponential backoff calculation
    pub exponential_base: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: settings.initial_delay(),
            max_delay: settings.max_delay(),
            exponential_base: settings.multiplier,
        }
    }
}

impl RetryConfig {
    /// Delay slept after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_delay.min(self.max_delay);
        for _ in 1..attempt {
            delay = delay.mul_f32(self.exponential_base).min(self.max_delay);
        }
        delay
    }
}

/// Execute a fetch with retry on transient failures
///
/// `operation` receives the 1-based attempt number. Permanent and integrity
/// errors are returned immediately. Cancellation aborts both an in-flight
/// attempt and a pending backoff sleep.
///
/// # Errors
///
/// Returns the last error if all attempts fail, the first non-transient
/// error, or [`FetchError::Cancelled`].
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    url: &str,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(FetchError::cancelled(url)),
            result = operation(attempt) => result,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() || attempt >= config.max_attempts => return Err(e),
            Err(e) => {
                let delay = config.delay_after(attempt);
                tracing::warn!(
                    url,
                    attempt,
                    max_attempts = config.max_attempts,
                    error = %e,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Fetch failed, retrying"
                );

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(FetchError::cancelled(url)),
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
