//! Fetch seam and its HTTP implementation.

use crate::{Error, FetchError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Source of tool bytes.
///
/// The orchestrator only talks to this trait, so tests can substitute
/// instrumented fetchers.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the full body at `url`.
    async fn fetch(&self, url: &str) -> std::result::Result<Bytes, FetchError>;
}

/// Fetches tools over HTTP(S) with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the TLS backend cannot be initialized.
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(30)))
            .build()
            .map_err(|e| Error::configuration(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Create a fetcher from the run configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the client cannot be built.
    pub fn from_config(config: &artools_core::Config) -> Result<Self> {
        Self::new(&config.user_agent, config.request_timeout())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<Bytes, FetchError> {
        debug!(%url, "Downloading tool");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_request_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("HTTP {status}");
            return Err(if is_transient_status(status) {
                FetchError::Transient {
                    url: url.to_string(),
                    message,
                    status: Some(status.as_u16()),
                }
            } else {
                FetchError::Permanent {
                    url: url.to_string(),
                    message,
                    status: Some(status.as_u16()),
                }
            });
        }

        response
            .bytes()
            .await
            .map_err(|e| FetchError::transient(url, format!("Failed to read body: {e}")))
    }
}

/// Whether an HTTP status is worth retrying. Every 4xx fails immediately.
#[must_use]
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
}

fn classify_request_error(url: &str, error: &reqwest::Error) -> FetchError {
    if error.is_builder() || error.is_redirect() {
        FetchError::permanent(url, error.to_string())
    } else {
        FetchError::transient(url, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(is_transient_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(!is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient_status(StatusCode::REQUEST_TIMEOUT));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
        assert!(!is_transient_status(StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn test_invalid_url_is_permanent() {
        let fetcher = HttpFetcher::new("artools-test", Duration::from_secs(1)).unwrap();
        let err = fetcher.fetch("not a url").await.unwrap_err();
        assert!(!err.is_transient());
    }
}
