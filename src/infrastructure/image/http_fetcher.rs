//! HTTP implementation of the image fetcher port.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace};

use crate::domain::errors::{ImageError, ImageResult, NetworkError, NetworkErrorKind};
use crate::domain::ports::ImageFetcher;

/// Default request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default `User-Agent` header.
pub const DEFAULT_USER_AGENT: &str = concat!("imagecache/", env!("CARGO_PKG_VERSION"));

/// Fetches images with plain HTTP GET requests.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a fetcher with the given timeout and user agent.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(timeout: Duration, user_agent: &str) -> ImageResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| {
                ImageError::Network(NetworkError::new(
                    NetworkErrorKind::Connect,
                    format!("failed to create HTTP client: {e}"),
                ))
            })?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, NetworkError> {
        trace!(url = %url, "Sending image request");

        let response = self.client.get(url).send().await.map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::status(
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown"),
            ));
        }

        let bytes = response.bytes().await.map_err(classify)?;
        debug!(url = %url, size = bytes.len(), "Downloaded image");
        Ok(bytes)
    }
}

fn classify(err: reqwest::Error) -> NetworkError {
    let kind = if err.is_timeout() {
        NetworkErrorKind::Timeout
    } else if err.is_connect() {
        NetworkErrorKind::Connect
    } else if let Some(status) = err.status() {
        NetworkErrorKind::Status(status.as_u16())
    } else {
        NetworkErrorKind::Transfer
    };
    NetworkError::new(kind, err.to_string())
}
