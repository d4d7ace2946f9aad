//! Port definition for network image retrieval.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::errors::NetworkError;

/// Port for fetching image bytes from their source.
///
/// Implementations must support many concurrent calls for different URLs.
/// Cancellation is expressed by dropping the returned future, so an
/// implementation must not leave work running after it is dropped.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Retrieves the bytes at `url`.
    async fn fetch(&self, url: &str) -> Result<Bytes, NetworkError>;
}
