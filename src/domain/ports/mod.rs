//! Port definitions for external collaborators.

mod image_fetcher_port;

pub use image_fetcher_port::ImageFetcher;

/// Test doubles for the ports.
#[cfg(test)]
pub mod mocks {
    pub use super::image_fetcher_port::mock::MockFetcher;
}
