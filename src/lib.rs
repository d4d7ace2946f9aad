//! Imagecache - Async image acquisition with memory, disk and network tiers.
//!
//! Images are looked up in memory, then on disk, then downloaded. Concurrent
//! requests for the same URL share one download, and a pending download can
//! be cancelled without affecting later requests.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing caches, fetchers and configuration.
pub mod infrastructure;

pub use domain::{CacheKey, CachedImage, ImageDownload, ImageError, ImageOrigin, ImageResult};
pub use infrastructure::ImageController;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "imagecache";
