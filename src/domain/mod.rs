//! Domain layer with core entities, errors and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use entities::{CacheKey, CachedImage, ImageDownload, ImageOrigin};
pub use errors::{ImageError, ImageResult, NetworkError, NetworkErrorKind};
pub use ports::ImageFetcher;
