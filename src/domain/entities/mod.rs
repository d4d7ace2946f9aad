//! Domain entity definitions.

mod image;

pub use image::{CacheKey, CachedImage, ImageDownload, ImageOrigin};
