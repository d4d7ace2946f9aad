//! Infrastructure layer with cache and network adapters.

/// Configuration loading and command-line arguments.
pub mod config;
/// Image caching, fetching and orchestration.
pub mod image;

pub use config::{CliArgs, Command, ConfigError, ConfigStore, ImageCacheConfig, LogLevel};
pub use image::{
    CacheStats, CancelOutcome, ControllerStats, DiskImageCache, DiskUsage, HttpFetcher,
    ImageController, InFlightRegistry, MemoryImageCache,
};
