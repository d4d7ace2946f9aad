//! Image handling infrastructure.
//!
//! This module provides:
//! - Memory caching with optional LRU bounds
//! - Disk caching with atomic writes
//! - Deduplicated, cancellable network fetches
//! - The controller tying the tiers together

pub mod controller;
pub mod disk_cache;
pub mod fetcher;
pub mod http_fetcher;
pub mod in_flight;
pub mod memory_cache;

pub use controller::{ControllerStats, ImageController};
pub use disk_cache::{DiskImageCache, DiskUsage, default_cache_dir};
pub use fetcher::{FetchHandle, FetchOutcome, run_fetch};
pub use http_fetcher::{DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT, HttpFetcher};
pub use in_flight::{CancelOutcome, DEFAULT_SHARDS, FetchTicket, InFlightRegistry, Registration};
pub use memory_cache::{CacheStats, MemoryImageCache};
