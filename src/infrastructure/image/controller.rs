//! Image acquisition orchestrator.
//!
//! Implements a three-tier lookup: Memory -> Disk -> Network. Concurrent
//! requests for the same key share one network operation through the
//! in-flight registry.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info, warn};

use crate::domain::entities::{CacheKey, CachedImage, ImageDownload, ImageOrigin};
use crate::domain::errors::{ImageError, ImageResult, NetworkError, NetworkErrorKind};
use crate::domain::ports::ImageFetcher;
use crate::infrastructure::config::ImageCacheConfig;

use super::disk_cache::{DiskImageCache, DiskUsage};
use super::fetcher::{FetchOutcome, run_fetch};
use super::http_fetcher::HttpFetcher;
use super::in_flight::{CancelOutcome, FetchTicket, InFlightRegistry};
use super::memory_cache::{CacheStats, MemoryImageCache};

/// Snapshot of controller state.
#[derive(Debug, Clone)]
pub struct ControllerStats {
    /// Memory tier statistics.
    pub memory: CacheStats,
    /// Number of keys with an outstanding fetch.
    pub in_flight: usize,
}

/// Public entry point for fetching, importing and inspecting cached images.
///
/// Cheap to clone; clones share the same caches and registry.
#[derive(Clone)]
pub struct ImageController {
    inner: Arc<Inner>,
}

struct Inner {
    memory: MemoryImageCache,
    disk: DiskImageCache,
    registry: InFlightRegistry,
    fetcher: Arc<dyn ImageFetcher>,
    limiter: Semaphore,
    validate_images: bool,
    /// Held shared while a tier write is in progress and exclusively while
    /// clearing, so a key is never left in memory without a disk copy.
    clear_lock: RwLock<()>,
}

impl std::fmt::Debug for ImageController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageController")
            .field("cache_dir", &self.inner.disk.cache_dir())
            .field("in_flight", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

impl ImageController {
    /// Creates a controller using `fetcher` for network retrieval.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be created.
    pub async fn new(config: &ImageCacheConfig, fetcher: Arc<dyn ImageFetcher>) -> ImageResult<Self> {
        let disk = DiskImageCache::open(config.effective_cache_dir()).await?;
        info!(
            cache_dir = %disk.cache_dir().display(),
            memory_capacity = ?config.memory_capacity,
            max_concurrent_fetches = config.max_concurrent_fetches,
            "Image controller ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                memory: MemoryImageCache::new(config.memory_capacity),
                disk,
                registry: InFlightRegistry::new(config.registry_shards),
                fetcher,
                limiter: Semaphore::new(config.max_concurrent_fetches.max(1)),
                validate_images: config.validate_images,
                clear_lock: RwLock::new(()),
            }),
        })
    }

    /// Creates a controller that downloads over HTTP.
    ///
    /// # Errors
    /// Returns error if the HTTP client or cache directory cannot be created.
    pub async fn with_http(config: &ImageCacheConfig) -> ImageResult<Self> {
        let fetcher = HttpFetcher::new(config.timeout(), &config.user_agent)?;
        Self::new(config, Arc::new(fetcher)).await
    }

    /// Fetches an image, preferring memory, then disk, then the network.
    ///
    /// Dropping the returned future only detaches this caller; a shared
    /// network fetch keeps running for the other waiters.
    ///
    /// # Errors
    /// Returns the network error, `Cancelled` if [`Self::cancel_fetch`] won the
    /// race, a storage error if the disk tier failed, or a decode error if the
    /// downloaded bytes are not an image.
    pub async fn fetch(&self, url: &str) -> ImageResult<ImageDownload> {
        let key = CacheKey::from_url(url);

        if let Some(image) = self.inner.memory.get(&key) {
            return Ok(ImageDownload::new(image, ImageOrigin::Memory));
        }

        if let Some(image) = self.inner.promote_from_disk(&key).await? {
            return Ok(ImageDownload::new(image, ImageOrigin::Disk));
        }

        let registration = self.inner.registry.join(&key);
        if let Some(ticket) = registration.ticket {
            let driver = FetchDriver {
                inner: self.inner.clone(),
                ticket,
                resolved: false,
            };
            tokio::spawn(driver.run());
        }

        let image = registration.receiver.await.map_err(|_| {
            ImageError::Network(NetworkError::new(
                NetworkErrorKind::Aborted,
                "fetch task ended without a result",
            ))
        })??;
        Ok(ImageDownload::new(image, ImageOrigin::Network))
    }

    /// Looks up an image in memory and on disk without touching the network.
    ///
    /// # Errors
    /// Returns error if the disk entry exists but cannot be read.
    pub async fn cached_image(&self, url: &str) -> ImageResult<Option<ImageDownload>> {
        let key = CacheKey::from_url(url);

        if let Some(image) = self.inner.memory.get(&key) {
            return Ok(Some(ImageDownload::new(image, ImageOrigin::Memory)));
        }

        let image = self.inner.promote_from_disk(&key).await?;
        Ok(image.map(|image| ImageDownload::new(image, ImageOrigin::Disk)))
    }

    /// Moves a local file into the disk cache as the image for `url`.
    ///
    /// The memory tier is bypassed; a stale memory copy for the key is dropped.
    ///
    /// # Errors
    /// Returns error if the file cannot be moved or copied into the cache.
    pub async fn import_image(&self, file: &Path, url: &str) -> ImageResult<()> {
        let key = CacheKey::from_url(url);
        self.inner.disk.adopt(&key, file).await?;
        self.inner.memory.remove(&key);
        debug!(key = %key, "Imported image");
        Ok(())
    }

    /// Returns true if the image is in the memory tier.
    #[must_use]
    pub fn has_data_in_memory(&self, url: &str) -> bool {
        self.inner.memory.contains(&CacheKey::from_url(url))
    }

    /// Returns true if the image is in the disk tier.
    #[must_use]
    pub fn has_data_on_disk(&self, url: &str) -> bool {
        self.inner.disk.contains(&CacheKey::from_url(url))
    }

    /// Reads the disk copy of an image.
    #[must_use]
    pub fn disk_data(&self, url: &str) -> Option<Bytes> {
        let key = CacheKey::from_url(url);
        match self.inner.disk.read(&key) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read disk cache entry");
                None
            }
        }
    }

    /// Returns the memory copy of an image.
    #[must_use]
    pub fn memory_image(&self, url: &str) -> Option<CachedImage> {
        self.inner.memory.get(&CacheKey::from_url(url))
    }

    /// Returns true if a network fetch for the image is outstanding.
    #[must_use]
    pub fn is_fetching(&self, url: &str) -> bool {
        self.inner.registry.is_in_flight(&CacheKey::from_url(url))
    }

    /// Cancels the outstanding fetch for `url`, failing its waiters with
    /// `Cancelled`. A no-op if nothing is in flight or the fetch already
    /// produced its bytes.
    pub fn cancel_fetch(&self, url: &str) -> CancelOutcome {
        let key = CacheKey::from_url(url);
        let outcome = self.inner.registry.cancel(&key);
        match outcome {
            CancelOutcome::Cancelled { waiters } => {
                info!(key = %key, waiters = waiters, "Cancelled image fetch");
            }
            CancelOutcome::TooLate => {
                debug!(key = %key, "Fetch already completing, cancel ignored");
            }
            CancelOutcome::NotInFlight => {}
        }
        outcome
    }

    /// Clears the memory and disk tiers. Outstanding fetches are unaffected
    /// and may repopulate the caches when they finish.
    ///
    /// # Errors
    /// Returns error if a disk entry cannot be removed.
    pub async fn delete_all_images(&self) -> ImageResult<()> {
        let _guard = self.inner.clear_lock.write().await;
        self.inner.memory.clear();
        self.inner.disk.delete_all().await?;
        info!("Cleared all image caches");
        Ok(())
    }

    /// Returns memory statistics and the number of outstanding fetches.
    #[must_use]
    pub fn stats(&self) -> ControllerStats {
        ControllerStats {
            memory: self.inner.memory.stats(),
            in_flight: self.inner.registry.len(),
        }
    }

    /// Scans the disk tier.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be listed.
    pub async fn disk_usage(&self) -> ImageResult<DiskUsage> {
        self.inner.disk.usage().await
    }
}

impl Inner {
    async fn promote_from_disk(&self, key: &CacheKey) -> ImageResult<Option<CachedImage>> {
        let _guard = self.clear_lock.read().await;
        let image = self.disk.get(key).await?;
        if let Some(image) = &image {
            self.memory.put(image.clone());
        }
        Ok(image)
    }

    async fn store(&self, key: &CacheKey, bytes: Bytes) -> ImageResult<CachedImage> {
        let image = CachedImage::new(key.clone(), bytes);
        if self.validate_images && image.format().is_none() {
            return Err(ImageError::Decode(format!(
                "unrecognized image format for {key} ({} bytes)",
                image.len()
            )));
        }

        let _guard = self.clear_lock.read().await;
        self.disk.put(&image).await?;
        self.memory.put(image.clone());
        Ok(image)
    }
}

/// Owns the in-flight entry created by the first requester and drives it to
/// exactly one terminal state. If the task is dropped or unwinds before
/// that, the entry is resolved as aborted.
struct FetchDriver {
    inner: Arc<Inner>,
    ticket: FetchTicket,
    resolved: bool,
}

impl FetchDriver {
    async fn run(mut self) {
        let key = self.ticket.key().clone();

        // A request that finished between the caller's cache lookup and its
        // join has already populated the tiers.
        let cached = match self.inner.memory.peek(&key) {
            Some(image) => Ok(Some(image)),
            None => self.inner.promote_from_disk(&key).await,
        };
        match cached {
            Ok(Some(image)) => {
                if self.inner.registry.begin_completion(&self.ticket) {
                    debug!(key = %key, "Served from cache filled by an earlier fetch");
                    self.finish(&Ok(image));
                } else {
                    self.resolved = true;
                }
                return;
            }
            Ok(None) => {}
            Err(e) => {
                self.finish(&Err(e));
                return;
            }
        }

        let outcome = run_fetch(
            self.inner.fetcher.as_ref(),
            key.as_str(),
            self.ticket.token(),
            &self.inner.limiter,
        )
        .await;

        let result = match outcome {
            FetchOutcome::Completed(bytes) => {
                if !self.inner.registry.begin_completion(&self.ticket) {
                    debug!(key = %key, "Fetch finished after cancellation, discarding bytes");
                    self.resolved = true;
                    return;
                }
                self.inner.store(&key, bytes).await
            }
            FetchOutcome::Failed(e) => {
                debug!(key = %key, error = %e, "Image fetch failed");
                Err(ImageError::Network(e))
            }
            FetchOutcome::Cancelled => Err(ImageError::Cancelled),
        };

        self.finish(&result);
    }

    fn finish(&mut self, result: &ImageResult<CachedImage>) {
        self.resolved = true;
        self.inner.registry.resolve(&self.ticket, result);
    }
}

impl Drop for FetchDriver {
    fn drop(&mut self) {
        if !self.resolved {
            warn!(key = %self.ticket.key(), "Fetch task ended early, failing waiters");
            self.finish(&Err(ImageError::Network(NetworkError::new(
                NetworkErrorKind::Aborted,
                "fetch task ended without a result",
            ))));
        }
    }
}
