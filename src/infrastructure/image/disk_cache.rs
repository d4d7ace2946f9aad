//! Disk-based image cache for persistence across sessions.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs;
use tracing::{debug, info, trace, warn};

use crate::domain::entities::{CacheKey, CachedImage};
use crate::domain::errors::{ImageError, ImageResult};

const ENTRY_EXTENSION: &str = "img";
const TEMP_PREFIX: &str = ".incoming-";
const TEMP_SUFFIX: &str = ".part";

/// Disk-based cache holding one opaque file per key.
///
/// Entries are only ever created by renaming a fully written temporary file
/// from the same directory over the entry path, so a reader sees either the
/// old file, the new file, or nothing.
#[derive(Debug)]
pub struct DiskImageCache {
    cache_dir: PathBuf,
}

/// Aggregate size of the disk cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    /// Number of cached entries.
    pub entries: usize,
    /// Total bytes across entries.
    pub bytes: u64,
}

impl DiskImageCache {
    /// Opens a cache rooted at `cache_dir`, creating it if needed and removing
    /// temporary files left behind by an interrupted write.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be created.
    pub async fn open(cache_dir: PathBuf) -> ImageResult<Self> {
        fs::create_dir_all(&cache_dir)
            .await
            .map_err(|e| ImageError::storage("failed to create cache dir", &e))?;

        let cache = Self { cache_dir };
        cache.sweep_partial_files().await;
        Ok(cache)
    }

    /// Returns the directory backing this cache.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the canonical path for a key.
    #[must_use]
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{ENTRY_EXTENSION}", key.file_stem()))
    }

    /// Checks if an entry exists, without reading it.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        std::fs::metadata(self.entry_path(key)).is_ok_and(|meta| meta.is_file())
    }

    /// Reads an entry synchronously.
    ///
    /// # Errors
    /// Returns error if the entry exists but cannot be read.
    pub fn read(&self, key: &CacheKey) -> ImageResult<Option<Bytes>> {
        match std::fs::read(self.entry_path(key)) {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ImageError::storage("failed to read cache file", &e)),
        }
    }

    /// Reads an entry.
    ///
    /// # Errors
    /// Returns error if the entry exists but cannot be read.
    pub async fn get(&self, key: &CacheKey) -> ImageResult<Option<CachedImage>> {
        let path = self.entry_path(key);
        match fs::read(&path).await {
            Ok(bytes) => {
                trace!(key = %key, path = %path.display(), "Disk cache hit");
                Ok(Some(CachedImage::new(key.clone(), bytes)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!(key = %key, "Disk cache miss");
                Ok(None)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read disk cache entry");
                Err(ImageError::storage("failed to read cache file", &e))
            }
        }
    }

    /// Stores an image, replacing any previous entry for its key.
    ///
    /// # Errors
    /// Returns error if the temporary file cannot be written or moved into place.
    pub async fn put(&self, image: &CachedImage) -> ImageResult<()> {
        let dir = self.cache_dir.clone();
        let path = self.entry_path(image.key());
        let bytes = image.bytes().clone();

        let target = path.clone();
        run_blocking(move || write_atomic(&dir, &target, &bytes))
            .await
            .map_err(|e| ImageError::storage("failed to write cache file", &e))?;

        debug!(key = %image.key(), path = %path.display(), size = image.len(), "Stored image in disk cache");
        Ok(())
    }

    /// Moves an existing file into the cache as the entry for `key`.
    ///
    /// Renames when possible; when the source lives on another filesystem the
    /// file is copied through a temporary file and the source removed.
    ///
    /// # Errors
    /// Returns error if the source cannot be moved or copied.
    pub async fn adopt(&self, key: &CacheKey, source: &Path) -> ImageResult<()> {
        let dir = self.cache_dir.clone();
        let target = self.entry_path(key);
        let source = source.to_path_buf();

        let from = source.clone();
        let to = target.clone();
        run_blocking(move || match std::fs::rename(&from, &to) {
            Ok(()) => Ok(()),
            Err(e) => {
                debug!(source = %from.display(), error = %e, "Rename failed, copying instead");
                copy_atomic(&dir, &from, &to)?;
                if let Err(e) = std::fs::remove_file(&from) {
                    warn!(source = %from.display(), error = %e, "Failed to remove imported source file");
                }
                Ok(())
            }
        })
        .await
        .map_err(|e| ImageError::storage("failed to import file", &e))?;

        debug!(key = %key, source = %source.display(), path = %target.display(), "Imported file into disk cache");
        Ok(())
    }

    /// Removes an entry. Returns whether an entry existed.
    ///
    /// # Errors
    /// Returns error if the entry exists but cannot be removed.
    pub async fn delete(&self, key: &CacheKey) -> ImageResult<bool> {
        match fs::remove_file(self.entry_path(key)).await {
            Ok(()) => {
                debug!(key = %key, "Removed disk cache entry");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ImageError::storage("failed to remove cache file", &e)),
        }
    }

    /// Removes every entry, returning how many were removed.
    ///
    /// Temporary files of writes still in progress are left alone. Every
    /// entry is attempted; the first failure is reported.
    ///
    /// # Errors
    /// Returns error if the directory cannot be listed or an entry cannot be removed.
    pub async fn delete_all(&self) -> ImageResult<usize> {
        let mut entries = fs::read_dir(&self.cache_dir)
            .await
            .map_err(|e| ImageError::storage("failed to read cache dir", &e))?;

        let mut removed = 0usize;
        let mut first_error = None;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ImageError::storage("failed to read cache dir entry", &e))?
        {
            let path = entry.path();
            if !is_entry_file(&path) {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove cache file");
                    first_error
                        .get_or_insert_with(|| ImageError::storage("failed to remove cache file", &e));
                }
            }
        }

        info!(removed = removed, "Cleared disk cache");
        first_error.map_or(Ok(removed), Err)
    }

    /// Scans the directory and reports how much is cached.
    ///
    /// # Errors
    /// Returns error if the directory cannot be listed.
    pub async fn usage(&self) -> ImageResult<DiskUsage> {
        let mut entries = fs::read_dir(&self.cache_dir)
            .await
            .map_err(|e| ImageError::storage("failed to read cache dir", &e))?;

        let mut usage = DiskUsage::default();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if is_entry_file(&path)
                && let Ok(meta) = entry.metadata().await
            {
                usage.entries += 1;
                usage.bytes += meta.len();
            }
        }
        Ok(usage)
    }

    async fn sweep_partial_files(&self) {
        let Ok(mut entries) = fs::read_dir(&self.cache_dir).await else {
            return;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !is_partial_file(&path) {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "Removed stale partial file"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove stale partial file"),
            }
        }
    }
}

fn is_entry_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION)
}

fn is_partial_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX))
}

fn temp_file_in(dir: &Path) -> io::Result<tempfile::NamedTempFile> {
    tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)
}

fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut temp = temp_file_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

fn copy_atomic(dir: &Path, source: &Path, target: &Path) -> io::Result<()> {
    let mut input = std::fs::File::open(source)?;
    let mut temp = temp_file_in(dir)?;
    io::copy(&mut input, &mut temp)?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

async fn run_blocking<F>(f: F) -> io::Result<()>
where
    F: FnOnce() -> io::Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| io::Error::other(format!("blocking task failed: {e}")))?
}

/// Returns the default cache directory path.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("org", "imagecache", "imagecache").map_or_else(
        || std::env::temp_dir().join("imagecache").join("images"),
        |dirs| dirs.cache_dir().join("images"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_cache() -> (DiskImageCache, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskImageCache::open(temp_dir.path().join("images"))
            .await
            .unwrap();
        (cache, temp_dir)
    }

    fn image(url: &str, bytes: &'static [u8]) -> CachedImage {
        CachedImage::new(CacheKey::from_url(url), bytes)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (cache, _temp) = create_test_cache().await;
        let img = image("https://example.com/a.png", b"test image data");

        cache.put(&img).await.unwrap();

        assert_eq!(cache.get(img.key()).await.unwrap(), Some(img.clone()));
        assert_eq!(
            cache.read(img.key()).unwrap().as_deref(),
            Some(&b"test image data"[..])
        );
        assert!(cache.contains(img.key()));
    }

    #[tokio::test]
    async fn test_miss() {
        let (cache, _temp) = create_test_cache().await;
        let key = CacheKey::from_url("https://example.com/none.png");

        assert_eq!(cache.get(&key).await.unwrap(), None);
        assert_eq!(cache.read(&key).unwrap(), None);
        assert!(!cache.contains(&key));
    }

    #[tokio::test]
    async fn test_put_overwrites_and_leaves_no_temp_files() {
        let (cache, _temp) = create_test_cache().await;
        cache.put(&image("https://example.com/a.png", b"first")).await.unwrap();
        cache.put(&image("https://example.com/a.png", b"second")).await.unwrap();

        let key = CacheKey::from_url("https://example.com/a.png");
        assert_eq!(cache.read(&key).unwrap().as_deref(), Some(&b"second"[..]));

        let names: Vec<_> = std::fs::read_dir(cache.cache_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(is_entry_file(Path::new(&names[0])));
    }

    #[tokio::test]
    async fn test_entry_path_is_hashed() {
        let (cache, _temp) = create_test_cache().await;
        let key = CacheKey::from_url("https://example.com/../../escape?x=/y");
        let path = cache.entry_path(&key);

        assert_eq!(path.parent(), Some(cache.cache_dir()));
        assert_eq!(path.file_name().unwrap().len(), 64 + 1 + ENTRY_EXTENSION.len());
    }

    #[tokio::test]
    async fn test_adopt_moves_file() {
        let (cache, temp) = create_test_cache().await;
        let source = temp.path().join("fixture.jpg");
        std::fs::write(&source, b"jpeg bytes").unwrap();
        let key = CacheKey::from_url("//foo/bar");

        cache.adopt(&key, &source).await.unwrap();

        assert!(!source.exists());
        assert_eq!(cache.read(&key).unwrap().as_deref(), Some(&b"jpeg bytes"[..]));
    }

    #[tokio::test]
    async fn test_adopt_missing_source_fails() {
        let (cache, temp) = create_test_cache().await;
        let key = CacheKey::from_url("https://example.com/a.png");

        let err = cache
            .adopt(&key, &temp.path().join("missing.png"))
            .await
            .unwrap_err();

        assert!(err.is_storage());
        assert!(!cache.contains(&key));
    }

    #[tokio::test]
    async fn test_delete() {
        let (cache, _temp) = create_test_cache().await;
        let img = image("https://example.com/a.png", b"a");
        cache.put(&img).await.unwrap();

        assert!(cache.delete(img.key()).await.unwrap());
        assert!(!cache.delete(img.key()).await.unwrap());
        assert_eq!(cache.get(img.key()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_all_and_usage() {
        let (cache, _temp) = create_test_cache().await;
        cache.put(&image("https://example.com/a.png", b"hello")).await.unwrap();
        cache.put(&image("https://example.com/b.png", b"world!")).await.unwrap();

        assert_eq!(
            cache.usage().await.unwrap(),
            DiskUsage {
                entries: 2,
                bytes: 11
            }
        );

        assert_eq!(cache.delete_all().await.unwrap(), 2);
        assert_eq!(cache.usage().await.unwrap(), DiskUsage::default());
        assert!(!cache.contains(&CacheKey::from_url("https://example.com/a.png")));
    }

    #[tokio::test]
    async fn test_open_sweeps_partial_files() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("images");
        std::fs::create_dir_all(&dir).unwrap();
        let partial = dir.join(format!("{TEMP_PREFIX}abc{TEMP_SUFFIX}"));
        let unrelated = dir.join("notes.txt");
        std::fs::write(&partial, b"half").unwrap();
        std::fs::write(&unrelated, b"keep").unwrap();

        let _cache = DiskImageCache::open(dir).await.unwrap();

        assert!(!partial.exists());
        assert!(unrelated.exists());
    }

    #[tokio::test]
    async fn test_concurrent_puts_never_expose_partial_data() {
        let (cache, _temp) = create_test_cache().await;
        let cache = std::sync::Arc::new(cache);
        let key = CacheKey::from_url("https://example.com/big.png");
        let small = CachedImage::new(key.clone(), vec![1u8; 1024]);
        let large = CachedImage::new(key.clone(), vec![2u8; 256 * 1024]);

        let mut writers = Vec::new();
        for i in 0..8 {
            let cache = cache.clone();
            let img = if i % 2 == 0 { small.clone() } else { large.clone() };
            writers.push(tokio::spawn(async move { cache.put(&img).await }));
        }

        for _ in 0..32 {
            if let Some(img) = cache.get(&key).await.unwrap() {
                let bytes = img.bytes();
                assert!(*bytes == *small.bytes() || *bytes == *large.bytes());
            }
            tokio::task::yield_now().await;
        }

        for writer in writers {
            writer.await.unwrap().unwrap();
        }
    }
}
