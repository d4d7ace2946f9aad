//! Domain types for cached images.

use bytes::Bytes;

use crate::domain::errors::ImageError;

/// Canonical identity of an image across every cache tier and the
/// in-flight registry.
///
/// Built from the request URL, so any density suffix the caller baked into
/// the URL is part of the identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Normalizes a request URL into a cache key.
    ///
    /// Scheme-relative URLs are resolved against `https:`, scheme and host
    /// are lowercased, default ports and fragments are dropped. Input that is
    /// not an absolute URL is kept verbatim (minus surrounding whitespace).
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        let trimmed = url.trim();
        let candidate = if trimmed.starts_with("//") {
            format!("https:{trimmed}")
        } else {
            trimmed.to_string()
        };

        match url::Url::parse(&candidate) {
            Ok(mut parsed) if !parsed.cannot_be_a_base() => {
                parsed.set_fragment(None);
                Self(parsed.into())
            }
            _ => Self(trimmed.to_string()),
        }
    }

    /// Returns the canonical URL string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a filesystem-safe, collision-resistant name for this key.
    #[must_use]
    pub fn file_stem(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(url: &str) -> Self {
        Self::from_url(url)
    }
}

/// Immutable image payload stored under a key.
///
/// Replacing a cache entry means inserting a new value; the bytes are
/// reference counted so clones are cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedImage {
    key: CacheKey,
    bytes: Bytes,
}

impl CachedImage {
    /// Wraps raw bytes for a key.
    #[must_use]
    pub fn new(key: CacheKey, bytes: impl Into<Bytes>) -> Self {
        Self {
            key,
            bytes: bytes.into(),
        }
    }

    /// Returns the key the bytes are stored under.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Returns the raw encoded bytes.
    #[must_use]
    pub const fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Returns the size of the payload in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Sniffs the container format from the leading bytes.
    #[must_use]
    pub fn format(&self) -> Option<image::ImageFormat> {
        image::guess_format(&self.bytes).ok()
    }

    /// Decodes the payload into pixels.
    ///
    /// This is CPU bound; async callers should run it on a blocking thread.
    ///
    /// # Errors
    /// Returns `ImageError::Decode` if the bytes are not a supported image.
    pub fn decode(&self) -> Result<image::DynamicImage, ImageError> {
        image::load_from_memory(&self.bytes)
            .map_err(|e| ImageError::Decode(format!("failed to decode {}: {e}", self.key)))
    }

    /// Consumes the value, returning the bytes.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

/// Tier an image was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOrigin {
    /// In-memory cache.
    Memory,
    /// On-disk cache.
    Disk,
    /// Downloaded by a fetcher.
    Network,
}

impl std::fmt::Display for ImageOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Disk => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// Successful result of a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDownload {
    /// The image bytes and their key.
    pub image: CachedImage,
    /// Where the bytes came from.
    pub origin: ImageOrigin,
}

impl ImageDownload {
    /// Creates a new download result.
    #[must_use]
    pub const fn new(image: CachedImage, origin: ImageOrigin) -> Self {
        Self { image, origin }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("https://upload.wikimedia.org/foo@2x.png", "https://upload.wikimedia.org/foo@2x.png" ; "already_canonical")]
    #[test_case("  https://example.com/a.png\n", "https://example.com/a.png" ; "trims_whitespace")]
    #[test_case("HTTPS://Example.COM/a.png", "https://example.com/a.png" ; "lowercases_scheme_and_host")]
    #[test_case("https://example.com:443/a.png", "https://example.com/a.png" ; "drops_default_port")]
    #[test_case("https://example.com/a.png#frag", "https://example.com/a.png" ; "drops_fragment")]
    #[test_case("//foo/bar", "https://foo/bar" ; "scheme_relative")]
    #[test_case("https://example.com/a b.png", "https://example.com/a%20b.png" ; "percent_encodes_path")]
    #[test_case("not a url", "not a url" ; "opaque_kept_verbatim")]
    fn test_key_normalization(input: &str, expected: &str) {
        assert_eq!(CacheKey::from_url(input).as_str(), expected);
    }

    #[test]
    fn test_same_logical_url_same_key() {
        let a = CacheKey::from_url("https://Example.com/img.png#top");
        let b = CacheKey::from_url("https://example.com/img.png");
        assert_eq!(a, b);
        assert_eq!(a.file_stem(), b.file_stem());
    }

    #[test]
    fn test_density_suffix_is_part_of_identity() {
        let a = CacheKey::from_url("https://example.com/foo@2x.png");
        let b = CacheKey::from_url("https://example.com/foo@3x.png");
        assert_ne!(a, b);
    }

    #[test]
    fn test_file_stem_is_filesystem_safe() {
        let key = CacheKey::from_url("https://example.com/../../etc/passwd?x=/y");
        let stem = key.file_stem();
        assert_eq!(stem.len(), 64);
        assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_format_sniffing() {
        let mut png = Vec::new();
        image::DynamicImage::new_rgb8(2, 2)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let image = CachedImage::new(CacheKey::from_url("https://example.com/a.png"), png);
        assert_eq!(image.format(), Some(image::ImageFormat::Png));
        assert_eq!(image.decode().unwrap().width(), 2);

        let junk = CachedImage::new(CacheKey::from_url("https://example.com/b"), &b"junk"[..]);
        assert_eq!(junk.format(), None);
        assert!(matches!(junk.decode(), Err(ImageError::Decode(_))));
    }
}
