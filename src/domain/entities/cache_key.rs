//! Cache keys and their derived forms.

use std::sync::Arc;

use reqwest::Url;

/// Normalises a resource URL into a cache key string.
pub type CacheKeyFilter = Arc<dyn Fn(&Url) -> String + Send + Sync>;

/// Opaque identifier for a cacheable resource.
///
/// Usually the absolute string of the image URL, optionally passed through a
/// [`CacheKeyFilter`]. Equal keys address the same cache slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Creates a key from any string-like input.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Builds the key for a URL, applying `filter` when present.
    #[must_use]
    pub fn for_url(url: &Url, filter: Option<&CacheKeyFilter>) -> Self {
        match filter {
            Some(filter) => Self(filter(url)),
            None => Self(url.as_str().to_owned()),
        }
    }

    /// Derives the key under which a thumbnail variant of this resource is cached.
    #[must_use]
    pub fn thumbnail(&self, width: u32, height: u32, preserve_aspect_ratio: bool) -> Self {
        Self(format!(
            "{}-Thumbnail({width}x{height},{preserve_aspect_ratio})",
            self.0
        ))
    }

    /// Returns a filesystem-safe, 128-bit SHA-256 prefix of the key.
    #[must_use]
    pub fn hashed(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16])
    }

    /// Reads an `@2x` / `@3x` scale marker from the key's file name.
    #[must_use]
    pub fn scale_factor(&self) -> Option<f32> {
        let path = self.0.split(['?', '#']).next().unwrap_or("");
        let file_name = path.rsplit('/').next().unwrap_or(path);
        let stem = file_name.rsplit_once('.').map_or(file_name, |(stem, _)| stem);
        if stem.ends_with("@2x") {
            Some(2.0)
        } else if stem.ends_with("@3x") {
            Some(3.0)
        } else {
            None
        }
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the key is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
