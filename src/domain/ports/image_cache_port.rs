//! Port definitions for the memory, disk and combined image caches.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::domain::entities::{CacheKey, CacheTier, CacheType, DecodedImage, QueryOptions};

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors that can occur inside a cache store.
///
/// These never fail a load; the facade logs and drops them.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// I/O error during cache operation.
    #[error("IO error: {0}")]
    Io(String),
    /// Extended data could not be (de)serialised.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// No coder could encode the image for disk storage.
    #[error("Encode error: {0}")]
    Encode(String),
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Outcome of a disk expiration pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpirationReport {
    /// Entries removed for exceeding the age limit.
    pub expired: usize,
    /// Entries removed to get under the size or count limit.
    pub evicted: usize,
    /// Bytes freed in total.
    pub freed_bytes: u64,
}

/// Resolves once background cache work has finished.
#[derive(Debug)]
#[must_use = "dropping a Completion does not cancel the work, but loses the signal"]
pub struct Completion(Option<oneshot::Receiver<()>>);

impl Completion {
    /// A completion that is already resolved.
    pub const fn done() -> Self {
        Self(None)
    }

    /// Creates a pending completion and the sender that resolves it.
    pub fn pending() -> (oneshot::Sender<()>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self(Some(rx)))
    }

    /// Waits for the work to finish.
    ///
    /// Also returns if the worker went away without signalling.
    pub async fn wait(self) {
        if let Some(rx) = self.0 {
            let _ = rx.await;
        }
    }
}

/// Result of a cache query.
#[derive(Debug, Clone, Default)]
pub struct CacheQuery {
    /// Decoded image on a hit.
    pub image: Option<Arc<DecodedImage>>,
    /// Encoded bytes, when read from disk.
    pub data: Option<Bytes>,
    /// Tier that satisfied the query.
    pub tier: CacheTier,
}

impl CacheQuery {
    /// A miss.
    #[must_use]
    pub fn miss() -> Self {
        Self::default()
    }

    /// Returns true if an image was found.
    #[must_use]
    pub const fn is_hit(&self) -> bool {
        self.image.is_some()
    }
}

/// Bounded in-process store of decoded images.
/// Implementations must be thread-safe and keep critical sections short.
pub trait MemoryCachePort: Send + Sync {
    /// Returns the image for `key`, marking it recently used.
    fn get(&self, key: &CacheKey) -> Option<Arc<DecodedImage>>;

    /// Inserts `image` with the given cost, evicting older entries if over a limit.
    fn put(&self, key: CacheKey, image: Arc<DecodedImage>, cost: u64);

    /// Removes the entry for `key`.
    fn remove(&self, key: &CacheKey);

    /// Removes every entry.
    fn remove_all(&self);

    /// Sets the maximum entry count; zero means unlimited.
    fn set_count_limit(&self, limit: usize);

    /// Sets the maximum total cost; zero means unlimited.
    fn set_cost_limit(&self, limit: u64);

    /// Returns the current number of entries.
    fn len(&self) -> usize;

    /// Returns true if the cache is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the summed cost of all entries.
    fn total_cost(&self) -> u64;
}

/// Persistent key to bytes store.
///
/// Every method may block on the filesystem. Callers run mutations on a
/// single serial queue per store.
pub trait DiskCachePort: Send + Sync {
    /// Returns true if bytes exist for `key`.
    fn contains(&self, key: &CacheKey) -> bool;

    /// Reads the bytes for `key`.
    fn get(&self, key: &CacheKey) -> Option<Bytes>;

    /// Writes the bytes for `key`, replacing any previous value.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    fn put(&self, key: &CacheKey, data: &[u8]) -> CacheResult<()>;

    /// Reads the auxiliary blob stored beside `key`.
    fn get_extended(&self, key: &CacheKey) -> Option<Bytes>;

    /// Writes or, with `None`, deletes the auxiliary blob beside `key`.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    fn put_extended(&self, key: &CacheKey, data: Option<&[u8]>) -> CacheResult<()>;

    /// Removes `key` and its auxiliary blob.
    ///
    /// # Errors
    /// Returns error if an existing file cannot be removed.
    fn remove(&self, key: &CacheKey) -> CacheResult<()>;

    /// Removes every entry.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be read.
    fn remove_all(&self) -> CacheResult<()>;

    /// Applies the age limit, then the size and count limits.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be read.
    fn remove_expired(&self) -> CacheResult<ExpirationReport>;

    /// Returns the file path backing `key`.
    fn path_for_key(&self, key: &CacheKey) -> Option<PathBuf>;

    /// Number of stored entries.
    fn total_count(&self) -> usize;

    /// Total stored bytes.
    fn total_size(&self) -> u64;
}

/// Two-tier image cache consulted by the load manager.
#[async_trait::async_trait]
pub trait ImageCachePort: Send + Sync {
    /// Checks the memory tier only, on the calling thread.
    fn query_memory(&self, key: &CacheKey, options: &QueryOptions) -> Option<Arc<DecodedImage>>;

    /// Checks memory, then disk, blocking the calling thread on file I/O and decode.
    fn query_blocking(&self, key: &CacheKey, options: &QueryOptions) -> CacheQuery;

    /// Checks memory, then disk off the calling thread.
    async fn query(&self, key: &CacheKey, options: &QueryOptions) -> CacheQuery;

    /// Reads encoded bytes for `key` from disk.
    async fn disk_data(&self, key: &CacheKey) -> Option<Bytes>;

    /// Stores `image` in memory now and, if `cache_type` includes disk, on disk later.
    ///
    /// When `data` is `None` the image is encoded before writing.
    fn store(
        &self,
        image: Arc<DecodedImage>,
        data: Option<Bytes>,
        key: &CacheKey,
        cache_type: CacheType,
    ) -> Completion;

    /// Removes `key` from the tiers in `cache_type`.
    fn remove(&self, key: &CacheKey, cache_type: CacheType) -> Completion;

    /// Empties the memory tier.
    fn clear_memory(&self);

    /// Empties the disk tier.
    fn clear_disk(&self) -> Completion;

    /// Runs the disk expiration policy.
    fn remove_expired(&self) -> Completion;
}
