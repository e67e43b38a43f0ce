//! Two-tier image cache combining the memory and disk stores.

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::domain::entities::{
    CacheKey, CacheTier, CacheType, DecodeOptions, DecodedImage, EncodeOptions, ImageFormat,
    QueryOptions,
};
use crate::domain::ports::{
    CacheError, CacheQuery, CacheResult, Completion, DiskCachePort, ImageCachePort,
    MemoryCachePort,
};
use crate::domain::services::CoderRegistry;

use super::disk_cache::{DiskCache, DiskExpireType, DiskLimits, default_cache_root};
use super::io_queue::IoQueue;
use super::memory_cache::MemoryCache;

/// Configuration for [`ImageCache`]. Zero limits are unlimited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Keep decoded images in memory.
    pub should_cache_in_memory: bool,
    /// Persist encoded images on disk.
    pub should_cache_on_disk: bool,
    /// Memory budget in decoded bytes.
    pub max_memory_cost: u64,
    /// Memory entry budget.
    pub max_memory_count: usize,
    /// Disk entries older than this are expired.
    pub max_disk_age_secs: u64,
    /// Disk byte budget.
    pub max_disk_bytes: u64,
    /// Disk entry budget.
    pub max_disk_count: usize,
    /// Timestamp used to age disk entries.
    pub disk_expire_type: DiskExpireType,
    /// Subdirectory separating independent caches.
    pub namespace: String,
    /// Disk root override; defaults to the platform cache directory.
    pub directory: Option<PathBuf>,
    /// Period of the background expiration sweep; zero disables it.
    pub expiration_interval_secs: u64,
}

/// One week.
pub const DEFAULT_MAX_DISK_AGE_SECS: u64 = 60 * 60 * 24 * 7;

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            should_cache_in_memory: true,
            should_cache_on_disk: true,
            max_memory_cost: 0,
            max_memory_count: 0,
            max_disk_age_secs: DEFAULT_MAX_DISK_AGE_SECS,
            max_disk_bytes: 0,
            max_disk_count: 0,
            disk_expire_type: DiskExpireType::default(),
            namespace: "default".to_owned(),
            directory: None,
            expiration_interval_secs: 0,
        }
    }
}

impl CacheConfig {
    /// Directory the disk tier writes to.
    #[must_use]
    pub fn disk_root(&self) -> PathBuf {
        self.directory
            .as_ref()
            .map_or_else(|| default_cache_root(&self.namespace), |dir| dir.join(&self.namespace))
    }

    /// Disk limits derived from this configuration.
    #[must_use]
    pub const fn disk_limits(&self) -> DiskLimits {
        DiskLimits {
            max_age: if self.max_disk_age_secs > 0 {
                Some(Duration::from_secs(self.max_disk_age_secs))
            } else {
                None
            },
            max_bytes: self.max_disk_bytes,
            max_count: self.max_disk_count,
            expire_type: self.disk_expire_type,
        }
    }
}

enum DiskLookup {
    Hit(DecodedImage, Bytes),
    Corrupt,
    Miss,
}

/// Memory-first, disk-second image cache.
///
/// Memory reads and writes happen on the calling thread. Disk reads and
/// decodes run on the blocking pool; disk writes, encodes and removals run
/// on the cache's own serial [`IoQueue`]. Store-level failures are logged
/// and never surface to callers.
pub struct ImageCache {
    config: CacheConfig,
    memory: Arc<dyn MemoryCachePort>,
    disk: Arc<dyn DiskCachePort>,
    coders: Arc<CoderRegistry>,
    io: IoQueue,
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("config", &self.config)
            .field("io", &self.io)
            .finish_non_exhaustive()
    }
}

impl ImageCache {
    /// Creates a cache with a fresh memory store and a disk store at
    /// [`CacheConfig::disk_root`].
    ///
    /// # Errors
    /// Returns error if the disk queue thread cannot be started.
    pub fn new(config: CacheConfig, coders: Arc<CoderRegistry>) -> CacheResult<Self> {
        let memory = Arc::new(MemoryCache::new(
            config.max_memory_cost,
            config.max_memory_count,
        ));
        let disk = Arc::new(DiskCache::new(config.disk_root(), config.disk_limits()));
        Self::with_stores(config, memory, disk, coders)
    }

    /// Creates a cache over caller-supplied stores.
    ///
    /// # Errors
    /// Returns error if the disk queue thread cannot be started.
    pub fn with_stores(
        config: CacheConfig,
        memory: Arc<dyn MemoryCachePort>,
        disk: Arc<dyn DiskCachePort>,
        coders: Arc<CoderRegistry>,
    ) -> CacheResult<Self> {
        let io = IoQueue::new(format!("webimage-io-{}", config.namespace))?;
        debug!(namespace = %config.namespace, "Image cache created");
        Ok(Self {
            config,
            memory,
            disk,
            coders,
            io,
        })
    }

    /// The cache's configuration.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The memory tier.
    #[must_use]
    pub fn memory(&self) -> &Arc<dyn MemoryCachePort> {
        &self.memory
    }

    /// The disk tier. Mutate it only through this cache.
    #[must_use]
    pub fn disk(&self) -> &Arc<dyn DiskCachePort> {
        &self.disk
    }

    /// Number of entries on disk.
    pub async fn disk_count(&self) -> usize {
        let disk = self.disk.clone();
        self.io.run(move || disk.total_count()).await.unwrap_or(0)
    }

    /// Bytes stored on disk.
    pub async fn disk_size(&self) -> u64 {
        let disk = self.disk.clone();
        self.io.run(move || disk.total_size()).await.unwrap_or(0)
    }

    /// Runs [`ImageCachePort::remove_expired`] every `interval` until the
    /// cache is dropped or the handle aborted.
    pub fn spawn_expiration_sweep(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            debug!(interval_secs = interval.as_secs(), "Starting disk expiration sweep");
            loop {
                tokio::time::sleep(interval).await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                cache.remove_expired().wait().await;
            }
        })
    }

    fn reads_memory(&self, cache_type: CacheType) -> bool {
        self.config.should_cache_in_memory && cache_type.includes_memory()
    }

    fn reads_disk(&self, cache_type: CacheType) -> bool {
        self.config.should_cache_on_disk && cache_type.includes_disk()
    }

    fn memory_hit(&self, key: &CacheKey, options: &QueryOptions) -> Option<Arc<DecodedImage>> {
        if !self.reads_memory(options.cache_type) {
            return None;
        }
        let image = self.memory.get(key)?;
        if options.require_all_frames && !image.is_fully_decoded() {
            trace!(key = %key, "Memory hit lacks frames, skipping");
            return None;
        }
        if options.decode.first_frame_only && image.frames().len() > 1 {
            return Some(Arc::new(image.first_frame()));
        }
        Some(image)
    }

    fn lookup_disk(
        disk: &dyn DiskCachePort,
        coders: &CoderRegistry,
        key: &CacheKey,
        decode: &DecodeOptions,
    ) -> DiskLookup {
        let Some(data) = disk.get(key) else {
            return DiskLookup::Miss;
        };
        match coders.decode(&data, decode) {
            Ok(image) => {
                let extended = disk
                    .get_extended(key)
                    .and_then(|raw| serde_json::from_slice(&raw).ok());
                let image = if extended.is_some() {
                    image.with_extended_data(extended)
                } else {
                    image
                };
                DiskLookup::Hit(image, data)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Corrupt disk cache entry");
                DiskLookup::Corrupt
            }
        }
    }

    fn finish_disk_lookup(
        &self,
        key: &CacheKey,
        options: &QueryOptions,
        lookup: DiskLookup,
    ) -> CacheQuery {
        match lookup {
            DiskLookup::Hit(image, data) => {
                let image = Arc::new(image);
                if self.reads_memory(options.cache_type) {
                    self.memory
                        .put(key.clone(), image.clone(), image.memory_cost());
                }
                trace!(key = %key, "Disk cache hit decoded");
                CacheQuery {
                    image: Some(image),
                    data: Some(data),
                    tier: CacheTier::Disk,
                }
            }
            DiskLookup::Corrupt => {
                let _ = self.remove(key, CacheType::Disk);
                CacheQuery::miss()
            }
            DiskLookup::Miss => CacheQuery::miss(),
        }
    }

    fn write_to_disk(
        disk: &dyn DiskCachePort,
        coders: &CoderRegistry,
        key: &CacheKey,
        image: &DecodedImage,
        data: Option<Bytes>,
    ) -> CacheResult<()> {
        let data = match data {
            Some(data) => data,
            None => coders
                .encode(image, ImageFormat::UNDEFINED, &EncodeOptions::default())
                .map(Bytes::from)
                .map_err(|e| CacheError::Encode(e.to_string()))?,
        };
        disk.put(key, &data)?;
        let extended = image
            .extended_data()
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        disk.put_extended(key, extended.as_deref())
    }

    fn enqueue(&self, job: impl FnOnce() + Send + 'static) -> Completion {
        let (tx, completion) = Completion::pending();
        self.io.execute(move || {
            job();
            let _ = tx.send(());
        });
        completion
    }
}

#[async_trait::async_trait]
impl ImageCachePort for ImageCache {
    fn query_memory(&self, key: &CacheKey, options: &QueryOptions) -> Option<Arc<DecodedImage>> {
        self.memory_hit(key, options)
    }

    fn query_blocking(&self, key: &CacheKey, options: &QueryOptions) -> CacheQuery {
        if let Some(image) = self.memory_hit(key, options) {
            let data = if options.query_memory_data {
                self.disk.get(key)
            } else {
                None
            };
            return CacheQuery {
                image: Some(image),
                data,
                tier: CacheTier::Memory,
            };
        }
        if !self.reads_disk(options.cache_type) {
            return CacheQuery::miss();
        }
        let lookup = Self::lookup_disk(self.disk.as_ref(), &self.coders, key, &options.decode);
        self.finish_disk_lookup(key, options, lookup)
    }

    async fn query(&self, key: &CacheKey, options: &QueryOptions) -> CacheQuery {
        if let Some(image) = self.memory_hit(key, options) {
            let data = if options.query_memory_data {
                self.disk_data(key).await
            } else {
                None
            };
            return CacheQuery {
                image: Some(image),
                data,
                tier: CacheTier::Memory,
            };
        }
        if !self.reads_disk(options.cache_type) {
            return CacheQuery::miss();
        }

        let disk = self.disk.clone();
        let coders = self.coders.clone();
        let owned_key = key.clone();
        let decode = options.decode.clone();
        let result = tokio::task::spawn_blocking(move || {
            Self::lookup_disk(disk.as_ref(), &coders, &owned_key, &decode)
        })
        .await;

        match result {
            Ok(lookup) => self.finish_disk_lookup(key, options, lookup),
            Err(e) => {
                error!(key = %key, error = %e, "Disk lookup task panicked");
                CacheQuery::miss()
            }
        }
    }

    async fn disk_data(&self, key: &CacheKey) -> Option<Bytes> {
        if !self.config.should_cache_on_disk {
            return None;
        }
        let disk = self.disk.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || disk.get(&key))
            .await
            .ok()
            .flatten()
    }

    fn store(
        &self,
        image: Arc<DecodedImage>,
        data: Option<Bytes>,
        key: &CacheKey,
        cache_type: CacheType,
    ) -> Completion {
        if self.reads_memory(cache_type) {
            self.memory.put(key.clone(), image.clone(), image.memory_cost());
        }
        if !self.reads_disk(cache_type) {
            return Completion::done();
        }

        let disk = self.disk.clone();
        let coders = self.coders.clone();
        let key = key.clone();
        self.enqueue(move || {
            if let Err(e) = Self::write_to_disk(disk.as_ref(), &coders, &key, &image, data) {
                warn!(key = %key, error = %e, "Failed to write disk cache entry");
            }
        })
    }

    fn remove(&self, key: &CacheKey, cache_type: CacheType) -> Completion {
        if cache_type.includes_memory() {
            self.memory.remove(key);
        }
        if !cache_type.includes_disk() {
            return Completion::done();
        }
        let disk = self.disk.clone();
        let key = key.clone();
        self.enqueue(move || {
            if let Err(e) = disk.remove(&key) {
                warn!(key = %key, error = %e, "Failed to remove disk cache entry");
            }
        })
    }

    fn clear_memory(&self) {
        self.memory.remove_all();
    }

    fn clear_disk(&self) -> Completion {
        let disk = self.disk.clone();
        self.enqueue(move || {
            if let Err(e) = disk.remove_all() {
                warn!(error = %e, "Failed to clear disk cache");
            }
        })
    }

    fn remove_expired(&self) -> Completion {
        let disk = self.disk.clone();
        self.enqueue(move || {
            if let Err(e) = disk.remove_expired() {
                warn!(error = %e, "Disk cache expiration failed");
            }
        })
    }
}
