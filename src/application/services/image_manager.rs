//! Load coordination.
//!
//! [`ImageManager`] turns a URL into a decoded image: it consults the cache,
//! falls back to the fetcher, decodes through the coder registry and stores
//! the result. Concurrent requests for the same key and decode options share
//! one in-flight load; each caller gets its own event channel and cancel
//! token.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::domain::entities::{
    CacheKey, CacheKeyFilter, CacheType, DecodedImage, ImageSource, LoadedImage, RequestOptions,
};
use crate::domain::errors::{ImageError, NetworkErrorKind};
use crate::domain::ports::{FetchRequest, ImageCachePort, ImageFetcher, IncrementalDecoder};
use crate::domain::services::CoderRegistry;

/// Produces the bytes persisted for a freshly downloaded image.
///
/// Receives the decoded image, the downloaded bytes and the source URL.
/// Returning `None` stores an encoding of the decoded image instead.
pub type CacheSerializer = Arc<dyn Fn(&DecodedImage, &Bytes, &Url) -> Option<Bytes> + Send + Sync>;

/// Configuration for [`ImageManager`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Refuse URLs whose last load failed permanently.
    pub block_failed_urls: bool,
}

/// Something that happened to a load, as seen by one subscriber.
#[derive(Debug, Clone)]
pub enum LoadEvent {
    /// Bytes received so far.
    Progress {
        /// Bytes received.
        received: u64,
        /// Total size, if known.
        expected: Option<u64>,
    },
    /// Progressive decode of the bytes received so far.
    Partial(Arc<DecodedImage>),
    /// Cached copy served while a refresh runs.
    Intermediate(LoadedImage),
    /// Final result. Sent exactly once, after every other event.
    Completed(Result<LoadedImage, ImageError>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LoadKey {
    key: CacheKey,
    fingerprint: String,
}

/// Identifies one subscriber of one load.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CancelToken {
    load: LoadKey,
    subscriber: Uuid,
}

impl CancelToken {
    /// Cache key of the load this token belongs to.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.load.key
    }
}

/// A caller's view of a load.
///
/// Dropping the handle stops event delivery but lets the load finish and
/// populate the cache; use [`ImageManager::cancel`] to stop it.
#[derive(Debug)]
pub struct LoadHandle {
    token: CancelToken,
    events: mpsc::UnboundedReceiver<LoadEvent>,
}

impl LoadHandle {
    /// Token for [`ImageManager::cancel`].
    #[must_use]
    pub const fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Waits for the next event. Returns `None` after `Completed` or once cancelled.
    pub async fn next_event(&mut self) -> Option<LoadEvent> {
        self.events.recv().await
    }

    /// Skips intermediate events and waits for the final result.
    ///
    /// # Errors
    /// Returns the load's error, or `Cancelled` if this subscriber was cancelled.
    pub async fn finished(mut self) -> Result<LoadedImage, ImageError> {
        while let Some(event) = self.events.recv().await {
            if let LoadEvent::Completed(result) = event {
                return result;
            }
        }
        Err(ImageError::Cancelled)
    }
}

struct Subscriber {
    id: Uuid,
    progressive: bool,
    events: mpsc::UnboundedSender<LoadEvent>,
}

struct PendingLoad {
    generation: Uuid,
    subscribers: Vec<Subscriber>,
    task: AbortHandle,
}

struct LoadJob {
    load: LoadKey,
    generation: Uuid,
    url: Url,
    store_key: CacheKey,
    options: RequestOptions,
}

struct ManagerInner {
    cache: Arc<dyn ImageCachePort>,
    fetcher: Arc<dyn ImageFetcher>,
    coders: Arc<CoderRegistry>,
    config: ManagerConfig,
    key_filter: RwLock<Option<CacheKeyFilter>>,
    serializer: RwLock<Option<CacheSerializer>>,
    pending: Mutex<HashMap<LoadKey, PendingLoad>>,
    failed_urls: Mutex<HashSet<String>>,
}

/// Deduplicating image loader over a cache, a fetcher and a coder registry.
///
/// Cloning is cheap; clones share the same in-flight loads.
#[derive(Clone)]
pub struct ImageManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for ImageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageManager")
            .field("config", &self.inner.config)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl ImageManager {
    /// Creates a manager.
    pub fn new(
        cache: Arc<dyn ImageCachePort>,
        fetcher: Arc<dyn ImageFetcher>,
        coders: Arc<CoderRegistry>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                cache,
                fetcher,
                coders,
                config,
                key_filter: RwLock::new(None),
                serializer: RwLock::new(None),
                pending: Mutex::new(HashMap::new()),
                failed_urls: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// The cache this manager reads and writes.
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn ImageCachePort> {
        &self.inner.cache
    }

    /// The coder registry used for decoding.
    #[must_use]
    pub fn coders(&self) -> &Arc<CoderRegistry> {
        &self.inner.coders
    }

    /// The manager's configuration.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Sets or clears the URL to cache key normaliser.
    pub fn set_cache_key_filter(&self, filter: Option<CacheKeyFilter>) {
        *self.inner.key_filter.write() = filter;
    }

    /// Sets or clears the hook choosing what gets written to disk.
    pub fn set_cache_serializer(&self, serializer: Option<CacheSerializer>) {
        *self.inner.serializer.write() = serializer;
    }

    /// Cache key for `url` after the key filter.
    #[must_use]
    pub fn cache_key_for(&self, url: &Url) -> CacheKey {
        CacheKey::for_url(url, self.inner.key_filter.read().as_ref())
    }

    /// Starts loading `url`, or joins an identical load already in flight.
    ///
    /// With `query_memory_sync` or `query_disk_sync` a cache hit is resolved
    /// before this returns and the handle already holds the result. Must be
    /// called inside a Tokio runtime.
    ///
    /// # Errors
    /// Returns `InvalidKey` for an unparsable URL or empty cache key and
    /// `RecentlyFailed` for a blocked URL. No I/O happens in either case.
    pub fn request(&self, url: &str, mut options: RequestOptions) -> Result<LoadHandle, ImageError> {
        let url = Url::parse(url).map_err(|e| ImageError::invalid_key(format!("{url:?}: {e}")))?;
        let key = self.cache_key_for(&url);
        if key.is_empty() {
            return Err(ImageError::invalid_key("cache key filter produced an empty key"));
        }
        if self.inner.config.block_failed_urls && !options.retry_failed && self.is_blocked(&url) {
            debug!(url = %url, "Skipping recently failed URL");
            return Err(ImageError::RecentlyFailed {
                url: url.to_string(),
            });
        }

        options.decode = options.decode.resolved_for(&key);
        let store_key = options.decode.cache_key(&key);
        let load = LoadKey {
            key,
            fingerprint: options.dedup_fingerprint(),
        };
        let token = CancelToken {
            load: load.clone(),
            subscriber: Uuid::new_v4(),
        };
        let (tx, events) = mpsc::unbounded_channel();

        if let Some(loaded) = self.query_sync(&store_key, &options) {
            trace!(key = %store_key, source = %loaded.source, "Synchronous cache hit");
            let _ = tx.send(LoadEvent::Completed(Ok(loaded)));
            return Ok(LoadHandle { token, events });
        }

        let subscriber = Subscriber {
            id: token.subscriber,
            progressive: options.progressive,
            events: tx,
        };

        let mut pending = self.inner.pending.lock();
        if let Some(existing) = pending.get_mut(&load) {
            existing.subscribers.push(subscriber);
            trace!(
                key = %load.key,
                subscribers = existing.subscribers.len(),
                "Joined in-flight load"
            );
            return Ok(LoadHandle { token, events });
        }

        let generation = Uuid::new_v4();
        let job = LoadJob {
            load: load.clone(),
            generation,
            url,
            store_key,
            options,
        };
        let task = tokio::spawn(ManagerInner::run(self.inner.clone(), job));
        pending.insert(
            load,
            PendingLoad {
                generation,
                subscribers: vec![subscriber],
                task: task.abort_handle(),
            },
        );
        Ok(LoadHandle { token, events })
    }

    /// Loads `url` and waits for the result.
    ///
    /// # Errors
    /// Returns error if the load fails.
    pub async fn load(&self, url: &str, options: RequestOptions) -> Result<LoadedImage, ImageError> {
        self.request(url, options)?.finished().await
    }

    /// Removes one subscriber. The shared load is aborted once no subscriber
    /// is left.
    ///
    /// Returns false if the token was unknown or its load already finished.
    pub fn cancel(&self, token: &CancelToken) -> bool {
        let mut pending = self.inner.pending.lock();
        let Some(load) = pending.get_mut(&token.load) else {
            return false;
        };
        let before = load.subscribers.len();
        load.subscribers.retain(|s| s.id != token.subscriber);
        if load.subscribers.len() == before {
            return false;
        }
        if load.subscribers.is_empty()
            && let Some(load) = pending.remove(&token.load)
        {
            load.task.abort();
            debug!(key = %token.load.key, "Load cancelled");
        }
        true
    }

    /// Aborts every in-flight load. Returns how many were aborted.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingLoad> = self.inner.pending.lock().drain().map(|(_, l)| l).collect();
        for load in &drained {
            load.task.abort();
        }
        if !drained.is_empty() {
            debug!(count = drained.len(), "Cancelled all pending image loads");
        }
        drained.len()
    }

    /// Number of loads in flight.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Returns true if `url` is on the failed-URL blocklist.
    #[must_use]
    pub fn is_blocked(&self, url: &Url) -> bool {
        self.inner.failed_urls.lock().contains(url.as_str())
    }

    /// Removes `url` from the failed-URL blocklist.
    pub fn unblock(&self, url: &Url) {
        self.inner.failed_urls.lock().remove(url.as_str());
    }

    /// Empties the failed-URL blocklist.
    pub fn clear_failed_urls(&self) {
        self.inner.failed_urls.lock().clear();
    }

    fn query_sync(&self, key: &CacheKey, options: &RequestOptions) -> Option<LoadedImage> {
        if options.from_loader_only
            || options.refresh_cached
            || options.query_cache_type == CacheType::None
        {
            return None;
        }
        let query = options.query_options();
        if options.query_disk_sync {
            let result = self.inner.cache.query_blocking(key, &query);
            let image = result.image?;
            return Some(LoadedImage {
                key: key.clone(),
                image,
                data: result.data,
                source: result.tier.into(),
            });
        }
        if options.query_memory_sync {
            let image = self.inner.cache.query_memory(key, &query)?;
            return Some(LoadedImage {
                key: key.clone(),
                image,
                data: None,
                source: ImageSource::MemoryCache,
            });
        }
        None
    }
}

impl ManagerInner {
    async fn run(self: Arc<Self>, job: LoadJob) {
        let result = self.load(&job).await;
        if self.config.block_failed_urls {
            match &result {
                Err(e) if e.should_block_url() => {
                    self.failed_urls.lock().insert(job.url.to_string());
                }
                Ok(_) => {
                    self.failed_urls.lock().remove(job.url.as_str());
                }
                Err(_) => {}
            }
        }
        self.complete(&job, result);
    }

    async fn load(&self, job: &LoadJob) -> Result<LoadedImage, ImageError> {
        let options = &job.options;
        let mut cached: Option<LoadedImage> = None;

        if !options.from_loader_only && options.query_cache_type != CacheType::None {
            let mut query_options = options.query_options();
            query_options.query_memory_data |= options.refresh_cached;
            let query = self.cache.query(&job.store_key, &query_options).await;
            if let Some(image) = query.image {
                let loaded = LoadedImage {
                    key: job.store_key.clone(),
                    image,
                    data: query.data,
                    source: query.tier.into(),
                };
                trace!(key = %job.store_key, source = %loaded.source, "Cache hit");
                if !options.refresh_cached || options.from_cache_only {
                    return Ok(loaded);
                }
                self.broadcast(job, &LoadEvent::Intermediate(loaded.clone()), false);
                cached = Some(loaded);
            } else {
                trace!(key = %job.store_key, "Cache miss");
            }
        }

        if options.from_cache_only {
            return Err(ImageError::NotCached);
        }
        if !self.fetcher.can_fetch(&job.url) {
            return Err(ImageError::invalid_key(format!(
                "no fetcher for {}",
                job.url
            )));
        }

        let data = self.fetch(job).await?;
        if let Some(cached) = cached
            && cached.data.as_ref() == Some(&data)
        {
            debug!(key = %job.store_key, "Refreshed data unchanged");
            return Ok(cached);
        }

        let image = self.decode(job, data.clone()).await?;
        self.store(job, &image, &data).await;

        Ok(LoadedImage {
            key: job.store_key.clone(),
            image,
            data: Some(data),
            source: ImageSource::Network,
        })
    }

    async fn fetch(&self, job: &LoadJob) -> Result<Bytes, ImageError> {
        let options = &job.options;
        let request = FetchRequest {
            url: job.url.clone(),
            priority: options.priority,
            progressive: options.progressive,
            acceptable_status_codes: options.acceptable_status_codes.clone(),
            acceptable_content_types: options.acceptable_content_types.clone(),
        };
        debug!(url = %job.url, priority = ?options.priority, "Fetching image");

        let mut stream = self.fetcher.fetch(request);
        let mut decoder: Option<Box<dyn IncrementalDecoder>> = None;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            self.broadcast(
                job,
                &LoadEvent::Progress {
                    received: chunk.received,
                    expected: chunk.expected,
                },
                false,
            );
            if chunk.finished {
                return chunk.data.ok_or_else(|| {
                    ImageError::network(NetworkErrorKind::Transport, "fetch finished without data")
                });
            }
            if let Some(data) = chunk.data {
                decoder = self.decode_partial(job, decoder, data).await;
            }
        }
        Err(ImageError::network(
            NetworkErrorKind::Transport,
            "connection closed before the body finished",
        ))
    }

    async fn decode_partial(
        &self,
        job: &LoadJob,
        decoder: Option<Box<dyn IncrementalDecoder>>,
        data: Bytes,
    ) -> Option<Box<dyn IncrementalDecoder>> {
        if !self.has_progressive_subscriber(job) {
            return decoder;
        }
        let mut decoder = match decoder {
            Some(decoder) => decoder,
            None => self
                .coders
                .incremental_decoder(&data, &job.options.decode)?,
        };
        let (decoder, partial) = tokio::task::spawn_blocking(move || {
            decoder.update_data(data, false);
            let partial = decoder.decode_so_far();
            (decoder, partial)
        })
        .await
        .ok()?;
        if let Some(partial) = partial {
            self.broadcast(job, &LoadEvent::Partial(Arc::new(partial)), true);
        }
        Some(decoder)
    }

    async fn decode(&self, job: &LoadJob, data: Bytes) -> Result<Arc<DecodedImage>, ImageError> {
        let coders = self.coders.clone();
        let options = job.options.decode.clone();
        match tokio::task::spawn_blocking(move || coders.decode(&data, &options)).await {
            Ok(Ok(image)) => Ok(Arc::new(image)),
            Ok(Err(e)) => {
                warn!(url = %job.url, error = %e, "Failed to decode image");
                Err(e.into())
            }
            Err(e) => {
                error!(url = %job.url, error = %e, "Decode task panicked");
                Err(ImageError::bad_data("decode task panicked"))
            }
        }
    }

    async fn store(&self, job: &LoadJob, image: &Arc<DecodedImage>, data: &Bytes) {
        let options = &job.options;
        if options.store_cache_type == CacheType::None {
            return;
        }
        let serializer = self.serializer.read().clone();
        let stored = match serializer {
            Some(serialize) => serialize(image, data, &job.url),
            // Thumbnails are cached under their own key, so persist the thumbnail.
            None if options.decode.thumbnail_pixel_size.is_some() => None,
            None => Some(data.clone()),
        };
        let completion = self
            .cache
            .store(image.clone(), stored, &job.store_key, options.store_cache_type);
        if options.wait_store_cache {
            completion.wait().await;
        }
    }

    fn has_progressive_subscriber(&self, job: &LoadJob) -> bool {
        self.pending
            .lock()
            .get(&job.load)
            .filter(|load| load.generation == job.generation)
            .is_some_and(|load| load.subscribers.iter().any(|s| s.progressive))
    }

    fn broadcast(&self, job: &LoadJob, event: &LoadEvent, progressive_only: bool) {
        let pending = self.pending.lock();
        let Some(load) = pending
            .get(&job.load)
            .filter(|load| load.generation == job.generation)
        else {
            return;
        };
        for subscriber in load
            .subscribers
            .iter()
            .filter(|s| s.progressive || !progressive_only)
        {
            let _ = subscriber.events.send(event.clone());
        }
    }

    fn complete(&self, job: &LoadJob, result: Result<LoadedImage, ImageError>) {
        let subscribers = {
            let mut pending = self.pending.lock();
            let current = pending
                .get(&job.load)
                .is_some_and(|load| load.generation == job.generation);
            if !current {
                return;
            }
            pending
                .remove(&job.load)
                .map(|load| load.subscribers)
                .unwrap_or_default()
        };

        match &result {
            Ok(loaded) => debug!(
                key = %job.store_key,
                source = %loaded.source,
                subscribers = subscribers.len(),
                "Load completed"
            ),
            Err(e) => debug!(
                key = %job.store_key,
                error = %e,
                subscribers = subscribers.len(),
                "Load failed"
            ),
        }

        for subscriber in subscribers {
            let _ = subscriber
                .events
                .send(LoadEvent::Completed(result.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::domain::entities::{DecodeOptions, EncodeOptions, ImageFormat};
    use crate::domain::ports::mocks::MockFetcher;
    use crate::domain::ports::{CoderResult, ImageCoder};
    use crate::infrastructure::codec::{BufferedIncrementalDecoder, default_registry};
    use crate::infrastructure::image::{CacheConfig, ImageCache};
    use crate::test_support::png_bytes;

    const URL: &str = "https://example.com/a.png";

    struct Harness {
        manager: ImageManager,
        fetcher: Arc<MockFetcher>,
        cache: Arc<ImageCache>,
        _dir: TempDir,
    }

    fn harness_with(config: ManagerConfig, coders: CoderRegistry) -> Harness {
        let dir = TempDir::new().unwrap();
        let coders = Arc::new(coders);
        let cache = Arc::new(
            ImageCache::new(
                CacheConfig {
                    directory: Some(dir.path().to_path_buf()),
                    ..CacheConfig::default()
                },
                coders.clone(),
            )
            .unwrap(),
        );
        let fetcher = Arc::new(MockFetcher::new());
        let manager = ImageManager::new(cache.clone(), fetcher.clone(), coders, config);
        Harness {
            manager,
            fetcher,
            cache,
            _dir: dir,
        }
    }

    fn harness() -> Harness {
        harness_with(ManagerConfig::default(), default_registry())
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition never became true");
    }

    /// Decodes any bytes into a `len` x 1 image, so partial data decodes too.
    #[derive(Clone, Copy)]
    struct LengthCoder;

    impl ImageCoder for LengthCoder {
        fn name(&self) -> &'static str {
            "length"
        }

        fn can_decode(&self, data: &[u8]) -> bool {
            !data.is_empty()
        }

        #[allow(clippy::cast_possible_truncation)]
        fn decode(&self, data: &[u8], _options: &DecodeOptions) -> CoderResult<DecodedImage> {
            Ok(DecodedImage::still(
                image::DynamicImage::new_rgba8(data.len() as u32, 1),
                ImageFormat::PNG,
            ))
        }

        fn can_encode(&self, _format: ImageFormat) -> bool {
            true
        }

        fn encode(
            &self,
            _image: &DecodedImage,
            _format: ImageFormat,
            _options: &EncodeOptions,
        ) -> CoderResult<Vec<u8>> {
            Ok(vec![0])
        }

        fn can_incremental_decode(&self, _data: &[u8]) -> bool {
            true
        }

        fn incremental_decoder(
            &self,
            options: &DecodeOptions,
        ) -> Option<Box<dyn IncrementalDecoder>> {
            Some(Box::new(BufferedIncrementalDecoder::new(*self, options.clone())))
        }
    }

    #[tokio::test]
    async fn test_network_load_populates_both_tiers() {
        let h = harness();
        h.fetcher.respond(URL, png_bytes(8, 6));

        let options = RequestOptions {
            wait_store_cache: true,
            ..RequestOptions::default()
        };
        let loaded = h.manager.load(URL, options).await.unwrap();
        assert_eq!(loaded.source, ImageSource::Network);
        assert_eq!((loaded.image.width(), loaded.image.height()), (8, 6));
        assert!(loaded.data.is_some());

        let key = CacheKey::new(URL);
        assert!(h.cache.memory().get(&key).is_some());
        assert!(h.cache.disk().contains(&key));

        let again = h.manager.load(URL, RequestOptions::default()).await.unwrap();
        assert_eq!(again.source, ImageSource::MemoryCache);
        assert_eq!(h.fetcher.fetch_count(), 1);
        assert_eq!(h.manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let h = harness();
        h.fetcher.respond(URL, png_bytes(4, 4));
        h.fetcher.hold();

        let handles: Vec<LoadHandle> = (0..3)
            .map(|_| h.manager.request(URL, RequestOptions::default()).unwrap())
            .collect();
        assert_eq!(h.manager.pending_count(), 1);
        h.fetcher.release();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.finished().await.unwrap());
        }

        assert_eq!(h.fetcher.fetch_count(), 1);
        assert!(Arc::ptr_eq(&results[0].image, &results[1].image));
        assert!(Arc::ptr_eq(&results[0].image, &results[2].image));
    }

    #[tokio::test]
    async fn test_errors_reach_every_subscriber() {
        let h = harness();
        h.fetcher.hold();

        let a = h.manager.request(URL, RequestOptions::default()).unwrap();
        let b = h.manager.request(URL, RequestOptions::default()).unwrap();
        h.fetcher.release();

        assert!(a.finished().await.unwrap_err().is_network_error());
        assert!(b.finished().await.unwrap_err().is_network_error());
        assert_eq!(h.fetcher.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelling_every_subscriber_cancels_fetch() {
        let h = harness();
        h.fetcher.respond(URL, png_bytes(4, 4));
        h.fetcher.hold();

        let mut a = h.manager.request(URL, RequestOptions::default()).unwrap();
        let mut b = h.manager.request(URL, RequestOptions::default()).unwrap();
        let fetcher = h.fetcher.clone();
        wait_until(move || fetcher.fetch_count() == 1).await;

        assert!(h.manager.cancel(a.token()));
        assert_eq!(h.fetcher.cancel_count(), 0);
        assert!(h.manager.cancel(b.token()));
        assert!(!h.manager.cancel(b.token()));

        let fetcher = h.fetcher.clone();
        wait_until(move || fetcher.cancel_count() == 1).await;
        h.fetcher.release();

        assert!(a.next_event().await.is_none());
        assert!(b.next_event().await.is_none());
        assert_eq!(h.fetcher.cancel_count(), 1);
        assert_eq!(h.manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_partial_cancel_keeps_other_subscribers() {
        let h = harness();
        h.fetcher.respond(URL, png_bytes(4, 4));
        h.fetcher.hold();

        let a = h.manager.request(URL, RequestOptions::default()).unwrap();
        let b = h.manager.request(URL, RequestOptions::default()).unwrap();
        let fetcher = h.fetcher.clone();
        wait_until(move || fetcher.fetch_count() == 1).await;

        h.manager.cancel(a.token());
        h.fetcher.release();

        assert!(b.finished().await.is_ok());
        assert!(matches!(a.finished().await, Err(ImageError::Cancelled)));
        assert_eq!(h.fetcher.cancel_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let h = harness();
        h.fetcher.hold();

        let a = h.manager.request(URL, RequestOptions::default()).unwrap();
        let b = h
            .manager
            .request("https://example.com/b.png", RequestOptions::default())
            .unwrap();

        assert_eq!(h.manager.cancel_all(), 2);
        assert_eq!(h.manager.pending_count(), 0);
        assert!(matches!(a.finished().await, Err(ImageError::Cancelled)));
        assert!(matches!(b.finished().await, Err(ImageError::Cancelled)));
    }

    #[tokio::test]
    async fn test_thumbnails_load_independently() {
        let h = harness();
        h.fetcher.respond(URL, png_bytes(400, 300));

        let small = h
            .manager
            .request(
                URL,
                RequestOptions {
                    decode: DecodeOptions::default().with_thumbnail(100, 100),
                    ..RequestOptions::default()
                },
            )
            .unwrap();
        let large = h
            .manager
            .request(
                URL,
                RequestOptions {
                    decode: DecodeOptions::default().with_thumbnail(200, 200),
                    ..RequestOptions::default()
                },
            )
            .unwrap();
        assert_eq!(h.manager.pending_count(), 2);

        let small = small.finished().await.unwrap();
        let large = large.finished().await.unwrap();
        assert_eq!((small.image.width(), small.image.height()), (100, 75));
        assert_eq!((large.image.width(), large.image.height()), (200, 150));
        assert_ne!(small.key, large.key);
        assert_eq!(h.fetcher.fetch_count_for(URL), 2);

        let base = CacheKey::new(URL);
        assert!(h.cache.memory().get(&base.thumbnail(100, 100, true)).is_some());
        assert!(h.cache.memory().get(&base.thumbnail(200, 200, true)).is_some());
        assert!(h.cache.memory().get(&base).is_none());
    }

    #[tokio::test]
    async fn test_disk_hit_then_memory_hit() {
        let h = harness();
        let key = CacheKey::new(URL);
        h.cache.disk().put(&key, &png_bytes(5, 5)).unwrap();

        let options = RequestOptions {
            from_cache_only: true,
            ..RequestOptions::default()
        };
        let first = h.manager.load(URL, options.clone()).await.unwrap();
        assert_eq!(first.source, ImageSource::DiskCache);

        let second = h.manager.load(URL, options).await.unwrap();
        assert_eq!(second.source, ImageSource::MemoryCache);
        assert_eq!(h.fetcher.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_only_miss() {
        let h = harness();
        let options = RequestOptions {
            from_cache_only: true,
            ..RequestOptions::default()
        };
        let result = h.manager.load(URL, options).await;
        assert!(matches!(result, Err(ImageError::NotCached)));
        assert_eq!(h.fetcher.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_loader_only_skips_cache() {
        let h = harness();
        h.fetcher.respond(URL, png_bytes(3, 3));
        h.manager.load(URL, RequestOptions::default()).await.unwrap();

        let options = RequestOptions {
            from_loader_only: true,
            ..RequestOptions::default()
        };
        let loaded = h.manager.load(URL, options).await.unwrap();
        assert_eq!(loaded.source, ImageSource::Network);
        assert_eq!(h.fetcher.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_sync_memory_query_resolves_immediately() {
        let h = harness();
        h.fetcher.respond(URL, png_bytes(3, 3));
        h.manager.load(URL, RequestOptions::default()).await.unwrap();

        let options = RequestOptions {
            query_memory_sync: true,
            ..RequestOptions::default()
        };
        let mut handle = h.manager.request(URL, options).unwrap();
        assert_eq!(h.manager.pending_count(), 0);
        match handle.next_event().await {
            Some(LoadEvent::Completed(Ok(loaded))) => {
                assert_eq!(loaded.source, ImageSource::MemoryCache);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sync_disk_query() {
        let h = harness();
        h.cache.disk().put(&CacheKey::new(URL), &png_bytes(2, 2)).unwrap();

        let options = RequestOptions {
            query_disk_sync: true,
            ..RequestOptions::default()
        };
        let handle = h.manager.request(URL, options).unwrap();
        assert_eq!(h.manager.pending_count(), 0);
        let loaded = handle.finished().await.unwrap();
        assert_eq!(loaded.source, ImageSource::DiskCache);
        assert!(loaded.data.is_some());
    }

    #[tokio::test]
    async fn test_decode_failure_not_cached() {
        let h = harness();
        h.fetcher.respond(URL, &b"definitely not an image"[..]);

        let options = RequestOptions {
            wait_store_cache: true,
            ..RequestOptions::default()
        };
        let err = h.manager.load(URL, options).await.unwrap_err();
        assert!(err.is_decode_error());

        let key = CacheKey::new(URL);
        assert!(h.cache.memory().get(&key).is_none());
        assert!(!h.cache.disk().contains(&key));
    }

    #[test_case::test_case(""; "empty")]
    #[test_case::test_case("not a url"; "relative")]
    fn test_invalid_keys_fail_fast(url: &str) {
        let h = harness();
        let err = h.manager.request(url, RequestOptions::default()).unwrap_err();
        assert!(matches!(err, ImageError::InvalidKey { .. }));
        assert_eq!(h.fetcher.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_filtered_key_rejected() {
        let h = harness();
        h.manager
            .set_cache_key_filter(Some(Arc::new(|_: &Url| String::new())));
        let err = h.manager.request(URL, RequestOptions::default()).unwrap_err();
        assert!(matches!(err, ImageError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn test_key_filter_normalises_urls() {
        let h = harness();
        h.manager.set_cache_key_filter(Some(Arc::new(|url: &Url| {
            let mut url = url.clone();
            url.set_query(None);
            url.to_string()
        })));
        let signed = format!("{URL}?token=1");
        h.fetcher.respond(&signed, png_bytes(3, 3));
        h.manager.load(&signed, RequestOptions::default()).await.unwrap();

        let options = RequestOptions {
            from_cache_only: true,
            ..RequestOptions::default()
        };
        let cached = h.manager.load(&format!("{URL}?token=2"), options).await.unwrap();
        assert_eq!(cached.key.as_str(), URL);
    }

    #[tokio::test]
    async fn test_failed_urls_blocked_when_enabled() {
        let h = harness_with(
            ManagerConfig {
                block_failed_urls: true,
            },
            default_registry(),
        );

        assert!(h.manager.load(URL, RequestOptions::default()).await.is_err());
        let blocked = h.manager.request(URL, RequestOptions::default());
        assert!(matches!(blocked, Err(ImageError::RecentlyFailed { .. })));
        assert_eq!(h.fetcher.fetch_count(), 1);

        h.fetcher.respond(URL, png_bytes(2, 2));
        let retry = RequestOptions {
            retry_failed: true,
            ..RequestOptions::default()
        };
        h.manager.load(URL, retry).await.unwrap();
        assert!(!h.manager.is_blocked(&Url::parse(URL).unwrap()));
    }

    #[tokio::test]
    async fn test_transient_failures_not_blocked() {
        let h = harness_with(
            ManagerConfig {
                block_failed_urls: true,
            },
            default_registry(),
        );
        h.fetcher.fail(
            URL,
            ImageError::network(NetworkErrorKind::Status(503), "HTTP 503"),
        );

        assert!(h.manager.load(URL, RequestOptions::default()).await.is_err());
        assert!(h.manager.load(URL, RequestOptions::default()).await.is_err());
        assert_eq!(h.fetcher.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_failures_not_blocked_by_default() {
        let h = harness();
        assert!(h.manager.load(URL, RequestOptions::default()).await.is_err());
        assert!(h.manager.load(URL, RequestOptions::default()).await.is_err());
        assert_eq!(h.fetcher.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_progressive_delivery() {
        let h = harness_with(
            ManagerConfig::default(),
            CoderRegistry::with_coders([Arc::new(LengthCoder) as Arc<dyn ImageCoder>]),
        );
        h.fetcher.respond_in_chunks(URL, vec![7u8; 64], 4);
        h.fetcher.hold();

        let mut progressive = h
            .manager
            .request(
                URL,
                RequestOptions {
                    progressive: true,
                    ..RequestOptions::default()
                },
            )
            .unwrap();
        let plain = h.manager.request(URL, RequestOptions::default()).unwrap();
        h.fetcher.release();

        let mut received = Vec::new();
        let mut partial_widths = Vec::new();
        let mut completed = 0;
        while let Some(event) = progressive.next_event().await {
            match event {
                LoadEvent::Progress { received: r, .. } => received.push(r),
                LoadEvent::Partial(image) => {
                    assert!(image.is_incremental());
                    partial_widths.push(image.width());
                }
                LoadEvent::Completed(result) => {
                    completed += 1;
                    assert_eq!(result.unwrap().image.width(), 64);
                }
                LoadEvent::Intermediate(_) => panic!("no cached copy expected"),
            }
        }

        assert_eq!(completed, 1);
        assert_eq!(received, vec![16, 32, 48, 64]);
        assert_eq!(partial_widths, vec![16, 32, 48]);
        assert_eq!(plain.finished().await.unwrap().image.width(), 64);
    }

    #[tokio::test]
    async fn test_non_progressive_subscriber_gets_no_partials() {
        let h = harness_with(
            ManagerConfig::default(),
            CoderRegistry::with_coders([Arc::new(LengthCoder) as Arc<dyn ImageCoder>]),
        );
        h.fetcher.respond_in_chunks(URL, vec![1u8; 8], 2);

        let mut handle = h.manager.request(URL, RequestOptions::default()).unwrap();
        while let Some(event) = handle.next_event().await {
            assert!(!matches!(event, LoadEvent::Partial(_)));
        }
    }

    #[tokio::test]
    async fn test_refresh_redelivers_changed_data() {
        let h = harness();
        h.fetcher.respond(URL, png_bytes(4, 4));
        let stored = RequestOptions {
            wait_store_cache: true,
            ..RequestOptions::default()
        };
        h.manager.load(URL, stored).await.unwrap();

        h.fetcher.respond(URL, png_bytes(6, 6));
        let mut handle = h
            .manager
            .request(
                URL,
                RequestOptions {
                    refresh_cached: true,
                    ..RequestOptions::default()
                },
            )
            .unwrap();

        let mut intermediate = None;
        let mut completed = None;
        while let Some(event) = handle.next_event().await {
            match event {
                LoadEvent::Intermediate(loaded) => intermediate = Some(loaded),
                LoadEvent::Completed(result) => completed = Some(result.unwrap()),
                _ => {}
            }
        }

        let intermediate = intermediate.unwrap();
        assert_eq!(intermediate.source, ImageSource::MemoryCache);
        assert_eq!(intermediate.image.width(), 4);
        let completed = completed.unwrap();
        assert_eq!(completed.source, ImageSource::Network);
        assert_eq!(completed.image.width(), 6);
    }

    #[tokio::test]
    async fn test_refresh_unchanged_keeps_cached_copy() {
        let h = harness();
        h.fetcher.respond(URL, png_bytes(4, 4));
        let stored = RequestOptions {
            wait_store_cache: true,
            ..RequestOptions::default()
        };
        h.manager.load(URL, stored).await.unwrap();

        let refreshed = h
            .manager
            .load(
                URL,
                RequestOptions {
                    refresh_cached: true,
                    ..RequestOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(refreshed.source, ImageSource::MemoryCache);
        assert_eq!(h.fetcher.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_cache_serializer_controls_disk_bytes() {
        let h = harness();
        let replacement = Bytes::from(png_bytes(1, 1));
        let persisted = replacement.clone();
        h.manager
            .set_cache_serializer(Some(Arc::new(
                move |_: &DecodedImage, _: &Bytes, _: &Url| Some(persisted.clone()),
            )));
        h.fetcher.respond(URL, png_bytes(4, 4));

        let options = RequestOptions {
            wait_store_cache: true,
            ..RequestOptions::default()
        };
        h.manager.load(URL, options).await.unwrap();
        assert_eq!(h.cache.disk().get(&CacheKey::new(URL)), Some(replacement));
    }

    #[tokio::test]
    async fn test_memory_only_store() {
        let h = harness();
        h.fetcher.respond(URL, png_bytes(4, 4));

        let options = RequestOptions {
            store_cache_type: CacheType::Memory,
            wait_store_cache: true,
            ..RequestOptions::default()
        };
        h.manager.load(URL, options).await.unwrap();

        let key = CacheKey::new(URL);
        assert!(h.cache.memory().get(&key).is_some());
        assert!(!h.cache.disk().contains(&key));
    }

    #[tokio::test]
    async fn test_fetch_request_carries_options() {
        let h = harness();
        h.fetcher.respond(URL, png_bytes(2, 2));

        let options = RequestOptions {
            priority: crate::domain::entities::FetchPriority::Low,
            acceptable_content_types: Some(vec!["image/*".into()]),
            ..RequestOptions::default()
        };
        h.manager.load(URL, options).await.unwrap();

        let request = h.fetcher.last_request().unwrap();
        assert_eq!(request.priority, crate::domain::entities::FetchPriority::Low);
        assert_eq!(request.acceptable_content_types, Some(vec!["image/*".to_owned()]));
    }
}
