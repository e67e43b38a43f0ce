//! Option records for decoding, encoding, cache queries and load requests.

use super::{CacheKey, CacheType};

/// Options controlling how bytes become a [`super::DecodedImage`].
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOptions {
    /// Logical scale factor, at least 1.0. `None` reads `@2x`/`@3x` from the key.
    pub scale_factor: Option<f32>,
    /// Decode only the first frame of animated images.
    pub first_frame_only: bool,
    /// Maximum output pixel size; `None` decodes at full size.
    pub thumbnail_pixel_size: Option<(u32, u32)>,
    /// Keep the source aspect ratio when producing a thumbnail.
    pub preserve_aspect_ratio: bool,
    /// Upper bound on decoded bytes (`frames * width * height * 4`).
    pub scale_down_limit_bytes: Option<u64>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            scale_factor: None,
            first_frame_only: false,
            thumbnail_pixel_size: None,
            preserve_aspect_ratio: true,
            scale_down_limit_bytes: None,
        }
    }
}

impl DecodeOptions {
    /// Requests a thumbnail bounded by `width` x `height`.
    #[must_use]
    pub const fn with_thumbnail(mut self, width: u32, height: u32) -> Self {
        self.thumbnail_pixel_size = Some((width, height));
        self
    }

    /// Sets the explicit scale factor.
    #[must_use]
    pub const fn with_scale_factor(mut self, scale: f32) -> Self {
        self.scale_factor = Some(scale);
        self
    }

    /// Effective scale factor, clamped to at least 1.0.
    #[must_use]
    pub fn effective_scale(&self) -> f32 {
        self.scale_factor.unwrap_or(1.0).max(1.0)
    }

    /// Fills in the scale factor from `key` when none was given.
    #[must_use]
    pub fn resolved_for(mut self, key: &CacheKey) -> Self {
        if self.scale_factor.is_none() {
            self.scale_factor = key.scale_factor();
        }
        self
    }

    /// Returns the key under which images decoded with these options are cached.
    ///
    /// Only a thumbnail size derives a separate key. Scale factor and byte
    /// limit decodes share the base key, so a later plain request may be
    /// served the downscaled copy from memory.
    #[must_use]
    pub fn cache_key(&self, base: &CacheKey) -> CacheKey {
        match self.thumbnail_pixel_size {
            Some((width, height)) => base.thumbnail(width, height, self.preserve_aspect_ratio),
            None => base.clone(),
        }
    }

    /// Stable string identifying every option that changes the decoded output.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let thumbnail = self
            .thumbnail_pixel_size
            .map_or_else(|| "-".to_owned(), |(w, h)| format!("{w}x{h}"));
        let limit = self
            .scale_down_limit_bytes
            .map_or_else(|| "-".to_owned(), |l| l.to_string());
        format!(
            "scale={};first={};thumb={thumbnail};aspect={};limit={limit}",
            self.effective_scale(),
            self.first_frame_only,
            self.preserve_aspect_ratio,
        )
    }
}

/// Options for re-encoding a decoded image.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeOptions {
    /// 0.0 (smallest) to 1.0 (best) for lossy formats.
    pub compression_quality: f32,
    /// Encode only the first frame of animated images.
    pub first_frame_only: bool,
    /// Downscale so the output fits in this pixel size.
    pub max_pixel_size: Option<(u32, u32)>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            compression_quality: 1.0,
            first_frame_only: false,
            max_pixel_size: None,
        }
    }
}

impl EncodeOptions {
    /// JPEG quality in the 1-100 range.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn jpeg_quality(&self) -> u8 {
        (self.compression_quality.clamp(0.0, 1.0) * 100.0).round().max(1.0) as u8
    }
}

/// Options for a cache query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    /// Tiers to consult.
    pub cache_type: CacheType,
    /// Also read the encoded bytes from disk on a memory hit.
    pub query_memory_data: bool,
    /// Skip memory hits that hold fewer frames than the source.
    pub require_all_frames: bool,
    /// Options used to decode disk hits.
    pub decode: DecodeOptions,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            cache_type: CacheType::All,
            query_memory_data: false,
            require_all_frames: false,
            decode: DecodeOptions::default(),
        }
    }
}

/// Scheduling priority of a network fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum FetchPriority {
    /// Scheduled after every waiting normal and high fetch.
    Low,
    /// Default FIFO scheduling.
    #[default]
    Normal,
    /// Scheduled ahead of every waiting normal and low fetch.
    High,
}

/// Per-request load options.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Ignore the failed-URL blocklist for this request.
    pub retry_failed: bool,
    /// Network scheduling priority.
    pub priority: FetchPriority,
    /// Deliver partial images while bytes arrive.
    pub progressive: bool,
    /// Serve a cached copy, then re-fetch and redeliver if it changed.
    pub refresh_cached: bool,
    /// Also read encoded bytes from disk on a memory hit.
    pub query_memory_data: bool,
    /// Check memory on the calling thread before `request` returns.
    pub query_memory_sync: bool,
    /// Check disk on the calling thread before `request` returns.
    pub query_disk_sync: bool,
    /// Never touch the network.
    pub from_cache_only: bool,
    /// Never read the cache.
    pub from_loader_only: bool,
    /// Require every animation frame to be decoded.
    pub preload_all_frames: bool,
    /// Hold completion until the disk write finishes.
    pub wait_store_cache: bool,
    /// Tiers to read.
    pub query_cache_type: CacheType,
    /// Tiers to write.
    pub store_cache_type: CacheType,
    /// Decode options.
    pub decode: DecodeOptions,
    /// Extra HTTP status codes to accept, on top of 2xx.
    pub acceptable_status_codes: Option<Vec<u16>>,
    /// Content-type allowlist; `None` accepts everything.
    pub acceptable_content_types: Option<Vec<String>>,
}

impl RequestOptions {
    /// Derives the cache query options for this request.
    #[must_use]
    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            cache_type: self.query_cache_type,
            query_memory_data: self.query_memory_data,
            require_all_frames: self.preload_all_frames,
            decode: self.decode.clone(),
        }
    }

    /// Fingerprint of every option that makes two loads non-shareable.
    #[must_use]
    pub fn dedup_fingerprint(&self) -> String {
        format!(
            "{};cache_only={};loader_only={};refresh={};all_frames={};query={:?};store={:?}",
            self.decode.fingerprint(),
            self.from_cache_only,
            self.from_loader_only,
            self.refresh_cached,
            self.preload_all_frames,
            self.query_cache_type,
            self.store_cache_type,
        )
    }
}
