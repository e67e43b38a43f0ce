//! Domain types for decoded images and where they came from.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::{CacheKey, ImageFormat};

/// A single decoded bitmap frame.
#[derive(Debug, Clone)]
pub struct ImageFrame {
    /// Pixel data.
    pub image: Arc<image::DynamicImage>,
    /// Display duration; zero for static images.
    pub duration: Duration,
}

impl ImageFrame {
    /// Creates a frame with no display duration.
    #[must_use]
    pub fn still(image: image::DynamicImage) -> Self {
        Self {
            image: Arc::new(image),
            duration: Duration::ZERO,
        }
    }

    /// Creates a frame shown for `duration`.
    #[must_use]
    pub fn timed(image: image::DynamicImage, duration: Duration) -> Self {
        Self {
            image: Arc::new(image),
            duration,
        }
    }

    fn byte_cost(&self) -> u64 {
        u64::from(self.image.width())
            * u64::from(self.image.height())
            * u64::from(self.image.color().bytes_per_pixel())
    }
}

/// A decoded image: one frame for static images, several for animations.
///
/// `frame_count` is the number of frames in the source; `frames` may hold
/// fewer when the image was decoded with first-frame-only.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    frames: Vec<ImageFrame>,
    frame_count: usize,
    format: ImageFormat,
    scale: f32,
    loop_count: u32,
    incremental: bool,
    extended_data: Option<serde_json::Value>,
}

impl DecodedImage {
    /// Wraps a single static bitmap.
    #[must_use]
    pub fn still(image: image::DynamicImage, format: ImageFormat) -> Self {
        Self {
            frames: vec![ImageFrame::still(image)],
            frame_count: 1,
            format,
            scale: 1.0,
            loop_count: 0,
            incremental: false,
            extended_data: None,
        }
    }

    /// Builds an animated image. Returns `None` when `frames` is empty.
    #[must_use]
    pub fn animated(frames: Vec<ImageFrame>, loop_count: u32, format: ImageFormat) -> Option<Self> {
        if frames.is_empty() {
            return None;
        }
        Some(Self {
            frame_count: frames.len(),
            frames,
            format,
            scale: 1.0,
            loop_count,
            incremental: false,
            extended_data: None,
        })
    }

    /// Sets the logical scale factor (clamped to at least 1.0).
    #[must_use]
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale.max(1.0);
        self
    }

    /// Records the number of frames present in the source data.
    #[must_use]
    pub fn with_source_frame_count(mut self, frame_count: usize) -> Self {
        self.frame_count = frame_count.max(self.frames.len());
        self
    }

    /// Marks the image as a partial result of progressive decoding.
    #[must_use]
    pub const fn with_incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }

    /// Attaches auxiliary metadata persisted alongside the disk entry.
    #[must_use]
    pub fn with_extended_data(mut self, data: Option<serde_json::Value>) -> Self {
        self.extended_data = data;
        self
    }

    /// Returns a copy holding only the first frame.
    #[must_use]
    pub fn first_frame(&self) -> Self {
        let mut copy = self.clone();
        copy.frames.truncate(1);
        copy
    }

    /// Decoded frames, at least one.
    #[must_use]
    pub fn frames(&self) -> &[ImageFrame] {
        &self.frames
    }

    /// The first frame's bitmap.
    #[must_use]
    pub fn bitmap(&self) -> &Arc<image::DynamicImage> {
        &self.frames[0].image
    }

    /// Pixel width of the first frame.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.bitmap().width()
    }

    /// Pixel height of the first frame.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.bitmap().height()
    }

    /// Size in points: pixel size divided by scale.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn logical_size(&self) -> (f32, f32) {
        (
            self.width() as f32 / self.scale,
            self.height() as f32 / self.scale,
        )
    }

    /// Number of frames in the source data.
    #[must_use]
    pub const fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// True when every source frame has been decoded.
    #[must_use]
    pub fn is_fully_decoded(&self) -> bool {
        self.frames.len() >= self.frame_count
    }

    /// True for multi-frame sources.
    #[must_use]
    pub const fn is_animated(&self) -> bool {
        self.frame_count > 1
    }

    /// Source container format.
    #[must_use]
    pub const fn format(&self) -> ImageFormat {
        self.format
    }

    /// Logical scale factor.
    #[must_use]
    pub const fn scale(&self) -> f32 {
        self.scale
    }

    /// Animation loop count; zero loops forever.
    #[must_use]
    pub const fn loop_count(&self) -> u32 {
        self.loop_count
    }

    /// True for partial progressive results.
    #[must_use]
    pub const fn is_incremental(&self) -> bool {
        self.incremental
    }

    /// Auxiliary metadata, if any.
    #[must_use]
    pub const fn extended_data(&self) -> Option<&serde_json::Value> {
        self.extended_data.as_ref()
    }

    /// True when the first frame carries an alpha channel.
    #[must_use]
    pub fn has_alpha(&self) -> bool {
        self.bitmap().color().has_alpha()
    }

    /// Memory cache cost: decoded pixel bytes across all held frames.
    #[must_use]
    pub fn memory_cost(&self) -> u64 {
        self.frames.iter().map(ImageFrame::byte_cost).sum()
    }
}

/// Which cache tier satisfied a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheTier {
    /// Not cached.
    #[default]
    None,
    /// Found on disk.
    Disk,
    /// Found in memory.
    Memory,
}

/// Which tiers a query reads or a store writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// Skip the cache entirely.
    None,
    /// Memory tier only.
    Memory,
    /// Disk tier only.
    Disk,
    /// Both tiers.
    #[default]
    All,
}

impl CacheType {
    /// True if the memory tier participates.
    #[must_use]
    pub const fn includes_memory(self) -> bool {
        matches!(self, Self::Memory | Self::All)
    }

    /// True if the disk tier participates.
    #[must_use]
    pub const fn includes_disk(self) -> bool {
        matches!(self, Self::Disk | Self::All)
    }
}

/// Where a delivered image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Loaded from the in-memory cache.
    MemoryCache,
    /// Loaded from the disk cache.
    DiskCache,
    /// Downloaded from the network.
    Network,
}

impl From<CacheTier> for ImageSource {
    fn from(tier: CacheTier) -> Self {
        match tier {
            CacheTier::Memory => Self::MemoryCache,
            CacheTier::Disk => Self::DiskCache,
            CacheTier::None => Self::Network,
        }
    }
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// An image delivered to a caller.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Cache key the image was stored under.
    pub key: CacheKey,
    /// The decoded image.
    pub image: Arc<DecodedImage>,
    /// Encoded bytes, when they were read or fetched.
    pub data: Option<Bytes>,
    /// Where the image came from.
    pub source: ImageSource,
}

/// A cache slot as seen by a store.
///
/// The memory store fills `image`; the disk store fills `raw_bytes`.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The entry's key.
    pub key: CacheKey,
    /// Decoded image, for memory entries.
    pub image: Option<Arc<DecodedImage>>,
    /// Encoded bytes, for disk entries.
    pub raw_bytes: Option<Bytes>,
    /// Cost in memory or bytes on disk.
    pub size_in_bytes: u64,
    /// When the entry was written.
    pub inserted_at: DateTime<Utc>,
    /// When the entry was last read.
    pub last_accessed_at: DateTime<Utc>,
}
