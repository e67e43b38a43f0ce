//! Domain entity definitions.

mod cache_key;
mod image;
mod image_format;
mod options;

pub use cache_key::{CacheKey, CacheKeyFilter};
pub use image::{
    CacheEntry, CacheTier, CacheType, DecodedImage, ImageFrame, ImageSource, LoadedImage,
};
pub use image_format::ImageFormat;
pub use options::{DecodeOptions, EncodeOptions, FetchPriority, QueryOptions, RequestOptions};
