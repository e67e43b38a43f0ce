mod coder_port;
mod fetcher_port;
mod image_cache_port;

pub use coder_port::{
    AnimatedDecoder, CoderError, CoderResult, ImageCoder, IncrementalDecoder,
};
pub use fetcher_port::{FetchChunk, FetchRequest, FetchStream, ImageFetcher};
pub use image_cache_port::{
    CacheError, CacheQuery, CacheResult, Completion, DiskCachePort, ExpirationReport,
    ImageCachePort, MemoryCachePort,
};
