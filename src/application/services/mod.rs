//! Application services.

pub mod image_manager;
pub mod prefetcher;

pub use image_manager::{
    CacheSerializer, CancelToken, ImageManager, LoadEvent, LoadHandle, ManagerConfig,
};
pub use prefetcher::{ImagePrefetcher, PrefetchHandle, PrefetchReport};
