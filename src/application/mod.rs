//! Application layer: load coordination and prefetching.

/// Manager and prefetcher.
pub mod services;
/// Process-wide default manager.
pub mod shared;

pub use services::{
    CancelToken, ImageManager, ImagePrefetcher, LoadEvent, LoadHandle, ManagerConfig,
    PrefetchReport,
};
pub use shared::{install, shared, shutdown_shared};
