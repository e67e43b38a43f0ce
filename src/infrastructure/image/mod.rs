//! Image cache infrastructure.
//!
//! This module provides:
//! - Memory caching with LRU eviction and cost limits
//! - Disk caching with age, size and count expiration
//! - A serial I/O queue per disk cache
//! - The two-tier cache facade

pub mod disk_cache;
pub mod image_cache;
pub mod io_queue;
pub mod memory_cache;

pub use disk_cache::{DiskCache, DiskExpireType, DiskLimits, default_cache_root};
pub use image_cache::{CacheConfig, DEFAULT_MAX_DISK_AGE_SECS, ImageCache};
pub use io_queue::IoQueue;
pub use memory_cache::{CacheStats, MemoryCache, MemoryWarning};
