//! Infrastructure layer with cache, codec and network adapters.

/// Pipeline wiring.
pub mod bootstrap;
/// Built-in coders.
pub mod codec;
/// Settings and their persistence.
pub mod config;
/// Image caching.
pub mod image;
/// Tracing setup.
pub mod logging;
/// HTTP fetching.
pub mod network;

pub use bootstrap::{BootstrapError, Pipeline, build_pipeline, init_shared};
pub use codec::{GifCoder, RasterCoder, default_registry};
pub use config::{ConfigError, ConfigStore, LogLevel, Settings};
pub use image::{CacheConfig, CacheStats, DiskCache, ImageCache, MemoryCache, MemoryWarning};
pub use logging::init_logging;
pub use network::{FetcherConfig, HttpFetcher};
