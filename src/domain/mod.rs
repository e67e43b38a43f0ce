//! Domain layer with core entities, port definitions and codec services.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;
/// Domain services.
pub mod services;

pub use entities::{CacheKey, DecodedImage, ImageFormat, RequestOptions};
pub use errors::ImageError;
pub use ports::{ImageCachePort, ImageCoder, ImageFetcher};
pub use services::CoderRegistry;
