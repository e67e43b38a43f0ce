//! Built-in image coders.

pub mod gif_coder;
pub mod incremental;
pub mod raster_coder;

use std::sync::Arc;

pub use gif_coder::{GifAnimation, GifCoder};
pub use incremental::BufferedIncrementalDecoder;
pub use raster_coder::RasterCoder;

use crate::domain::ports::ImageCoder;
use crate::domain::services::CoderRegistry;

/// A registry holding the built-in coders. User coders added later take priority.
#[must_use]
pub fn default_registry() -> CoderRegistry {
    CoderRegistry::with_coders([
        Arc::new(RasterCoder::new()) as Arc<dyn ImageCoder>,
        Arc::new(GifCoder::new()) as Arc<dyn ImageCoder>,
    ])
}
