//! Port definitions for pluggable image codecs.

use std::time::Duration;

use bytes::Bytes;

use crate::domain::entities::{DecodeOptions, DecodedImage, EncodeOptions, ImageFormat};
use crate::domain::errors::ImageError;

/// Result type for coder operations.
pub type CoderResult<T> = std::result::Result<T, CoderError>;

/// Errors raised by coders.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoderError {
    /// No registered coder accepts the data or format.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    /// The data is corrupt or decoded to nothing.
    #[error("decode failed: {0}")]
    Decode(String),
    /// The image could not be encoded.
    #[error("encode failed: {0}")]
    Encode(String),
}

impl From<CoderError> for ImageError {
    fn from(e: CoderError) -> Self {
        Self::bad_data(e.to_string())
    }
}

/// A codec plugin.
///
/// One-shot decode and encode are required. Progressive and animated decoding
/// are optional capabilities exposed through factory methods; each returned
/// decoder is owned by a single load and never shared.
#[cfg_attr(test, mockall::automock)]
pub trait ImageCoder: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Returns true if this coder can decode `data`.
    fn can_decode(&self, data: &[u8]) -> bool;

    /// Decodes `data` in one shot.
    ///
    /// # Errors
    /// Returns error if the data is corrupt or unsupported.
    fn decode(&self, data: &[u8], options: &DecodeOptions) -> CoderResult<DecodedImage>;

    /// Returns true if this coder can produce `format`.
    fn can_encode(&self, format: ImageFormat) -> bool;

    /// Encodes `image` as `format`.
    ///
    /// # Errors
    /// Returns error if the image cannot be represented in `format`.
    fn encode(
        &self,
        image: &DecodedImage,
        format: ImageFormat,
        options: &EncodeOptions,
    ) -> CoderResult<Vec<u8>>;

    /// Returns true if partial `data` can be decoded progressively.
    fn can_incremental_decode(&self, _data: &[u8]) -> bool {
        false
    }

    /// Creates a fresh progressive decoder for one load.
    fn incremental_decoder(&self, _options: &DecodeOptions) -> Option<Box<dyn IncrementalDecoder>> {
        None
    }

    /// Opens `data` for frame-by-frame access, if it is animated.
    fn animated_decoder(&self, _data: &[u8]) -> Option<Box<dyn AnimatedDecoder>> {
        None
    }
}

/// Per-load progressive decoding state.
pub trait IncrementalDecoder: Send {
    /// Replaces the accumulated data with everything received so far.
    fn update_data(&mut self, data: Bytes, finished: bool);

    /// Decodes whatever the accumulated data allows.
    fn decode_so_far(&mut self) -> Option<DecodedImage>;
}

/// Frame-level access to an animated image.
pub trait AnimatedDecoder: Send {
    /// Number of frames.
    fn frame_count(&self) -> usize;

    /// Loop count; zero loops forever.
    fn loop_count(&self) -> u32;

    /// Decodes the frame at `index`.
    fn frame_at(&mut self, index: usize) -> Option<image::DynamicImage>;

    /// Display duration of the frame at `index`.
    fn frame_duration(&self, index: usize) -> Duration;
}
