//! Progressive decoding by re-decoding the bytes received so far.

use bytes::Bytes;

use crate::domain::entities::{DecodeOptions, DecodedImage};
use crate::domain::ports::{ImageCoder, IncrementalDecoder};
use crate::domain::services::scaling::apply_decode_options;

/// Incremental decoder that retries a one-shot decode on each update.
///
/// Owned by exactly one load. Partial results are flagged incremental; a
/// decode after the final update is not.
pub struct BufferedIncrementalDecoder<C> {
    coder: C,
    options: DecodeOptions,
    data: Bytes,
    finished: bool,
    decoded_len: usize,
}

impl<C: ImageCoder> BufferedIncrementalDecoder<C> {
    /// Creates an empty decoder using `coder` for each attempt.
    pub const fn new(coder: C, options: DecodeOptions) -> Self {
        Self {
            coder,
            options,
            data: Bytes::new(),
            finished: false,
            decoded_len: 0,
        }
    }
}

impl<C: ImageCoder> IncrementalDecoder for BufferedIncrementalDecoder<C> {
    fn update_data(&mut self, data: Bytes, finished: bool) {
        self.data = data;
        self.finished = finished;
    }

    fn decode_so_far(&mut self) -> Option<DecodedImage> {
        if self.data.is_empty() || self.data.len() == self.decoded_len {
            return None;
        }
        let image = self.coder.decode(&self.data, &self.options).ok()?;
        self.decoded_len = self.data.len();
        Some(apply_decode_options(image, &self.options).with_incremental(!self.finished))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::codec::RasterCoder;
    use crate::test_support::png_bytes;

    #[test]
    fn test_partial_then_complete() {
        let data = Bytes::from(png_bytes(16, 16));
        let mut decoder = BufferedIncrementalDecoder::new(RasterCoder, DecodeOptions::default());

        assert!(decoder.decode_so_far().is_none());

        decoder.update_data(data.slice(..8), false);
        assert!(decoder.decode_so_far().is_none());

        decoder.update_data(data.clone(), true);
        let image = decoder.decode_so_far().unwrap();
        assert_eq!(image.width(), 16);
        assert!(!image.is_incremental());
    }

    #[test]
    fn test_same_data_not_redecoded() {
        let data = Bytes::from(png_bytes(4, 4));
        let mut decoder = BufferedIncrementalDecoder::new(RasterCoder, DecodeOptions::default());

        decoder.update_data(data.clone(), false);
        let partial = decoder.decode_so_far().unwrap();
        assert!(partial.is_incremental());

        decoder.update_data(data, false);
        assert!(decoder.decode_so_far().is_none());
    }

    #[test]
    fn test_thumbnail_applied() {
        let mut decoder = BufferedIncrementalDecoder::new(
            RasterCoder,
            DecodeOptions::default().with_thumbnail(4, 4),
        );
        decoder.update_data(Bytes::from(png_bytes(16, 8)), true);
        let image = decoder.decode_so_far().unwrap();
        assert_eq!((image.width(), image.height()), (4, 2));
    }
}
