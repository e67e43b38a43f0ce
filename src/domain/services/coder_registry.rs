//! Priority-ordered registry of codec plugins.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::domain::entities::{DecodeOptions, DecodedImage, EncodeOptions, ImageFormat, ImageFrame};
use crate::domain::ports::{
    AnimatedDecoder, CoderError, CoderResult, ImageCoder, IncrementalDecoder,
};

use super::scaling::apply_decode_options;

/// Ordered set of coders.
///
/// Probing walks the coders from the most recently added to the oldest, so
/// coders registered later override earlier ones for the formats they accept.
#[derive(Default)]
pub struct CoderRegistry {
    coders: RwLock<Vec<Arc<dyn ImageCoder>>>,
}

impl std::fmt::Debug for CoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&'static str> = self.coders.read().iter().map(|c| c.name()).collect();
        f.debug_struct("CoderRegistry")
            .field("coders", &names)
            .finish()
    }
}

impl CoderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with `coders` added in order, so the last has top priority.
    #[must_use]
    pub fn with_coders(coders: impl IntoIterator<Item = Arc<dyn ImageCoder>>) -> Self {
        Self {
            coders: RwLock::new(coders.into_iter().collect()),
        }
    }

    /// Registers `coder` with the highest priority.
    pub fn add_coder(&self, coder: Arc<dyn ImageCoder>) {
        trace!(coder = coder.name(), "Registering coder");
        self.coders.write().push(coder);
    }

    /// Unregisters `coder` (compared by identity).
    pub fn remove_coder(&self, coder: &Arc<dyn ImageCoder>) {
        self.coders.write().retain(|c| !Arc::ptr_eq(c, coder));
    }

    /// Coders in probe order, highest priority first.
    #[must_use]
    pub fn coders(&self) -> Vec<Arc<dyn ImageCoder>> {
        self.coders.read().iter().rev().cloned().collect()
    }

    fn find(&self, predicate: impl Fn(&dyn ImageCoder) -> bool) -> Option<Arc<dyn ImageCoder>> {
        self.coders
            .read()
            .iter()
            .rev()
            .find(|c| predicate(c.as_ref()))
            .cloned()
    }

    /// Returns true if some coder accepts `data`.
    #[must_use]
    pub fn can_decode(&self, data: &[u8]) -> bool {
        self.find(|c| c.can_decode(data)).is_some()
    }

    /// Decodes `data` with the first coder that accepts it, then applies
    /// thumbnail, byte-budget and scale options.
    ///
    /// # Errors
    /// Returns `Decode` for empty data, `UnsupportedFormat` if no coder
    /// matches, or the coder's own error.
    pub fn decode(&self, data: &[u8], options: &DecodeOptions) -> CoderResult<DecodedImage> {
        if data.is_empty() {
            return Err(CoderError::Decode("image data is empty".into()));
        }
        let coder = self.find(|c| c.can_decode(data)).ok_or_else(|| {
            CoderError::UnsupportedFormat(ImageFormat::detect(data).to_string())
        })?;
        trace!(coder = coder.name(), size = data.len(), "Decoding image");
        let decoded = coder.decode(data, options)?;
        Ok(apply_decode_options(decoded, options))
    }

    /// Returns true if some coder can produce `format`.
    #[must_use]
    pub fn can_encode(&self, format: ImageFormat) -> bool {
        self.find(|c| c.can_encode(format)).is_some()
    }

    /// Picks an output format for `image` when the caller has none.
    ///
    /// Keeps the source format if encodable, else PNG with alpha and JPEG without.
    #[must_use]
    pub fn preferred_format(&self, image: &DecodedImage) -> ImageFormat {
        let own = image.format();
        if !own.is_undefined() && self.can_encode(own) {
            own
        } else if image.has_alpha() {
            ImageFormat::PNG
        } else {
            ImageFormat::JPEG
        }
    }

    /// Encodes `image`; `ImageFormat::UNDEFINED` selects [`Self::preferred_format`].
    ///
    /// # Errors
    /// Returns `UnsupportedFormat` if no coder can produce the format, or the
    /// coder's own error.
    pub fn encode(
        &self,
        image: &DecodedImage,
        format: ImageFormat,
        options: &EncodeOptions,
    ) -> CoderResult<Vec<u8>> {
        let format = if format.is_undefined() {
            self.preferred_format(image)
        } else {
            format
        };
        let coder = self
            .find(|c| c.can_encode(format))
            .ok_or_else(|| CoderError::UnsupportedFormat(format.to_string()))?;
        trace!(coder = coder.name(), %format, "Encoding image");
        coder.encode(image, format, options)
    }

    /// Creates a fresh progressive decoder for data that starts like `data`.
    #[must_use]
    pub fn incremental_decoder(
        &self,
        data: &[u8],
        options: &DecodeOptions,
    ) -> Option<Box<dyn IncrementalDecoder>> {
        self.find(|c| c.can_incremental_decode(data))?
            .incremental_decoder(options)
    }

    /// Opens `data` for frame-level access through the first coder that accepts it.
    #[must_use]
    pub fn animated_decoder(&self, data: &[u8]) -> Option<Box<dyn AnimatedDecoder>> {
        self.find(|c| c.can_decode(data))?.animated_decoder(data)
    }
}

/// Assembles a [`DecodedImage`] from an animated decoder.
///
/// With `first_frame_only` just frame zero is decoded, but the source frame
/// count is kept so callers can tell the image is incomplete.
#[must_use]
pub fn collect_frames(
    decoder: &mut dyn AnimatedDecoder,
    format: ImageFormat,
    first_frame_only: bool,
) -> Option<DecodedImage> {
    let total = decoder.frame_count();
    let wanted = if first_frame_only { total.min(1) } else { total };
    let frames: Vec<ImageFrame> = (0..wanted)
        .filter_map(|index| {
            decoder
                .frame_at(index)
                .map(|image| ImageFrame::timed(image, decoder.frame_duration(index)))
        })
        .collect();
    DecodedImage::animated(frames, decoder.loop_count(), format)
        .map(|image| image.with_source_frame_count(total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::mocks::MockImageCoder;
    use std::time::Duration;

    fn mock_coder(name: &'static str) -> MockImageCoder {
        let mut coder = MockImageCoder::new();
        coder.expect_name().return_const(name);
        coder
    }

    fn still(width: u32, height: u32) -> DecodedImage {
        DecodedImage::still(image::DynamicImage::new_rgba8(width, height), ImageFormat::PNG)
    }

    #[test]
    fn test_last_added_coder_probed_first() {
        let mut builtin = mock_coder("builtin");
        builtin.expect_can_decode().times(0);
        builtin.expect_decode().times(0);

        let mut custom = mock_coder("custom");
        custom.expect_can_decode().times(1).return_const(true);
        custom
            .expect_decode()
            .times(1)
            .returning(|_, _| Ok(still(3, 3)));

        let registry = CoderRegistry::new();
        registry.add_coder(Arc::new(builtin));
        registry.add_coder(Arc::new(custom));

        let image = registry.decode(b"data", &DecodeOptions::default()).unwrap();
        assert_eq!(image.width(), 3);
    }

    #[test]
    fn test_falls_through_to_older_coder() {
        let mut builtin = mock_coder("builtin");
        builtin.expect_can_decode().return_const(true);
        builtin.expect_decode().returning(|_, _| Ok(still(1, 1)));

        let mut custom = mock_coder("custom");
        custom.expect_can_decode().return_const(false);

        let registry = CoderRegistry::with_coders([
            Arc::new(builtin) as Arc<dyn ImageCoder>,
            Arc::new(custom) as Arc<dyn ImageCoder>,
        ]);
        assert!(registry.decode(b"data", &DecodeOptions::default()).is_ok());
    }

    #[test]
    fn test_no_coder_is_unsupported() {
        let mut coder = mock_coder("picky");
        coder.expect_can_decode().return_const(false);
        let registry = CoderRegistry::new();
        registry.add_coder(Arc::new(coder));

        let err = registry
            .decode(b"nope", &DecodeOptions::default())
            .unwrap_err();
        assert!(matches!(err, CoderError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_empty_data_rejected() {
        let registry = CoderRegistry::new();
        let err = registry.decode(b"", &DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, CoderError::Decode(_)));
    }

    #[test]
    fn test_remove_coder() {
        let mut coder = mock_coder("gone");
        coder.expect_can_decode().times(0);
        let coder: Arc<dyn ImageCoder> = Arc::new(coder);

        let registry = CoderRegistry::new();
        registry.add_coder(coder.clone());
        registry.remove_coder(&coder);

        assert!(registry.coders().is_empty());
        assert!(!registry.can_decode(b"data"));
    }

    #[test]
    fn test_decode_applies_thumbnail() {
        let mut coder = mock_coder("big");
        coder.expect_can_decode().return_const(true);
        coder.expect_decode().returning(|_, _| Ok(still(400, 200)));
        let registry = CoderRegistry::new();
        registry.add_coder(Arc::new(coder));

        let options = DecodeOptions::default().with_thumbnail(100, 100);
        let image = registry.decode(b"data", &options).unwrap();
        assert_eq!((image.width(), image.height()), (100, 50));
    }

    #[test]
    fn test_preferred_format_falls_back_on_alpha() {
        let mut coder = mock_coder("png-only");
        coder
            .expect_can_encode()
            .returning(|format| format == ImageFormat::PNG);
        let registry = CoderRegistry::new();
        registry.add_coder(Arc::new(coder));

        let gif = DecodedImage::still(image::DynamicImage::new_rgba8(1, 1), ImageFormat::GIF);
        assert_eq!(registry.preferred_format(&gif), ImageFormat::PNG);

        let opaque = DecodedImage::still(image::DynamicImage::new_rgb8(1, 1), ImageFormat::UNDEFINED);
        assert_eq!(registry.preferred_format(&opaque), ImageFormat::JPEG);
    }

    struct Frames(usize);

    impl AnimatedDecoder for Frames {
        fn frame_count(&self) -> usize {
            self.0
        }
        fn loop_count(&self) -> u32 {
            2
        }
        fn frame_at(&mut self, _index: usize) -> Option<image::DynamicImage> {
            Some(image::DynamicImage::new_rgba8(2, 2))
        }
        fn frame_duration(&self, _index: usize) -> Duration {
            Duration::from_millis(50)
        }
    }

    #[test]
    fn test_collect_frames() {
        let all = collect_frames(&mut Frames(3), ImageFormat::GIF, false).unwrap();
        assert_eq!(all.frames().len(), 3);
        assert_eq!(all.loop_count(), 2);

        let first = collect_frames(&mut Frames(3), ImageFormat::GIF, true).unwrap();
        assert_eq!(first.frames().len(), 1);
        assert_eq!(first.frame_count(), 3);

        assert!(collect_frames(&mut Frames(0), ImageFormat::GIF, false).is_none());
    }
}
