//! Still-image coder for PNG, JPEG, WebP and BMP.

use std::io::Cursor;

use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

use crate::domain::entities::{DecodeOptions, DecodedImage, EncodeOptions, ImageFormat};
use crate::domain::ports::{CoderError, CoderResult, ImageCoder, IncrementalDecoder};
use crate::domain::services::scaling::fit_size;

use super::incremental::BufferedIncrementalDecoder;

const DECODABLE: [ImageFormat; 4] = [
    ImageFormat::PNG,
    ImageFormat::JPEG,
    ImageFormat::WEBP,
    ImageFormat::BMP,
];

/// Formats with a streamable layout worth decoding progressively.
const PROGRESSIVE: [ImageFormat; 2] = [ImageFormat::PNG, ImageFormat::JPEG];

/// Decodes and encodes single-frame raster formats via the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterCoder;

impl RasterCoder {
    /// Creates the coder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Downscales `image` to fit `max`, keeping the aspect ratio.
pub(super) fn limit_size(image: &DynamicImage, max: Option<(u32, u32)>) -> Option<DynamicImage> {
    let max = max?;
    let source = (image.width(), image.height());
    let (width, height) = fit_size(source, max, true, false);
    ((width, height) != source).then(|| image.resize_exact(width, height, FilterType::Lanczos3))
}

/// Encodes one bitmap as `format`.
pub(super) fn encode_bitmap(
    image: &DynamicImage,
    format: ImageFormat,
    options: &EncodeOptions,
) -> CoderResult<Vec<u8>> {
    let resized = limit_size(image, options.max_pixel_size);
    let image = resized.as_ref().unwrap_or(image);
    let mut buffer = Cursor::new(Vec::new());

    if format == ImageFormat::JPEG {
        let rgb = image.to_rgb8();
        JpegEncoder::new_with_quality(&mut buffer, options.jpeg_quality())
            .encode_image(&rgb)
            .map_err(|e| CoderError::Encode(e.to_string()))?;
    } else {
        let target = format
            .to_image_crate()
            .ok_or_else(|| CoderError::UnsupportedFormat(format.to_string()))?;
        image
            .write_to(&mut buffer, target)
            .map_err(|e| CoderError::Encode(e.to_string()))?;
    }
    Ok(buffer.into_inner())
}

impl ImageCoder for RasterCoder {
    fn name(&self) -> &'static str {
        "raster"
    }

    fn can_decode(&self, data: &[u8]) -> bool {
        DECODABLE.contains(&ImageFormat::detect(data))
    }

    fn decode(&self, data: &[u8], _options: &DecodeOptions) -> CoderResult<DecodedImage> {
        let format = ImageFormat::detect(data);
        let target = format
            .to_image_crate()
            .ok_or_else(|| CoderError::UnsupportedFormat(format.to_string()))?;
        let image = image::load_from_memory_with_format(data, target)
            .map_err(|e| CoderError::Decode(e.to_string()))?;
        Ok(DecodedImage::still(image, format))
    }

    fn can_encode(&self, format: ImageFormat) -> bool {
        DECODABLE.contains(&format)
    }

    fn encode(
        &self,
        image: &DecodedImage,
        format: ImageFormat,
        options: &EncodeOptions,
    ) -> CoderResult<Vec<u8>> {
        encode_bitmap(image.bitmap(), format, options)
    }

    fn can_incremental_decode(&self, data: &[u8]) -> bool {
        PROGRESSIVE.contains(&ImageFormat::detect(data))
    }

    fn incremental_decoder(&self, options: &DecodeOptions) -> Option<Box<dyn IncrementalDecoder>> {
        Some(Box::new(BufferedIncrementalDecoder::new(
            Self,
            options.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{jpeg_bytes, png_bytes};
    use test_case::test_case;

    #[test]
    fn test_decode_png() {
        let image = RasterCoder
            .decode(&png_bytes(6, 4), &DecodeOptions::default())
            .unwrap();
        assert_eq!((image.width(), image.height()), (6, 4));
        assert_eq!(image.format(), ImageFormat::PNG);
        assert!(image.has_alpha());
    }

    #[test]
    fn test_decode_jpeg() {
        let image = RasterCoder
            .decode(&jpeg_bytes(8, 8), &DecodeOptions::default())
            .unwrap();
        assert_eq!(image.format(), ImageFormat::JPEG);
        assert!(!image.has_alpha());
    }

    #[test]
    fn test_truncated_png_fails() {
        let data = png_bytes(32, 32);
        let result = RasterCoder.decode(&data[..data.len() / 2], &DecodeOptions::default());
        assert!(matches!(result, Err(CoderError::Decode(_))));
    }

    #[test_case(ImageFormat::PNG, true ; "png")]
    #[test_case(ImageFormat::JPEG, true ; "jpeg")]
    #[test_case(ImageFormat::BMP, true ; "bmp")]
    #[test_case(ImageFormat::GIF, false ; "gif")]
    #[test_case(ImageFormat::SVG, false ; "svg")]
    fn test_can_encode(format: ImageFormat, expected: bool) {
        assert_eq!(RasterCoder.can_encode(format), expected);
    }

    #[test]
    fn test_png_round_trip_is_lossless() {
        let original = RasterCoder
            .decode(&png_bytes(5, 5), &DecodeOptions::default())
            .unwrap();
        let encoded = RasterCoder
            .encode(&original, ImageFormat::PNG, &EncodeOptions::default())
            .unwrap();
        let decoded = RasterCoder
            .decode(&encoded, &DecodeOptions::default())
            .unwrap();
        assert_eq!(decoded.bitmap().to_rgba8(), original.bitmap().to_rgba8());
    }

    #[test]
    fn test_jpeg_quality_affects_size() {
        let image = RasterCoder
            .decode(&png_bytes(64, 64), &DecodeOptions::default())
            .unwrap();
        let best = RasterCoder
            .encode(&image, ImageFormat::JPEG, &EncodeOptions::default())
            .unwrap();
        let worst = RasterCoder
            .encode(
                &image,
                ImageFormat::JPEG,
                &EncodeOptions {
                    compression_quality: 0.0,
                    ..EncodeOptions::default()
                },
            )
            .unwrap();
        assert_eq!(ImageFormat::detect(&best), ImageFormat::JPEG);
        assert!(worst.len() < best.len());
    }

    #[test]
    fn test_encode_max_pixel_size() {
        let image = RasterCoder
            .decode(&png_bytes(40, 20), &DecodeOptions::default())
            .unwrap();
        let encoded = RasterCoder
            .encode(
                &image,
                ImageFormat::PNG,
                &EncodeOptions {
                    max_pixel_size: Some((10, 10)),
                    ..EncodeOptions::default()
                },
            )
            .unwrap();
        let decoded = RasterCoder
            .decode(&encoded, &DecodeOptions::default())
            .unwrap();
        assert_eq!((decoded.width(), decoded.height()), (10, 5));
    }
}
