//! Animated GIF coder.

use std::io::Cursor;
use std::time::Duration;

use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::{AnimationDecoder, Delay, DynamicImage, Frame};

use crate::domain::entities::{DecodeOptions, DecodedImage, EncodeOptions, ImageFormat};
use crate::domain::ports::{AnimatedDecoder, CoderError, CoderResult, ImageCoder};
use crate::domain::services::collect_frames;

use super::raster_coder::limit_size;

/// Frames shorter than this play at [`DEFAULT_FRAME_DURATION`], as browsers do.
const MIN_FRAME_DURATION: Duration = Duration::from_millis(11);
const DEFAULT_FRAME_DURATION: Duration = Duration::from_millis(100);

fn decode_err(e: impl std::fmt::Display) -> CoderError {
    CoderError::Decode(e.to_string())
}

/// Reads the NETSCAPE2.0 loop count. Absent means play once.
fn parse_loop_count(data: &[u8]) -> u32 {
    const MARKER: &[u8] = b"NETSCAPE2.0";
    data.windows(MARKER.len())
        .position(|window| window == MARKER)
        .and_then(|pos| data.get(pos + MARKER.len()..pos + MARKER.len() + 4))
        .filter(|block| block[0] == 0x03 && block[1] == 0x01)
        .map_or(1, |block| u32::from(u16::from_le_bytes([block[2], block[3]])))
}

/// Decoded GIF frames with frame-level access.
pub struct GifAnimation {
    frames: Vec<Frame>,
    loop_count: u32,
}

impl GifAnimation {
    /// Decodes every frame of `data`.
    ///
    /// # Errors
    /// Returns error if `data` is not a valid GIF.
    pub fn decode(data: &[u8]) -> CoderResult<Self> {
        let decoder = GifDecoder::new(Cursor::new(data)).map_err(decode_err)?;
        let frames = decoder.into_frames().collect_frames().map_err(decode_err)?;
        if frames.is_empty() {
            return Err(CoderError::Decode("GIF has no frames".into()));
        }
        Ok(Self {
            frames,
            loop_count: parse_loop_count(data),
        })
    }
}

impl AnimatedDecoder for GifAnimation {
    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn loop_count(&self) -> u32 {
        self.loop_count
    }

    fn frame_at(&mut self, index: usize) -> Option<DynamicImage> {
        self.frames
            .get(index)
            .map(|frame| DynamicImage::ImageRgba8(frame.buffer().clone()))
    }

    fn frame_duration(&self, index: usize) -> Duration {
        let Some(frame) = self.frames.get(index) else {
            return Duration::ZERO;
        };
        let (numer, denom) = frame.delay().numer_denom_ms();
        let duration = Duration::from_millis(u64::from(numer) / u64::from(denom.max(1)));
        if duration < MIN_FRAME_DURATION {
            DEFAULT_FRAME_DURATION
        } else {
            duration
        }
    }
}

/// Decodes and encodes animated GIFs via the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct GifCoder;

impl GifCoder {
    /// Creates the coder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ImageCoder for GifCoder {
    fn name(&self) -> &'static str {
        "gif"
    }

    fn can_decode(&self, data: &[u8]) -> bool {
        ImageFormat::detect(data) == ImageFormat::GIF
    }

    fn decode(&self, data: &[u8], options: &DecodeOptions) -> CoderResult<DecodedImage> {
        let mut animation = GifAnimation::decode(data)?;
        collect_frames(&mut animation, ImageFormat::GIF, options.first_frame_only)
            .ok_or_else(|| CoderError::Decode("GIF has no frames".into()))
    }

    fn can_encode(&self, format: ImageFormat) -> bool {
        format == ImageFormat::GIF
    }

    fn encode(
        &self,
        image: &DecodedImage,
        format: ImageFormat,
        options: &EncodeOptions,
    ) -> CoderResult<Vec<u8>> {
        if format != ImageFormat::GIF {
            return Err(CoderError::UnsupportedFormat(format.to_string()));
        }
        let count = if options.first_frame_only { 1 } else { image.frames().len() };
        let frames: Vec<Frame> = image.frames()[..count]
            .iter()
            .map(|frame| {
                let bitmap = limit_size(&frame.image, options.max_pixel_size);
                let bitmap = bitmap.as_ref().unwrap_or(frame.image.as_ref());
                Frame::from_parts(
                    bitmap.to_rgba8(),
                    0,
                    0,
                    Delay::from_saturating_duration(frame.duration),
                )
            })
            .collect();

        let mut buffer = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut buffer);
            if count > 1 {
                let repeat = match image.loop_count() {
                    0 => Repeat::Infinite,
                    n => Repeat::Finite(u16::try_from(n).unwrap_or(u16::MAX)),
                };
                encoder
                    .set_repeat(repeat)
                    .map_err(|e| CoderError::Encode(e.to_string()))?;
            }
            encoder
                .encode_frames(frames)
                .map_err(|e| CoderError::Encode(e.to_string()))?;
        }
        Ok(buffer)
    }

    fn animated_decoder(&self, data: &[u8]) -> Option<Box<dyn AnimatedDecoder>> {
        GifAnimation::decode(data)
            .ok()
            .map(|animation| Box::new(animation) as Box<dyn AnimatedDecoder>)
    }
}
