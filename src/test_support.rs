//! Fixtures shared by unit tests.

use std::io::Cursor;

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, DynamicImage, Frame, ImageFormat, Rgba, RgbaImage};

/// An RGBA image with a gradient so pixel comparisons are meaningful.
#[allow(clippy::cast_possible_truncation)]
pub fn rgba_image(width: u32, height: u32) -> DynamicImage {
    let buffer = RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x * 31 % 256) as u8, (y * 17 % 256) as u8, 128, 200])
    });
    DynamicImage::ImageRgba8(buffer)
}

fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, format).unwrap();
    buffer.into_inner()
}

/// PNG bytes of a `width` x `height` gradient.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(&rgba_image(width, height), ImageFormat::Png)
}

/// JPEG bytes of an opaque `width` x `height` image.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(
        &DynamicImage::ImageRgb8(rgba_image(width, height).to_rgb8()),
        ImageFormat::Jpeg,
    )
}

/// Animated GIF bytes with `frames` frames of 100ms each, looping forever.
pub fn gif_bytes(width: u32, height: u32, frames: usize) -> Vec<u8> {
    let mut buffer = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut buffer);
        encoder.set_repeat(Repeat::Infinite).unwrap();
        let frames = (0..frames).map(|_| {
            Frame::from_parts(
                rgba_image(width, height).to_rgba8(),
                0,
                0,
                Delay::from_numer_denom_ms(100, 1),
            )
        });
        encoder.encode_frames(frames).unwrap();
    }
    buffer
}
