//! Output-size computation for thumbnails and decode byte budgets.

use image::imageops::FilterType;

use crate::domain::entities::{DecodeOptions, DecodedImage, ImageFrame};

/// Bytes per decoded pixel assumed by the byte budget.
pub const BYTES_PER_PIXEL: u64 = 4;

/// Fits `source` into `target`.
///
/// With `preserve_aspect_ratio` the result is the largest size with the
/// source's aspect ratio inside `target`; without it the result is `target`.
/// Sources already inside the box are returned unchanged unless
/// `allow_upscale` is set. Zero-sized targets leave the source unchanged.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn fit_size(
    source: (u32, u32),
    target: (u32, u32),
    preserve_aspect_ratio: bool,
    allow_upscale: bool,
) -> (u32, u32) {
    let (sw, sh) = source;
    let (tw, th) = target;
    if sw == 0 || sh == 0 || tw == 0 || th == 0 {
        return source;
    }

    if !preserve_aspect_ratio {
        if !allow_upscale && tw >= sw && th >= sh {
            return source;
        }
        return (tw, th);
    }

    let ratio = (f64::from(tw) / f64::from(sw)).min(f64::from(th) / f64::from(sh));
    if !allow_upscale && ratio >= 1.0 {
        return source;
    }
    let width = (f64::from(sw) * ratio).round().max(1.0) as u32;
    let height = (f64::from(sh) * ratio).round().max(1.0) as u32;
    (width, height)
}

/// Shrinks `source` so `frame_count * w * h * bytes_per_pixel <= limit_bytes`.
///
/// Keeps the aspect ratio and never goes below 1x1. Sources already within
/// the budget, and a zero budget, leave the size unchanged.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn fit_byte_limit(
    source: (u32, u32),
    frame_count: usize,
    bytes_per_pixel: u64,
    limit_bytes: u64,
) -> (u32, u32) {
    let (sw, sh) = source;
    if limit_bytes == 0 || sw == 0 || sh == 0 {
        return source;
    }
    let frames = frame_count.max(1) as u64;
    let bpp = bytes_per_pixel.max(1);
    let current = u64::from(sw) * u64::from(sh) * bpp * frames;
    if current <= limit_bytes {
        return source;
    }

    let pixels = (limit_bytes / bpp / frames).max(1);
    let ratio = f64::from(sh) / f64::from(sw);
    let width = (pixels as f64 / ratio).sqrt();
    let height = width * ratio;
    let mut w = (width.floor() as u32).clamp(1, sw);
    let mut h = (height.floor() as u32).clamp(1, sh);

    // A side raised to one pixel leaves the other side over budget.
    if u64::from(w) * u64::from(h) > pixels {
        if w >= h {
            w = (pixels / u64::from(h)).clamp(1, u64::from(sw)) as u32;
        } else {
            h = (pixels / u64::from(w)).clamp(1, u64::from(sh)) as u32;
        }
    }
    (w, h)
}

/// Computes the decode output size for `source`, or `None` to keep it.
#[must_use]
pub fn target_size(
    source: (u32, u32),
    frame_count: usize,
    options: &DecodeOptions,
) -> Option<(u32, u32)> {
    let mut size = source;
    if let Some(thumbnail) = options.thumbnail_pixel_size {
        size = fit_size(size, thumbnail, options.preserve_aspect_ratio, false);
    }
    if let Some(limit) = options.scale_down_limit_bytes {
        size = fit_byte_limit(size, frame_count, BYTES_PER_PIXEL, limit);
    }
    (size != source).then_some(size)
}

/// Resizes every frame per `options` and applies the scale factor.
#[must_use]
pub fn apply_decode_options(image: DecodedImage, options: &DecodeOptions) -> DecodedImage {
    let scale = options.effective_scale();
    let source = (image.width(), image.height());
    let Some((width, height)) = target_size(source, image.frames().len(), options) else {
        return image.with_scale(scale);
    };

    let frames: Vec<ImageFrame> = image
        .frames()
        .iter()
        .map(|frame| {
            ImageFrame::timed(
                frame.image.resize_exact(width, height, FilterType::Lanczos3),
                frame.duration,
            )
        })
        .collect();

    match DecodedImage::animated(frames, image.loop_count(), image.format()) {
        Some(resized) => resized
            .with_source_frame_count(image.frame_count())
            .with_extended_data(image.extended_data().cloned())
            .with_incremental(image.is_incremental())
            .with_scale(scale),
        None => image.with_scale(scale),
    }
}
