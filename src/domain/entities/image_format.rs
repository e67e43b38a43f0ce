//! Container format identification by magic bytes.

use serde::{Deserialize, Serialize};

/// Compressed image container format.
///
/// This is an open, integer-keyed set: the associated constants cover the
/// built-in formats and plugin coders may introduce their own values with
/// [`ImageFormat::custom`]. Detection never looks at file extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageFormat(i32);

impl ImageFormat {
    /// Unknown or undetectable format.
    pub const UNDEFINED: Self = Self(-1);
    /// JPEG / JFIF.
    pub const JPEG: Self = Self(0);
    /// PNG, including APNG.
    pub const PNG: Self = Self(1);
    /// GIF, static or animated.
    pub const GIF: Self = Self(2);
    /// TIFF.
    pub const TIFF: Self = Self(3);
    /// WebP.
    pub const WEBP: Self = Self(4);
    /// HEIC (HEVC-coded HEIF).
    pub const HEIC: Self = Self(5);
    /// HEIF.
    pub const HEIF: Self = Self(6);
    /// PDF.
    pub const PDF: Self = Self(7);
    /// SVG.
    pub const SVG: Self = Self(8);
    /// Windows bitmap.
    pub const BMP: Self = Self(9);
    /// Camera raw.
    pub const RAW: Self = Self(10);

    /// Creates a format from a raw value, for plugin-defined formats.
    #[must_use]
    pub const fn custom(value: i32) -> Self {
        Self(value)
    }

    /// Returns the raw integer value.
    #[must_use]
    pub const fn value(self) -> i32 {
        self.0
    }

    /// Returns true for [`ImageFormat::UNDEFINED`].
    #[must_use]
    pub const fn is_undefined(self) -> bool {
        self.0 == Self::UNDEFINED.0
    }

    /// Sniffs the container format from the leading bytes of `data`.
    #[must_use]
    pub fn detect(data: &[u8]) -> Self {
        let Some(&first) = data.first() else {
            return Self::UNDEFINED;
        };

        match first {
            0xFF => Self::JPEG,
            0x89 => Self::PNG,
            0x47 => Self::GIF,
            0x49 | 0x4D => Self::TIFF,
            b'R' if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" => {
                Self::WEBP
            }
            0x00 if data.len() >= 12 => match &data[4..12] {
                b"ftypheic" | b"ftypheix" | b"ftyphevc" | b"ftyphevx" => Self::HEIC,
                b"ftypmif1" | b"ftypmsf1" => Self::HEIF,
                _ => Self::UNDEFINED,
            },
            b'%' if data.starts_with(b"%PDF") => Self::PDF,
            b'B' if data.starts_with(b"BM") => Self::BMP,
            b'<' if contains_svg_close_tag(data) => Self::SVG,
            _ => Self::UNDEFINED,
        }
    }

    /// Returns the MIME type for this format.
    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self.0 {
            0 => "image/jpeg",
            1 => "image/png",
            2 => "image/gif",
            3 => "image/tiff",
            4 => "image/webp",
            5 => "image/heic",
            6 => "image/heif",
            7 => "application/pdf",
            8 => "image/svg+xml",
            9 => "image/bmp",
            _ => "application/octet-stream",
        }
    }

    /// Maps a MIME type (parameters ignored) back to a format.
    #[must_use]
    pub fn from_mime_type(mime: &str) -> Self {
        let essence = mime.split(';').next().unwrap_or("").trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Self::JPEG,
            "image/png" | "image/apng" => Self::PNG,
            "image/gif" => Self::GIF,
            "image/tiff" => Self::TIFF,
            "image/webp" => Self::WEBP,
            "image/heic" => Self::HEIC,
            "image/heif" => Self::HEIF,
            "application/pdf" => Self::PDF,
            "image/svg+xml" => Self::SVG,
            "image/bmp" | "image/x-ms-bmp" => Self::BMP,
            _ => Self::UNDEFINED,
        }
    }

    /// Returns the equivalent `image` crate format, if it has one.
    #[must_use]
    pub const fn to_image_crate(self) -> Option<image::ImageFormat> {
        match self.0 {
            0 => Some(image::ImageFormat::Jpeg),
            1 => Some(image::ImageFormat::Png),
            2 => Some(image::ImageFormat::Gif),
            3 => Some(image::ImageFormat::Tiff),
            4 => Some(image::ImageFormat::WebP),
            9 => Some(image::ImageFormat::Bmp),
            _ => None,
        }
    }
}

impl Default for ImageFormat {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::UNDEFINED => write!(f, "undefined"),
            Self::JPEG => write!(f, "jpeg"),
            Self::PNG => write!(f, "png"),
            Self::GIF => write!(f, "gif"),
            Self::TIFF => write!(f, "tiff"),
            Self::WEBP => write!(f, "webp"),
            Self::HEIC => write!(f, "heic"),
            Self::HEIF => write!(f, "heif"),
            Self::PDF => write!(f, "pdf"),
            Self::SVG => write!(f, "svg"),
            Self::BMP => write!(f, "bmp"),
            Self::RAW => write!(f, "raw"),
            Self(other) => write!(f, "custom({other})"),
        }
    }
}

// SVG documents end with the closing tag, usually followed by whitespace only.
fn contains_svg_close_tag(data: &[u8]) -> bool {
    const TAIL: usize = 100;
    let start = data.len().saturating_sub(TAIL);
    data[start..].windows(6).any(|w| w == b"</svg>")
}
