//! Image codec for transport-safe payloads.
//!
//! Images travel as base64-encoded JPEG. JPEG is lossy, so `decode(encode(x))`
//! is pixel-similar to `x`, never bit-exact.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Fixed JPEG quality used for every encode.
pub const JPEG_QUALITY: u8 = 75;

/// MIME type of encoded payloads.
pub const MIME_TYPE: &str = "image/jpeg";

/// Errors raised while parsing an encoded image.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid image data: {0}")]
    Image(#[from] image::ImageError),
}

/// Error raised when the compressor rejects an image (e.g. zero-sized).
#[derive(Debug, Error)]
#[error("failed to encode image: {0}")]
pub struct EncodeError(#[from] image::ImageError);

/// An in-memory RGB image.
///
/// An image parsed from text remembers that text, so persisting it again
/// writes the original payload instead of a lossy re-encode.
#[derive(Debug, Clone)]
pub struct Image {
    pixels: RgbImage,
    source: Option<String>,
}

impl Image {
    /// Build an image from a packed RGB8 buffer. Returns `None` when the
    /// buffer is too small for the given dimensions.
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        RgbImage::from_raw(width, height, pixels).map(Self::from)
    }

    /// Parse raw file bytes (JPEG or PNG).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let pixels = image::load_from_memory(bytes)?.to_rgb8();
        Ok(Self::from(pixels))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Packed RGB8 pixel data, row-major.
    pub fn pixels(&self) -> &[u8] {
        self.pixels.as_raw()
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.pixels
    }

    /// The text this image was decoded from, if any.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }
}

impl From<RgbImage> for Image {
    fn from(pixels: RgbImage) -> Self {
        Self {
            pixels,
            source: None,
        }
    }
}

impl PartialEq for Image {
    fn eq(&self, other: &Self) -> bool {
        self.pixels == other.pixels
    }
}

/// Compress an image to JPEG and return it as base64 text.
pub fn encode(image: &Image) -> Result<String, EncodeError> {
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY);
    encoder.encode_image(&image.pixels)?;
    Ok(STANDARD.encode(bytes))
}

/// Parse base64 text produced by [`encode`] (or any base64 JPEG/PNG).
pub fn decode(text: &str) -> Result<Image, DecodeError> {
    let bytes = STANDARD.decode(text.trim())?;
    let mut image = Image::from_bytes(&bytes)?;
    image.source = Some(text.to_string());
    Ok(image)
}

/// Wrap an encoded payload in a `data:` URI.
pub fn data_uri(encoded: &str) -> String {
    format!("data:{MIME_TYPE};base64,{encoded}")
}

impl Serialize for Image {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.source {
            Some(source) => serializer.serialize_str(source),
            None => {
                let encoded = encode(self).map_err(serde::ser::Error::custom)?;
                serializer.serialize_str(&encoded)
            }
        }
    }
}

impl<'de> Deserialize<'de> for Image {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        decode(&text).map_err(serde::de::Error::custom)
    }
}
