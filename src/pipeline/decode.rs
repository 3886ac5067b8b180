//! Image decoding: fetched bytes → in-memory RGBA bitmap.
//!
//! The format is sniffed from the leading bytes rather than trusted from a
//! file extension or `Content-Type`; image hosts routinely serve WebP under a
//! `.jpg` name. Decoding is all-or-nothing: a truncated file is an error, not
//! a half-drawn picture.

use crate::config::PipelineConfig;
use crate::error::{DecodeError, LoaderError};
use image::{ImageError, ImageFormat, ImageReader, Limits, RgbaImage};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// A decoded image, normalised to 8-bit RGBA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pixels: RgbaImage,
    format: Option<ImageFormat>,
}

impl DecodedImage {
    pub fn new(pixels: RgbaImage, format: Option<ImageFormat>) -> Self {
        Self { pixels, format }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// The encoding the bytes were in, when known.
    pub fn format(&self) -> Option<ImageFormat> {
        self.format
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_pixels(self) -> RgbaImage {
        self.pixels
    }

    /// Write the bitmap to `path` as PNG.
    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<(), LoaderError> {
        let path = path.as_ref();
        self.pixels
            .save_with_format(path, ImageFormat::Png)
            .map_err(|e| LoaderError::OutputWriteFailed {
                path: path.display().to_string(),
                detail: e.to_string(),
            })
    }
}

/// Turns raw bytes into a [`DecodedImage`]. Pure and deterministic.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError>;
}

/// Decoder backed by the `image` crate (PNG, JPEG, GIF, WebP).
#[derive(Debug, Clone)]
pub struct RasterDecoder {
    max_dimension: u32,
}

impl RasterDecoder {
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_image_dimension)
    }
}

impl Default for RasterDecoder {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl ImageDecoder for RasterDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }

        let format = image::guess_format(bytes).map_err(|_| DecodeError::UnknownFormat)?;

        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);

        let mut reader = ImageReader::with_format(Cursor::new(bytes), format);
        reader.limits(limits);

        let image = reader.decode().map_err(|e| classify(e, format))?;
        let pixels = image.into_rgba8();
        debug!(
            "Decoded {:?} image → {}x{} px",
            format,
            pixels.width(),
            pixels.height()
        );

        Ok(DecodedImage::new(pixels, Some(format)))
    }
}

fn classify(e: ImageError, format: ImageFormat) -> DecodeError {
    match e {
        ImageError::Limits(l) => DecodeError::LimitExceeded(l.to_string()),
        ImageError::Unsupported(_) => DecodeError::UnknownFormat,
        other => DecodeError::Malformed {
            format: format!("{:?}", format).to_lowercase(),
            detail: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage, Rgba};

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([10, 20, 30, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .expect("encode png");
        buf
    }

    #[test]
    fn decodes_png() {
        let img = RasterDecoder::default().decode(&png_bytes(3, 2)).unwrap();
        assert_eq!((img.width(), img.height()), (3, 2));
        assert_eq!(img.format(), Some(ImageFormat::Png));
        assert_eq!(img.pixels().get_pixel(2, 1), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn decodes_jpeg() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([200, 0, 0])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
            .expect("encode jpeg");

        let decoded = RasterDecoder::default().decode(&buf).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 8));
        assert_eq!(decoded.format(), Some(ImageFormat::Jpeg));
    }

    #[test]
    fn empty_bytes() {
        assert_eq!(RasterDecoder::default().decode(&[]), Err(DecodeError::Empty));
    }

    #[test]
    fn html_is_not_an_image() {
        let err = RasterDecoder::default()
            .decode(b"<html><body>404</body></html>")
            .unwrap_err();
        assert_eq!(err, DecodeError::UnknownFormat);
    }

    #[test]
    fn truncated_png_is_malformed() {
        let bytes = png_bytes(16, 16);
        let err = RasterDecoder::default()
            .decode(&bytes[..bytes.len() / 2])
            .unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { ref format, .. } if format == "png"), "got: {err:?}");
    }

    #[test]
    fn oversize_image_hits_limits() {
        let err = RasterDecoder::new(10).decode(&png_bytes(20, 5)).unwrap_err();
        assert!(matches!(err, DecodeError::LimitExceeded(_)), "got: {err:?}");
    }

    #[test]
    fn decode_is_idempotent() {
        let bytes = png_bytes(4, 4);
        let d = RasterDecoder::default();
        assert_eq!(d.decode(&bytes).unwrap(), d.decode(&bytes).unwrap());
    }

    #[test]
    fn save_png_round_trips_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let img = RasterDecoder::default().decode(&png_bytes(5, 7)).unwrap();
        img.save_png(&path).unwrap();

        let back = RasterDecoder::default()
            .decode(&std::fs::read(&path).unwrap())
            .unwrap();
        assert_eq!((back.width(), back.height()), (5, 7));
    }
}
