//! In-process WebP backend.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG) | `image` crate (pure Rust decoders) |
//! | Encode → lossless WebP | `webp::Encoder::encode_lossless` |
//! | Encode → lossy WebP | `webp::Encoder::encode` at the requested quality |
//!
//! libwebp only accepts 8-bit RGB/RGBA input, so anything else (16-bit PNG,
//! grayscale, palette) is widened to RGBA8 first.

use super::backend::{BackendError, ImageBackend};
use super::params::{Encoding, WebpParams};
use image::{DynamicImage, ImageReader};
use std::path::Path;

/// Backend using `image` for decoding and libwebp for encoding.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Load and decode an image from disk, sniffing the format from content so a
/// misnamed file still decodes.
fn load_image(path: &Path) -> Result<DynamicImage, BackendError> {
    ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| {
            BackendError::ProcessingFailed(format!("Failed to decode {}: {}", path.display(), e))
        })
}

fn to_encodable(img: DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => img,
        other if other.color().has_alpha() => DynamicImage::ImageRgba8(other.to_rgba8()),
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

impl ImageBackend for RustBackend {
    fn encode_webp(&self, params: &WebpParams) -> Result<(), BackendError> {
        let img = to_encodable(load_image(&params.source)?);
        let encoder = webp::Encoder::from_image(&img).map_err(|e| {
            BackendError::ProcessingFailed(format!(
                "Cannot encode {} as WebP: {e}",
                params.source.display()
            ))
        })?;
        let encoded = match params.encoding {
            Encoding::Lossless => encoder.encode_lossless(),
            Encoding::Lossy(quality) => encoder.encode(quality.value() as f32),
        };
        std::fs::write(&params.output, &*encoded)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::params::Quality;
    use crate::test_helpers::{write_jpeg, write_png};
    use tempfile::TempDir;

    fn assert_is_webp(path: &Path) {
        let bytes = std::fs::read(path).unwrap();
        assert!(bytes.len() > 12, "output too small");
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WEBP");
    }

    #[test]
    fn encodes_png_losslessly() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("logo.png");
        write_png(&source, 16, 8);
        let params = WebpParams::for_source(&source, Quality::default()).unwrap();

        RustBackend::new().encode_webp(&params).unwrap();

        assert_is_webp(&params.output);
        let decoded = webp::Decoder::new(&std::fs::read(&params.output).unwrap())
            .decode()
            .unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[test]
    fn encodes_jpeg_lossy() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("photo.jpg");
        write_jpeg(&source, 32, 24);
        let params = WebpParams::for_source(&source, Quality::new(60)).unwrap();

        RustBackend::new().encode_webp(&params).unwrap();

        assert_is_webp(&params.output);
    }

    #[test]
    fn overwrites_existing_output() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("logo.png");
        write_png(&source, 4, 4);
        let params = WebpParams::for_source(&source, Quality::default()).unwrap();
        std::fs::write(&params.output, b"stale partial output").unwrap();

        RustBackend::new().encode_webp(&params).unwrap();

        assert_is_webp(&params.output);
    }

    #[test]
    fn grayscale_png_is_widened() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("gray.png");
        image::GrayImage::from_pixel(5, 5, image::Luma([128]))
            .save(&source)
            .unwrap();
        let params = WebpParams::for_source(&source, Quality::default()).unwrap();

        RustBackend::new().encode_webp(&params).unwrap();

        assert_is_webp(&params.output);
    }

    #[test]
    fn corrupt_source_is_processing_error() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("broken.png");
        std::fs::write(&source, b"not a png").unwrap();
        let params = WebpParams::for_source(&source, Quality::default()).unwrap();

        let err = RustBackend::new().encode_webp(&params).unwrap_err();
        assert!(matches!(err, BackendError::ProcessingFailed(_)));
        assert!(!params.output.exists());
    }
}
