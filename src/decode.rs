// decode.rs - Upload decoding and family detection

use image::{ImageFormat, ImageReader};
use std::io::Cursor;

use crate::reencode::{ImageFamily, SourceImage};

/// Error types for decoding
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Unreadable image data: {0}")]
    Unreadable(String),
}

/// Map a sniffed container format onto a re-encodable family.
///
/// Everything the `image` crate can decode but we cannot re-encode
/// under a size cap (GIF, WebP, BMP, TIFF) comes back `Unsupported`
/// so the re-encoder can reject it explicitly.
fn detect_family(format: Option<ImageFormat>) -> ImageFamily {
    match format {
        Some(ImageFormat::Jpeg) => ImageFamily::Jpeg,
        Some(ImageFormat::Png) => ImageFamily::Png,
        _ => ImageFamily::Unsupported,
    }
}

/// Decode uploaded bytes into a SourceImage.
///
/// The format is sniffed from magic bytes, never from the declared
/// content type or filename.
pub fn decode_upload(data: &[u8]) -> Result<SourceImage, DecodeError> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| DecodeError::Unreadable(e.to_string()))?;

    let format = reader.format();
    let pixels = reader
        .decode()
        .map_err(|e| DecodeError::Unreadable(e.to_string()))?;

    Ok(SourceImage {
        pixels,
        family: detect_family(format),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn sample_bytes(format: ImageFormat) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, image::Rgb([40, 80, 120])));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), format).unwrap();
        buffer
    }

    #[test]
    fn test_decode_detects_png() {
        let decoded = decode_upload(&sample_bytes(ImageFormat::Png)).unwrap();
        assert_eq!(decoded.family, ImageFamily::Png);
        assert_eq!(decoded.dimensions(), (16, 16));
    }

    #[test]
    fn test_decode_detects_jpeg() {
        let decoded = decode_upload(&sample_bytes(ImageFormat::Jpeg)).unwrap();
        assert_eq!(decoded.family, ImageFamily::Jpeg);
    }

    #[test]
    fn test_decode_flags_bmp_as_unsupported() {
        let decoded = decode_upload(&sample_bytes(ImageFormat::Bmp)).unwrap();
        assert_eq!(decoded.family, ImageFamily::Unsupported);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result = decode_upload(b"this is not an image at all");
        assert!(matches!(result, Err(DecodeError::Unreadable(_))));
    }
}
