// reencode.rs - Size-constrained re-encoding module

use image::{DynamicImage, GenericImageView};
use std::io::Cursor;

use jpeg_encoder::{ColorType, Encoder};

/// Tuning constants for the size search
pub struct Config {
    pub quality_start: u8,
    pub quality_floor: u8,
    pub quality_step: u8,
    pub shrink_factor: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            quality_start: 95,
            quality_floor: 10,
            quality_step: 5,
            shrink_factor: 0.9,
        }
    }
}

/// Encoding family of an uploaded image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFamily {
    Jpeg,
    Png,
    Unsupported,
}

impl ImageFamily {
    pub fn content_type(&self) -> &'static str {
        match self {
            ImageFamily::Jpeg => "image/jpeg",
            ImageFamily::Png => "image/png",
            ImageFamily::Unsupported => "application/octet-stream",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFamily::Jpeg => "jpeg",
            ImageFamily::Png => "png",
            ImageFamily::Unsupported => "bin",
        }
    }
}

/// A decoded upload: pixel data plus the family it arrived in
pub struct SourceImage {
    pub pixels: DynamicImage,
    pub family: ImageFamily,
}

impl SourceImage {
    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }
}

/// Caller-supplied output size cap, in binary kilobytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeBudget {
    kb: u32,
}

impl SizeBudget {
    /// Budgets must be positive; a zero cap can never be met.
    pub fn from_kb(kb: u32) -> Option<SizeBudget> {
        if kb == 0 {
            return None;
        }
        Some(SizeBudget { kb })
    }

    pub fn kb(&self) -> u32 {
        self.kb
    }

    pub fn as_bytes(&self) -> u64 {
        self.kb as u64 * 1024
    }
}

/// Result of a re-encode pass
#[derive(Debug)]
pub struct EncodedResult {
    pub data: Vec<u8>,
    pub family: ImageFamily,
    /// Quality level the final buffer was encoded at (JPEG family only)
    pub quality: Option<u8>,
    /// False when even the last resort still exceeds the budget
    pub within_budget: bool,
}

impl EncodedResult {
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Error types for re-encoding
#[derive(Debug, thiserror::Error)]
pub enum ReencodeError {
    #[error("Unsupported image format")]
    UnsupportedFormat,
    #[error("Image processing error: {0}")]
    ImageError(String),
}

/// Compute shrunk dimensions, truncating like the resize convention expects
fn shrink_dimensions(width: u32, height: u32, factor: f64) -> (u32, u32) {
    (
        (width as f64 * factor) as u32,
        (height as f64 * factor) as u32,
    )
}

/// Encode the image as JPEG at a given quality
fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ReencodeError> {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();

    // jpeg-encoder addresses dimensions as u16
    if width > u16::MAX as u32 || height > u16::MAX as u32 {
        return Err(ReencodeError::ImageError(format!(
            "Image too large for JPEG encoding: {}x{}",
            width, height
        )));
    }

    let mut buffer = Vec::new();
    let encoder = Encoder::new(&mut buffer, quality);
    encoder
        .encode(rgb.as_raw(), width as u16, height as u16, ColorType::Rgb)
        .map_err(|e| ReencodeError::ImageError(e.to_string()))?;

    Ok(buffer)
}

/// Encode the image as PNG with full structural optimization
fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, ReencodeError> {
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
        .map_err(|e| ReencodeError::ImageError(e.to_string()))?;

    oxipng::optimize_from_memory(&buffer, &oxipng::Options::max_compression())
        .map_err(|e| ReencodeError::ImageError(e.to_string()))
}

/// Walk the quality ladder down until the buffer fits or the floor is hit
fn reencode_jpeg(
    img: &DynamicImage,
    target_bytes: u64,
    config: &Config,
) -> Result<EncodedResult, ReencodeError> {
    let mut quality = config.quality_start;

    loop {
        let buffer = encode_jpeg(img, quality)?;
        let size = buffer.len() as u64;

        if size <= target_bytes || quality <= config.quality_floor {
            return Ok(EncodedResult {
                within_budget: size <= target_bytes,
                data: buffer,
                family: ImageFamily::Jpeg,
                quality: Some(quality),
            });
        }

        quality -= config.quality_step;
    }
}

/// Optimized encode, with a single shrink pass if the budget is missed
fn reencode_png(
    img: &DynamicImage,
    target_bytes: u64,
    config: &Config,
) -> Result<EncodedResult, ReencodeError> {
    let buffer = encode_png(img)?;

    if buffer.len() as u64 <= target_bytes {
        return Ok(EncodedResult {
            data: buffer,
            family: ImageFamily::Png,
            quality: None,
            within_budget: true,
        });
    }

    // One corrective pass only: 10% off each dimension, then accept
    // whatever comes out. The input image is left untouched.
    let (width, height) = img.dimensions();
    let (new_width, new_height) = shrink_dimensions(width, height, config.shrink_factor);
    let shrunk = img.resize_exact(new_width, new_height, image::imageops::FilterType::Lanczos3);

    let buffer = encode_png(&shrunk)?;
    let size = buffer.len() as u64;

    Ok(EncodedResult {
        within_budget: size <= target_bytes,
        data: buffer,
        family: ImageFamily::Png,
        quality: None,
    })
}

/// Re-encode an image so its byte length fits the budget, best effort.
///
/// JPEG uploads get a linear quality search from 95 down to 10 in steps
/// of 5; PNG uploads get one optimized encode and at most one 10%
/// dimension reduction. Either way a buffer comes back; `within_budget`
/// reports whether the cap was actually met.
pub fn reencode(image: &SourceImage, budget: SizeBudget) -> Result<EncodedResult, ReencodeError> {
    let config = Config::default();
    let target_bytes = budget.as_bytes();

    match image.family {
        ImageFamily::Jpeg => reencode_jpeg(&image.pixels, target_bytes, &config),
        ImageFamily::Png => reencode_png(&image.pixels, target_bytes, &config),
        ImageFamily::Unsupported => Err(ReencodeError::UnsupportedFormat),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    /// Incompressible test fixture: per-pixel hash noise
    fn noise_image(width: u32, height: u32) -> DynamicImage {
        let img = RgbImage::from_fn(width, height, |x, y| {
            let mut h = ((x as u64) << 32) | (y as u64 + 1);
            h ^= h >> 33;
            h = h.wrapping_mul(0xff51afd7ed558ccd);
            h ^= h >> 33;
            image::Rgb([(h & 0xff) as u8, ((h >> 8) & 0xff) as u8, ((h >> 16) & 0xff) as u8])
        });
        DynamicImage::ImageRgb8(img)
    }

    /// Highly compressible fixture: flat gray
    fn flat_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([128, 128, 128])))
    }

    fn source(pixels: DynamicImage, family: ImageFamily) -> SourceImage {
        SourceImage { pixels, family }
    }

    #[test]
    fn test_budget_rejects_zero() {
        assert!(SizeBudget::from_kb(0).is_none());
        assert_eq!(SizeBudget::from_kb(500).unwrap().as_bytes(), 500 * 1024);
    }

    #[test]
    fn test_shrink_dimensions() {
        assert_eq!(shrink_dimensions(3000, 2000, 0.9), (2700, 1800));
        assert_eq!(shrink_dimensions(200, 150, 0.9), (180, 135));
        assert_eq!(shrink_dimensions(101, 101, 0.9), (90, 90));
    }

    #[test]
    fn test_jpeg_generous_budget_single_pass() {
        let src = source(flat_image(64, 64), ImageFamily::Jpeg);
        let result = reencode(&src, SizeBudget::from_kb(1024).unwrap()).unwrap();

        assert_eq!(result.quality, Some(95));
        assert!(result.within_budget);
        assert_eq!(result.family, ImageFamily::Jpeg);
    }

    #[test]
    fn test_jpeg_tiny_budget_returns_floor_buffer() {
        let src = source(noise_image(128, 128), ImageFamily::Jpeg);
        let result = reencode(&src, SizeBudget::from_kb(1).unwrap()).unwrap();

        assert_eq!(result.quality, Some(10));
        assert!(!result.within_budget);
        assert!(!result.data.is_empty());
        // Still a JPEG stream
        assert_eq!(&result.data[0..2], &[0xff, 0xd8]);
    }

    #[test]
    fn test_jpeg_quality_stays_on_ladder() {
        let img = noise_image(128, 128);
        let floor_size = encode_jpeg(&img, 10).unwrap().len() as u64;
        let start_size = encode_jpeg(&img, 95).unwrap().len() as u64;

        // Land the budget strictly between the two extremes
        let budget_kb = (floor_size / 1024) as u32 + 2;
        let budget = SizeBudget::from_kb(budget_kb).unwrap();
        assert!(start_size > budget.as_bytes());

        let src = source(img, ImageFamily::Jpeg);
        let result = reencode(&src, budget).unwrap();

        let quality = result.quality.unwrap();
        assert!((10..=95).contains(&quality));
        assert_eq!((95 - quality) % 5, 0);
        assert!(quality < 95);
        assert!(result.within_budget);
        assert!(result.len() <= budget.as_bytes());
    }

    #[test]
    fn test_jpeg_search_is_deterministic() {
        let budget = SizeBudget::from_kb(6).unwrap();
        let first = reencode(&source(noise_image(96, 96), ImageFamily::Jpeg), budget).unwrap();
        let second = reencode(&source(noise_image(96, 96), ImageFamily::Jpeg), budget).unwrap();

        assert_eq!(first.len(), second.len());
        assert_eq!(first.quality, second.quality);
    }

    #[test]
    fn test_png_generous_budget_keeps_dimensions() {
        let src = source(flat_image(200, 150), ImageFamily::Png);
        let result = reencode(&src, SizeBudget::from_kb(1024).unwrap()).unwrap();

        assert!(result.within_budget);
        assert_eq!(result.family, ImageFamily::Png);
        let out = image::load_from_memory(&result.data).unwrap();
        assert_eq!(out.dimensions(), (200, 150));
    }

    #[test]
    fn test_png_over_budget_shrinks_exactly_once() {
        // Noise does not deflate: the first optimized encode stays far
        // above a 1 KB cap, forcing the corrective pass.
        let src = source(noise_image(120, 80), ImageFamily::Png);
        let result = reencode(&src, SizeBudget::from_kb(1).unwrap()).unwrap();

        assert_eq!(result.family, ImageFamily::Png);
        assert!(!result.within_budget);
        let out = image::load_from_memory(&result.data).unwrap();
        assert_eq!(out.dimensions(), (108, 72));
    }

    #[test]
    fn test_png_input_not_mutated() {
        let src = source(noise_image(120, 80), ImageFamily::Png);
        let _ = reencode(&src, SizeBudget::from_kb(1).unwrap()).unwrap();

        assert_eq!(src.dimensions(), (120, 80));
    }

    #[test]
    fn test_unsupported_family_is_rejected() {
        let src = source(flat_image(32, 32), ImageFamily::Unsupported);
        let result = reencode(&src, SizeBudget::from_kb(100).unwrap());

        assert!(matches!(result, Err(ReencodeError::UnsupportedFormat)));
    }
}
