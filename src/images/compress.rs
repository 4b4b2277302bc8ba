use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbImage};

use super::ImageError;

const QUALITY_STEPS: [u8; 5] = [85, 70, 55, 40, 25];
const MIN_DIMENSION: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionBudget {
    pub max_bytes: usize,
    pub max_dimension: u32,
}

impl CompressionBudget {
    pub const fn new(max_bytes: usize, max_dimension: u32) -> Self {
        CompressionBudget {
            max_bytes,
            max_dimension,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompressedImage {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub width: u32,
    pub height: u32,
}

impl CompressedImage {
    pub fn within(&self, budget: &CompressionBudget) -> bool {
        self.bytes.len() <= budget.max_bytes
    }
}

/// Re-encodes `input` as JPEG, fitting it inside `budget.max_dimension`
/// and lowering quality, then size, until it fits `budget.max_bytes`.
///
/// When no attempt fits, the smallest encoding produced is returned; the
/// caller decides whether that is acceptable.
pub fn compress(input: &[u8], budget: &CompressionBudget) -> Result<CompressedImage, ImageError> {
    let decoded = image::load_from_memory(input)?;
    let mut current = fit_within(decoded, budget.max_dimension);
    let mut smallest: Option<CompressedImage> = None;

    loop {
        let rgb = current.to_rgb8();
        for quality in QUALITY_STEPS {
            let bytes = encode_jpeg(&rgb, quality)?;
            let candidate = CompressedImage {
                bytes,
                content_type: "image/jpeg",
                width: rgb.width(),
                height: rgb.height(),
            };
            if candidate.within(budget) {
                return Ok(candidate);
            }
            let smaller = smallest
                .as_ref()
                .map_or(true, |best| candidate.bytes.len() < best.bytes.len());
            if smaller {
                smallest = Some(candidate);
            }
        }

        let (width, height) = current.dimensions();
        let next_width = width * 3 / 4;
        let next_height = height * 3 / 4;
        if next_width.max(next_height) < MIN_DIMENSION {
            break;
        }
        current = current.resize_exact(next_width.max(1), next_height.max(1), FilterType::Triangle);
    }

    smallest.ok_or(ImageError::Empty)
}

fn fit_within(image: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width.max(height) <= max_dimension {
        return image;
    }
    image.resize(max_dimension, max_dimension, FilterType::Lanczos3)
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(image)?;
    Ok(out.into_inner())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Random noise compresses badly, which makes size budgets bite.
    pub(crate) fn noise_png(width: u32, height: u32) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(7);
        let image = RgbImage::from_fn(width, height, |_, _| Rgb([rng.r#gen(), rng.r#gen(), rng.r#gen()]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn downscales_to_dimension_bound() {
        let input = noise_png(400, 200);
        let result = compress(&input, &CompressionBudget::new(1_000_000, 100)).unwrap();
        assert_eq!((result.width, result.height), (100, 50));
        assert_eq!(result.content_type, "image/jpeg");
    }

    #[test]
    fn shrinks_until_byte_budget_is_met() {
        let input = noise_png(300, 300);
        let budget = CompressionBudget::new(4_000, 300);
        let result = compress(&input, &budget).unwrap();
        assert!(result.within(&budget), "got {} bytes", result.bytes.len());
        assert!(result.width < 300);
    }

    #[test]
    fn returns_smallest_attempt_when_budget_is_unreachable() {
        let input = noise_png(64, 64);
        let result = compress(&input, &CompressionBudget::new(10, 64)).unwrap();
        assert!(result.bytes.len() > 10);
        assert!(result.width.max(result.height) >= MIN_DIMENSION);
    }

    #[test]
    fn garbage_input_is_a_codec_error() {
        let err = compress(b"not an image", &CompressionBudget::new(1_000, 100)).unwrap_err();
        assert!(matches!(err, ImageError::Codec(_)));
    }
}
