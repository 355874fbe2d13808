//! Color to intensity conversion.
//!
//! First half of the preprocessing stage: an 8-bit RGB (or already
//! single-channel) image in, a `GrayImage` out.

use image::{DynamicImage, GrayImage, Luma};

use crate::types::PipelineError;

/// Convert one RGB pixel to luma with the BT.601 weighting
/// `0.299*R + 0.587*G + 0.114*B`, rounded to nearest.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn rgb_to_luma(r: u8, g: u8, b: u8) -> u8 {
    // Fixed-point weights out of 1000; max sum is 255_000 + 500.
    let sum = 299 * r as u32 + 587 * g as u32 + 114 * b as u32;
    ((sum + 500) / 1000) as u8
}

/// Convert an image to a single-channel intensity image.
///
/// 8-bit RGB input is converted pixel by pixel with [`rgb_to_luma`].
/// 8-bit single-channel input is returned as an owned copy.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidInput`] if the image has a zero
/// dimension or any pixel layout other than 1 or 3 8-bit channels.
#[must_use = "returns the intensity image"]
pub fn to_luma(image: &DynamicImage) -> Result<GrayImage, PipelineError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(PipelineError::InvalidInput(format!(
            "image must be non-empty, got {}x{}",
            image.width(),
            image.height()
        )));
    }

    match image {
        DynamicImage::ImageLuma8(gray) => Ok(gray.clone()),
        DynamicImage::ImageRgb8(rgb) => Ok(GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
            let [r, g, b] = rgb.get_pixel(x, y).0;
            Luma([rgb_to_luma(r, g, b)])
        })),
        other => Err(PipelineError::InvalidInput(format!(
            "unsupported pixel layout {:?}: expected 1 or 3 8-bit channels",
            other.color()
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::{RgbImage, RgbaImage};

    #[test]
    fn black_and_white_are_fixed_points() {
        assert_eq!(rgb_to_luma(0, 0, 0), 0);
        assert_eq!(rgb_to_luma(255, 255, 255), 255);
    }

    #[test]
    fn weights_order_green_red_blue() {
        let r = rgb_to_luma(255, 0, 0);
        let g = rgb_to_luma(0, 255, 0);
        let b = rgb_to_luma(0, 0, 255);
        assert_eq!((r, g, b), (76, 150, 29));
    }

    #[test]
    fn rgb_image_converts_per_pixel() {
        let img = RgbImage::from_fn(3, 2, |x, _| {
            if x == 0 {
                image::Rgb([255, 0, 0])
            } else {
                image::Rgb([10, 10, 10])
            }
        });
        let gray = to_luma(&DynamicImage::ImageRgb8(img)).unwrap();
        assert_eq!(gray.dimensions(), (3, 2));
        assert_eq!(gray.get_pixel(0, 1).0[0], 76);
        assert_eq!(gray.get_pixel(2, 0).0[0], 10);
    }

    #[test]
    fn gray_input_passes_through() {
        let img = GrayImage::from_fn(4, 4, |x, y| Luma([u8::try_from(x * 4 + y).unwrap()]));
        let gray = to_luma(&DynamicImage::ImageLuma8(img.clone())).unwrap();
        assert_eq!(gray, img);
    }

    #[test]
    fn rgba_input_rejected() {
        let img = RgbaImage::new(2, 2);
        let result = to_luma(&DynamicImage::ImageRgba8(img));
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
    }

    #[test]
    fn zero_sized_input_rejected() {
        let result = to_luma(&DynamicImage::ImageRgb8(RgbImage::new(0, 5)));
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
    }
}
