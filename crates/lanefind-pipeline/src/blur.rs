//! Gaussian smoothing for noise reduction before edge detection.
//!
//! The kernel has a fixed odd side length rather than a free sigma, and
//! is applied separably (rows, then columns) with reflect-101 borders
//! (`dcb|abcd|cba`). Mirroring about the border pixel keeps the blur
//! symmetric near image edges, so no artificial gradient is introduced
//! for the edge detector to pick up.
//!
//! [`smooth`] is the preprocessing entry point: grayscale conversion
//! followed by [`gaussian_blur`].

use image::{DynamicImage, GrayImage, Luma};

use crate::types::PipelineError;

/// Fixed binomial kernels used for the small sizes.
const KERNEL_1: [f32; 1] = [1.0];
const KERNEL_3: [f32; 3] = [0.25, 0.5, 0.25];
const KERNEL_5: [f32; 5] = [0.0625, 0.25, 0.375, 0.25, 0.0625];
const KERNEL_7: [f32; 7] = [
    0.031_25, 0.109_375, 0.218_75, 0.281_25, 0.218_75, 0.109_375, 0.031_25,
];

/// Check that `size` is a usable kernel side length.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] when `size` is zero or even.
pub fn check_kernel_size(size: u32) -> Result<(), PipelineError> {
    if size % 2 == 0 {
        return Err(PipelineError::InvalidConfig(format!(
            "blur kernel size must be odd and positive, got {size}"
        )));
    }
    Ok(())
}

/// Standard deviation implied by a kernel side length.
///
/// `0.3 * ((size - 1) * 0.5 - 1) + 0.8`, so the kernel covers roughly
/// three sigma on each side.
#[must_use]
pub fn sigma_for_kernel_size(size: u32) -> f64 {
    0.3f64.mul_add((f64::from(size) - 1.0).mul_add(0.5, -1.0), 0.8)
}

/// Build the normalized 1D Gaussian kernel of the given odd size.
///
/// Sizes up to 7 use fixed binomial weights; larger sizes sample a
/// Gaussian with [`sigma_for_kernel_size`] and normalize to unit sum.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] when `size` is zero or even.
#[allow(clippy::cast_possible_truncation)]
pub fn gaussian_kernel(size: u32) -> Result<Vec<f32>, PipelineError> {
    check_kernel_size(size)?;
    let fixed: Option<&[f32]> = match size {
        1 => Some(&KERNEL_1),
        3 => Some(&KERNEL_3),
        5 => Some(&KERNEL_5),
        7 => Some(&KERNEL_7),
        _ => None,
    };
    if let Some(k) = fixed {
        return Ok(k.to_vec());
    }

    let sigma = sigma_for_kernel_size(size);
    let scale = -0.5 / (sigma * sigma);
    let center = f64::from(size / 2);
    let weights: Vec<f64> = (0..size)
        .map(|i| {
            let d = f64::from(i) - center;
            (scale * d * d).exp()
        })
        .collect();
    let sum: f64 = weights.iter().sum();
    Ok(weights.iter().map(|w| (w / sum) as f32).collect())
}

/// Map a possibly out-of-range index into `0..len` by reflecting about
/// the edge pixel (`dcb|abcd|cba`).
fn reflect_101(i: i64, len: i64) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * len - 2;
    let r = i.rem_euclid(period);
    let mapped = if r < len { r } else { period - r };
    usize::try_from(mapped).unwrap_or(0)
}

/// Apply Gaussian blur with a square kernel of side `kernel_size`.
///
/// A kernel size of 1 returns an identical copy.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] when `kernel_size` is zero or
/// even.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
pub fn gaussian_blur(image: &GrayImage, kernel_size: u32) -> Result<GrayImage, PipelineError> {
    let kernel = gaussian_kernel(kernel_size)?;
    let (w, h) = image.dimensions();
    if kernel.len() == 1 || w == 0 || h == 0 {
        return Ok(image.clone());
    }

    let (wi, hi) = (i64::from(w), i64::from(h));
    let radius = (kernel.len() / 2) as i64;
    let width = w as usize;
    let src = image.as_raw();

    // Horizontal pass into a float buffer.
    let mut horizontal = vec![0.0f32; src.len()];
    for y in 0..h as usize {
        let row = &src[y * width..(y + 1) * width];
        for x in 0..width {
            let mut acc = 0.0f32;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = reflect_101(x as i64 + k as i64 - radius, wi);
                acc += weight * f32::from(row[sx]);
            }
            horizontal[y * width + x] = acc;
        }
    }

    // Vertical pass, rounding back to 8 bits.
    Ok(GrayImage::from_fn(w, h, |x, y| {
        let mut acc = 0.0f32;
        for (k, weight) in kernel.iter().enumerate() {
            let sy = reflect_101(i64::from(y) + k as i64 - radius, hi);
            acc += weight * horizontal[sy * width + x as usize];
        }
        Luma([acc.round().clamp(0.0, 255.0) as u8])
    }))
}

/// Preprocess an image: convert to intensity, then smooth.
///
/// This is stages 1 and 2 of the pipeline, ahead of edge detection.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidInput`] for an empty image or an
/// unsupported pixel layout, and [`PipelineError::InvalidConfig`] for an
/// invalid kernel size.
pub fn smooth(image: &DynamicImage, kernel_size: u32) -> Result<GrayImage, PipelineError> {
    let gray = crate::grayscale::to_luma(image)?;
    gaussian_blur(&gray, kernel_size)
}
