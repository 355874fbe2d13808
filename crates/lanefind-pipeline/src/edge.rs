//! Canny edge detection.
//!
//! Sobel gradients, non-maximum suppression, and double-threshold
//! hysteresis over an already-smoothed intensity image. Unlike
//! [`imageproc::edges::canny`], no extra blur is applied here: smoothing
//! is the preprocessing stage's job and its kernel size is configurable.
//!
//! Hysteresis tracks all 8 neighbours and bounds-checks every neighbour
//! before access, so edges touching the border are handled safely.

use image::{GrayImage, Luma};
use imageproc::definitions::Image;
use imageproc::filter::filter_clamped;
use imageproc::kernel;

use crate::types::PipelineError;

/// Largest threshold accepted.
pub const MAX_THRESHOLD: i32 = 255;

/// Value written for edge pixels.
pub const EDGE: u8 = 255;

/// Check a hysteresis threshold pair.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidThreshold`] unless
/// `0 <= low < high <= 255`.
pub const fn check_thresholds(low: i32, high: i32) -> Result<(), PipelineError> {
    if low < 0 || high > MAX_THRESHOLD || low >= high {
        return Err(PipelineError::InvalidThreshold { low, high });
    }
    Ok(())
}

/// Detect edges using the Canny algorithm.
///
/// Returns a binary image of the same size: [`EDGE`] (255) for edge
/// pixels, 0 elsewhere. Pixels with gradient magnitude at or above
/// `high_threshold` are definite edges; those in
/// `[low_threshold, high_threshold)` are edges only if 8-connected,
/// possibly through other such pixels, to a definite edge. The
/// outermost pixel ring is never marked.
///
/// This is stage 3 in the pipeline, between smoothing and masking.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidThreshold`] for a malformed threshold
/// pair and [`PipelineError::InvalidInput`] for a zero-sized image.
pub fn detect_edges(
    image: &GrayImage,
    low_threshold: i32,
    high_threshold: i32,
) -> Result<GrayImage, PipelineError> {
    check_thresholds(low_threshold, high_threshold)?;
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return Err(PipelineError::InvalidInput(format!(
            "edge detection needs a non-empty image, got {w}x{h}"
        )));
    }

    let gx: Image<Luma<i16>> = filter_clamped(image, kernel::SOBEL_HORIZONTAL_3X3);
    let gy: Image<Luma<i16>> = filter_clamped(image, kernel::SOBEL_VERTICAL_3X3);
    let gradients = Gradients::new(&gx, &gy);

    let thinned = non_maximum_suppression(&gradients);

    #[allow(clippy::cast_precision_loss)]
    let (low, high) = (low_threshold as f32, high_threshold as f32);
    Ok(hysteresis(&thinned, w, h, low, high))
}

/// Per-pixel gradient components and magnitude, stored row-major.
struct Gradients {
    width: usize,
    height: usize,
    gx: Vec<f32>,
    gy: Vec<f32>,
    magnitude: Vec<f32>,
}

impl Gradients {
    fn new(gx: &Image<Luma<i16>>, gy: &Image<Luma<i16>>) -> Self {
        let (w, h) = gx.dimensions();
        let gx: Vec<f32> = gx.pixels().map(|p| f32::from(p.0[0])).collect();
        let gy: Vec<f32> = gy.pixels().map(|p| f32::from(p.0[0])).collect();
        let magnitude = gx.iter().zip(&gy).map(|(h, v)| h.hypot(*v)).collect();
        Self {
            width: w as usize,
            height: h as usize,
            gx,
            gy,
            magnitude,
        }
    }
}

/// Direction of the gradient, quantized to the four neighbour axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sector {
    /// 0 degrees: compare left and right.
    Horizontal,
    /// 45 degrees: compare the down-right / up-left diagonal.
    Diagonal,
    /// 90 degrees: compare up and down.
    Vertical,
    /// 135 degrees: compare the down-left / up-right diagonal.
    AntiDiagonal,
}

impl Sector {
    fn from_gradient(gx: f32, gy: f32) -> Self {
        let mut angle = gy.atan2(gx).to_degrees();
        if angle < 0.0 {
            angle += 180.0;
        }
        if (22.5..67.5).contains(&angle) {
            Self::Diagonal
        } else if (67.5..112.5).contains(&angle) {
            Self::Vertical
        } else if (112.5..157.5).contains(&angle) {
            Self::AntiDiagonal
        } else {
            Self::Horizontal
        }
    }

    /// Offsets of the two neighbours along the gradient direction.
    const fn neighbours(self) -> [(isize, isize); 2] {
        match self {
            Self::Horizontal => [(-1, 0), (1, 0)],
            Self::Diagonal => [(1, 1), (-1, -1)],
            Self::Vertical => [(0, -1), (0, 1)],
            Self::AntiDiagonal => [(-1, 1), (1, -1)],
        }
    }
}

/// Keep only pixels that are local maxima along their gradient
/// direction. The border ring is left at zero.
fn non_maximum_suppression(g: &Gradients) -> Vec<f32> {
    let mut out = vec![0.0f32; g.magnitude.len()];
    if g.width < 3 || g.height < 3 {
        return out;
    }
    for y in 1..g.height - 1 {
        for x in 1..g.width - 1 {
            let idx = y * g.width + x;
            let m = g.magnitude[idx];
            if m == 0.0 {
                continue;
            }
            let [before, after] = Sector::from_gradient(g.gx[idx], g.gy[idx])
                .neighbours()
                .map(|(dx, dy)| {
                    let nx = x.wrapping_add_signed(dx);
                    let ny = y.wrapping_add_signed(dy);
                    g.magnitude[ny * g.width + nx]
                });
            // Ties go to the first pixel along the gradient, so a plateau
            // of equal magnitudes still thins to one pixel.
            if m > before && m >= after {
                out[idx] = m;
            }
        }
    }
    out
}

/// 8-connected neighbour offsets.
const NEIGHBOURS: [(isize, isize); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

/// Double-threshold hysteresis. Non-recursive depth-first flood fill
/// from every strong pixel through pixels at or above `low`.
fn hysteresis(thinned: &[f32], width: u32, height: u32, low: f32, high: f32) -> GrayImage {
    let (w, h) = (width as usize, height as usize);
    let mut out = vec![0u8; thinned.len()];
    let mut stack = Vec::new();

    for start in 0..thinned.len() {
        if thinned[start] < high || out[start] != 0 {
            continue;
        }
        out[start] = EDGE;
        stack.push(start);
        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % w, idx / w);
            for &(dx, dy) in &NEIGHBOURS {
                let nx = x.wrapping_add_signed(dx);
                let ny = y.wrapping_add_signed(dy);
                // Wrapped coordinates land far above the bounds.
                if nx >= w || ny >= h {
                    continue;
                }
                let n = ny * w + nx;
                if out[n] == 0 && thinned[n] >= low && thinned[n] > 0.0 {
                    out[n] = EDGE;
                    stack.push(n);
                }
            }
        }
    }

    GrayImage::from_raw(width, height, out).unwrap_or_else(|| GrayImage::new(width, height))
}
