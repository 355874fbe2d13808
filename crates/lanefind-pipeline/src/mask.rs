//! Region-of-interest masking.
//!
//! Lane markings only appear in the lower part of a forward-facing road
//! image, converging toward a point a little below the horizon. Edge
//! pixels outside a fixed trapezoid are discarded before line detection.
//!
//! This is step 4 in the pipeline, between edge detection and the Hough
//! transform.

use image::{GrayImage, Luma};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point;
use serde::{Deserialize, Serialize};

use crate::types::PipelineError;

/// Divisor of the width giving the upper-left vertex x.
pub const UPPER_LEFT_X_DIVISOR: f64 = 2.1;
/// Divisor of the width giving the upper-right vertex x.
pub const UPPER_RIGHT_X_DIVISOR: f64 = 1.8;
/// Divisor of the height giving the y of both upper vertices.
pub const UPPER_Y_DIVISOR: f64 = 1.65;

/// Trapezoidal region of interest.
///
/// Vertex order is bottom-left, upper-left, upper-right, bottom-right,
/// which traces a simple polygon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiPolygon {
    /// Vertices as `(x, y)` pixel coordinates.
    pub vertices: [(i32, i32); 4],
}

impl RoiPolygon {
    /// Derive the trapezoid for an image of the given size.
    ///
    /// Vertices are `(0, H)`, `(W/2.1, H/1.65)`, `(W/1.8, H/1.65)`,
    /// `(W, H)`, each coordinate truncated toward zero. The ratios assume
    /// one particular camera mounting and are kept as-is.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        let (w, h) = (f64::from(width), f64::from(height));
        let upper_y = (h / UPPER_Y_DIVISOR) as i32;
        Self {
            vertices: [
                (0, height as i32),
                ((w / UPPER_LEFT_X_DIVISOR) as i32, upper_y),
                ((w / UPPER_RIGHT_X_DIVISOR) as i32, upper_y),
                (width as i32, height as i32),
            ],
        }
    }

    /// Rasterize the polygon interior and boundary: 255 inside, 0 outside.
    #[must_use = "returns the rasterized mask"]
    pub fn rasterize(&self, width: u32, height: u32) -> GrayImage {
        let mut mask = GrayImage::new(width, height);
        let points: Vec<Point<i32>> = self
            .vertices
            .iter()
            .map(|&(x, y)| Point::new(x, y))
            .collect();
        draw_polygon_mut(&mut mask, &points, Luma([255]));
        mask
    }
}

/// Zero every edge pixel outside the region of interest.
///
/// The polygon is derived from `width` and `height` (the original
/// image's size), which must match the edge map. The result is the
/// pixel-wise AND of `edges` and the rasterized polygon, so it never
/// contains an edge pixel absent from the input.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidInput`] if the edge map is empty or
/// its dimensions differ from `width` x `height`.
pub fn mask_to_region(
    edges: &GrayImage,
    width: u32,
    height: u32,
) -> Result<GrayImage, PipelineError> {
    if width == 0 || height == 0 {
        return Err(PipelineError::InvalidInput(format!(
            "cannot mask a {width}x{height} image"
        )));
    }
    if edges.dimensions() != (width, height) {
        return Err(PipelineError::InvalidInput(format!(
            "edge map is {}x{} but image is {width}x{height}",
            edges.width(),
            edges.height()
        )));
    }

    let mask = RoiPolygon::from_dimensions(width, height).rasterize(width, height);
    Ok(GrayImage::from_fn(width, height, |x, y| {
        Luma([edges.get_pixel(x, y).0[0] & mask.get_pixel(x, y).0[0]])
    }))
}
