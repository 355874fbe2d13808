//! Segment overlay and weighted compositing.
//!
//! Final pipeline stage. Detected segments are stroked onto a black layer
//! the size of the original image, then the layer is blended over the
//! original with `clip(original * source_weight + layer * line_weight +
//! bias)` per channel.

use image::{Rgb, RgbImage};
use tiny_skia::{FillRule, LineCap, LineJoin, Paint, PathBuilder, Pixmap, Stroke, Transform};

use crate::types::{LineSegment, OverlayStyle, PipelineError};

/// Rasterize `segments` onto a black layer of the given size.
///
/// Strokes are solid (no anti-aliasing) with round caps and are drawn in
/// slice order, so where segments overlap the last one wins. Endpoint
/// coordinates name pixels; strokes run through pixel centers.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidInput`] for a zero-sized layer.
#[allow(clippy::cast_precision_loss)]
pub fn render_lines(
    width: u32,
    height: u32,
    segments: &[LineSegment],
    style: &OverlayStyle,
) -> Result<RgbImage, PipelineError> {
    let Some(mut pixmap) = Pixmap::new(width, height) else {
        return Err(PipelineError::InvalidInput(format!(
            "cannot draw on a {width}x{height} layer"
        )));
    };
    if segments.is_empty() {
        return Ok(RgbImage::new(width, height));
    }

    let [r, g, b] = style.color;
    let mut paint = Paint::default();
    paint.set_color_rgba8(r, g, b, 255);
    paint.anti_alias = false;

    let stroke_width = style.thickness as f32;
    let stroke = Stroke {
        width: stroke_width,
        line_cap: LineCap::Round,
        line_join: LineJoin::Round,
        ..Stroke::default()
    };

    for segment in segments {
        let (x1, y1) = pixel_center(segment.start());
        let (x2, y2) = pixel_center(segment.end());
        if segment.start() == segment.end() {
            // A zero-length stroke has no direction to cap; draw the dot.
            if let Some(dot) = PathBuilder::from_circle(x1, y1, stroke_width / 2.0) {
                pixmap.fill_path(&dot, &paint, FillRule::Winding, Transform::identity(), None);
            }
            continue;
        }
        let mut pb = PathBuilder::new();
        pb.move_to(x1, y1);
        pb.line_to(x2, y2);
        if let Some(path) = pb.finish() {
            pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
        }
    }

    // Pixmap data is premultiplied RGBA; un-premultiply into RGB over black.
    let data = pixmap.data();
    let mut layer = RgbImage::new(width, height);
    for (i, pixel) in layer.pixels_mut().enumerate() {
        let off = i * 4;
        let a = u16::from(data[off + 3]);
        if a == 0 {
            continue;
        }
        let channel = |c: u8| u8::try_from(u16::from(c) * 255 / a).unwrap_or(u8::MAX);
        *pixel = Rgb([
            channel(data[off]),
            channel(data[off + 1]),
            channel(data[off + 2]),
        ]);
    }
    Ok(layer)
}

#[allow(clippy::cast_precision_loss)]
fn pixel_center((x, y): (i32, i32)) -> (f32, f32) {
    (x as f32 + 0.5, y as f32 + 0.5)
}

/// Blend `layer` over `original` channel by channel.
///
/// Each output channel is `original * source_weight + layer * line_weight
/// + bias`, rounded to nearest and saturated to `[0, 255]`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidInput`] if the two images differ in
/// size.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn blend(
    original: &RgbImage,
    layer: &RgbImage,
    style: &OverlayStyle,
) -> Result<RgbImage, PipelineError> {
    if original.dimensions() != layer.dimensions() {
        return Err(PipelineError::InvalidInput(format!(
            "cannot blend a {}x{} layer over a {}x{} image",
            layer.width(),
            layer.height(),
            original.width(),
            original.height()
        )));
    }

    let weigh = |o: u8, l: u8| -> u8 {
        let v = f64::from(o).mul_add(
            style.source_weight,
            f64::from(l).mul_add(style.line_weight, style.bias),
        );
        v.round().clamp(0.0, 255.0) as u8
    };

    Ok(RgbImage::from_fn(original.width(), original.height(), |x, y| {
        let o = original.get_pixel(x, y).0;
        let l = layer.get_pixel(x, y).0;
        Rgb([weigh(o[0], l[0]), weigh(o[1], l[1]), weigh(o[2], l[2])])
    }))
}

/// Draw `segments` and composite them over `original`.
///
/// The output has the same dimensions as `original`. With no segments it
/// is simply the weighted original.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidInput`] for a zero-sized image and
/// [`PipelineError::InvalidConfig`] for an invalid style.
pub fn overlay(
    original: &RgbImage,
    segments: &[LineSegment],
    style: &OverlayStyle,
) -> Result<RgbImage, PipelineError> {
    style.validate()?;
    let layer = render_lines(original.width(), original.height(), segments, style)?;
    blend(original, &layer, style)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn thin(thickness: u32) -> OverlayStyle {
        OverlayStyle {
            thickness,
            ..OverlayStyle::default()
        }
    }

    #[test]
    fn no_segments_scales_original() {
        let original = RgbImage::from_fn(4, 3, |x, _| {
            if x < 2 {
                Rgb([100, 255, 0])
            } else {
                Rgb([1, 2, 3])
            }
        });
        let out = overlay(&original, &[], &OverlayStyle::default()).unwrap();
        assert_eq!(out.dimensions(), (4, 3));
        assert_eq!(out.get_pixel(0, 0).0, [80, 204, 0]);
        // 0.8, 1.6, 2.4 round to 1, 2, 2.
        assert_eq!(out.get_pixel(3, 2).0, [1, 2, 2]);
    }

    #[test]
    fn black_image_without_segments_stays_black() {
        let out = overlay(&RgbImage::new(4, 4), &[], &OverlayStyle::default()).unwrap();
        assert!(out.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn segment_is_drawn_in_line_color() {
        let original = RgbImage::new(40, 20);
        let segments = [LineSegment::new(2, 10, 30, 10)];
        let out = overlay(&original, &segments, &thin(4)).unwrap();
        assert_eq!(out.get_pixel(15, 10).0, [255, 0, 0]);
        assert_eq!(out.get_pixel(15, 2).0, [0, 0, 0]);
        assert_eq!(out.get_pixel(38, 10).0, [0, 0, 0]);
    }

    #[test]
    fn stroke_width_follows_thickness() {
        let original = RgbImage::new(40, 24);
        let segments = [LineSegment::new(2, 10, 30, 10)];
        let out = overlay(&original, &segments, &OverlayStyle::default()).unwrap();
        // Thickness 10 around the center line at y=10.5.
        for y in 7..=13 {
            assert_eq!(out.get_pixel(15, y).0, [255, 0, 0], "row {y}");
        }
        assert_eq!(out.get_pixel(15, 2).0, [0, 0, 0]);
        assert_eq!(out.get_pixel(15, 19).0, [0, 0, 0]);
    }

    #[test]
    fn drawn_pixels_saturate() {
        let original = RgbImage::from_pixel(20, 20, Rgb([255, 255, 255]));
        let segments = [LineSegment::new(0, 10, 19, 10)];
        let out = overlay(&original, &segments, &thin(2)).unwrap();
        assert_eq!(out.get_pixel(10, 10).0, [255, 204, 204]);
        assert_eq!(out.get_pixel(10, 0).0, [204, 204, 204]);
    }

    #[test]
    fn single_point_segment_draws_a_dot() {
        let original = RgbImage::new(20, 20);
        let segments = [LineSegment::new(10, 10, 10, 10)];
        let out = overlay(&original, &segments, &thin(6)).unwrap();
        assert_eq!(out.get_pixel(10, 10).0, [255, 0, 0]);
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0]);
    }

    #[test]
    fn custom_color_and_weights() {
        let style = OverlayStyle {
            color: [0, 200, 0],
            thickness: 3,
            source_weight: 1.0,
            line_weight: 0.5,
            bias: 10.0,
        };
        let original = RgbImage::from_pixel(20, 20, Rgb([20, 20, 20]));
        let segments = [LineSegment::new(10, 0, 10, 19)];
        let out = overlay(&original, &segments, &style).unwrap();
        assert_eq!(out.get_pixel(10, 10).0, [30, 130, 30]);
        assert_eq!(out.get_pixel(0, 10).0, [30, 30, 30]);
    }

    #[test]
    fn segments_partly_outside_are_clipped() {
        let original = RgbImage::new(10, 10);
        let segments = [LineSegment::new(-20, 5, 30, 5)];
        let out = overlay(&original, &segments, &thin(2)).unwrap();
        assert_eq!(out.get_pixel(0, 5).0, [255, 0, 0]);
        assert_eq!(out.get_pixel(9, 5).0, [255, 0, 0]);
    }

    #[test]
    fn empty_layer_rejected() {
        let result = render_lines(0, 5, &[], &OverlayStyle::default());
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
    }

    #[test]
    fn blend_dimension_mismatch_rejected() {
        let result = blend(
            &RgbImage::new(4, 4),
            &RgbImage::new(4, 5),
            &OverlayStyle::default(),
        );
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
    }
}
