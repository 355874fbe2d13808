//! Probabilistic Hough transform for line segments.
//!
//! Implements the progressive probabilistic variant: edge pixels are
//! visited in a seeded pseudo-random order and vote into a
//! `(rho, theta)` accumulator one at a time. As soon as a cell collects
//! enough votes, the line it represents is walked outward from the
//! current pixel in both directions, bridging gaps of up to
//! `max_line_gap` missing pixels. Every pixel the walk passes over is
//! removed from further consideration, and when the walked segment is
//! long enough it is emitted and its pixels' votes are withdrawn. This
//! finds long lines early without ever filling the whole accumulator.
//!
//! This is step 5 in the pipeline, between masking and compositing.

use std::f64::consts::PI;

use image::GrayImage;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::types::{HoughParams, LineSegment, PipelineError};

/// Fractional bits of the fixed-point line walker.
const SHIFT: u32 = 16;

/// Largest accumulator, in cells, the detector will allocate.
pub const MAX_ACCUMULATOR_CELLS: usize = 1 << 26;

/// Detect line segments in a binary edge map.
///
/// Any non-zero pixel counts as an edge. Returns an empty vector, not an
/// error, when no line reaches the vote threshold. Every returned segment
/// has a Euclidean length of at least `params.min_line_length`.
///
/// The segment set is deterministic for a given edge map and
/// `params.seed`; callers should not depend on the order.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] when `params` fails
/// [`HoughParams::validate`], or when `rho` is so fine for this image
/// that the accumulator would exceed [`MAX_ACCUMULATOR_CELLS`].
pub fn detect_lines(
    edges: &GrayImage,
    params: &HoughParams,
) -> Result<Vec<LineSegment>, PipelineError> {
    params.validate()?;
    let (w, h) = edges.dimensions();
    let (width, height) = (w as usize, h as usize);

    let mut state: Vec<PixelState> = edges
        .pixels()
        .map(|p| {
            if p.0[0] == 0 {
                PixelState::Absent
            } else {
                PixelState::Pending
            }
        })
        .collect();
    let mut order: Vec<usize> = state
        .iter()
        .enumerate()
        .filter(|(_, s)| **s == PixelState::Pending)
        .map(|(i, _)| i)
        .collect();
    if order.is_empty() {
        return Ok(Vec::new());
    }
    order.shuffle(&mut StdRng::seed_from_u64(params.seed));

    let mut accumulator = Accumulator::new(w, h, params.rho, params.theta)?;
    let min_length = f64::from(params.min_line_length);
    let mut segments = Vec::new();

    for idx in order {
        if state[idx] != PixelState::Pending {
            continue;
        }
        let (x, y) = (idx % width, idx / width);
        state[idx] = PixelState::Voted;
        let Some(angle) = accumulator.vote(x, y, params.vote_threshold) else {
            continue;
        };

        let walker = Walker::new(x, y, accumulator.angle(angle));
        let ends = [walker, walker.reversed()].map(|walker| {
            walk_to_end(walker, &state, width, height, params.max_line_gap)
        });

        let segment = LineSegment::new(ends[0].0, ends[0].1, ends[1].0, ends[1].1);
        let accepted = segment.length() >= min_length;

        for (walker, end) in [walker, walker.reversed()].into_iter().zip(ends) {
            for (px, py) in walker {
                let Some(i) = index_of(px, py, width, height) else {
                    break;
                };
                if state[i] == PixelState::Voted && accepted {
                    accumulator.unvote(i % width, i / width);
                }
                state[i] = PixelState::Absent;
                if (px, py) == end {
                    break;
                }
            }
        }

        if accepted {
            segments.push(segment);
        }
    }

    tracing::debug!(
        segments = segments.len(),
        width = w,
        height = h,
        "hough line detection finished"
    );
    Ok(segments)
}

/// Whether an edge pixel can still contribute to a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelState {
    /// Not an edge, or already consumed by a walked line.
    Absent,
    /// An edge pixel that has not been sampled yet.
    Pending,
    /// An edge pixel whose votes are in the accumulator.
    Voted,
}

/// Vote counts over the quantized `(theta, rho)` parameter space.
struct Accumulator {
    /// `(cos, sin)` of each angle, pre-divided by the rho resolution.
    trig: Vec<(f64, f64)>,
    /// Angle of each theta bin in radians.
    angles: Vec<f64>,
    num_rho: usize,
    /// Row-major `[theta][rho]` counts.
    counts: Vec<u32>,
}

impl Accumulator {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn new(width: u32, height: u32, rho: f64, theta: f64) -> Result<Self, PipelineError> {
        let angle_bins = (PI / theta).round().max(1.0);
        let span = (f64::from(width) + f64::from(height)).mul_add(2.0, 1.0);
        let rho_bins = (span / rho).round().max(1.0);
        if angle_bins * rho_bins > MAX_ACCUMULATOR_CELLS as f64 {
            return Err(PipelineError::InvalidConfig(format!(
                "hough accumulator of {angle_bins} x {rho_bins} cells for a \
                 {width}x{height} image exceeds {MAX_ACCUMULATOR_CELLS} cells"
            )));
        }
        let (num_angle, num_rho) = (angle_bins as usize, rho_bins as usize);
        let angles: Vec<f64> = (0..num_angle).map(|n| n as f64 * theta).collect();
        let trig = angles
            .iter()
            .map(|a| (a.cos() / rho, a.sin() / rho))
            .collect();
        Ok(Self {
            trig,
            angles,
            num_rho,
            counts: vec![0; num_angle * num_rho],
        })
    }

    fn angle(&self, bin: usize) -> f64 {
        self.angles[bin]
    }

    /// Index of the rho bin for pixel `(x, y)` at the given angle bin.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        clippy::cast_possible_wrap
    )]
    fn rho_bin(&self, x: usize, y: usize, bin: usize) -> usize {
        let (c, s) = self.trig[bin];
        let r = (x as f64).mul_add(c, y as f64 * s).round() as i64;
        let offset = ((self.num_rho - 1) / 2) as i64;
        (r + offset).clamp(0, self.num_rho as i64 - 1) as usize
    }

    /// Add the votes of one pixel. Returns the angle bin of the strongest
    /// cell it touched when that cell has at least `threshold` votes.
    fn vote(&mut self, x: usize, y: usize, threshold: u32) -> Option<usize> {
        let mut best: Option<(usize, u32)> = None;
        for bin in 0..self.trig.len() {
            let cell = bin * self.num_rho + self.rho_bin(x, y, bin);
            self.counts[cell] += 1;
            let votes = self.counts[cell];
            if best.is_none_or(|(_, b)| votes > b) {
                best = Some((bin, votes));
            }
        }
        best.filter(|&(_, votes)| votes >= threshold)
            .map(|(bin, _)| bin)
    }

    /// Withdraw the votes of one previously voted pixel.
    fn unvote(&mut self, x: usize, y: usize) {
        for bin in 0..self.trig.len() {
            let cell = bin * self.num_rho + self.rho_bin(x, y, bin);
            self.counts[cell] = self.counts[cell].saturating_sub(1);
        }
    }
}

/// Fixed-point walker stepping one pixel at a time along the major axis
/// of a line direction.
#[derive(Debug, Clone, Copy)]
struct Walker {
    x: i64,
    y: i64,
    dx: i64,
    dy: i64,
    /// When `true`, `x` is an integer pixel and `y` is fixed-point.
    x_major: bool,
}

impl Walker {
    /// Start at pixel `(x, y)` heading along the line whose normal has
    /// angle `theta`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn new(x: usize, y: usize, theta: f64) -> Self {
        let (a, b) = (-theta.sin(), theta.cos());
        let one = f64::from(1u32 << SHIFT);
        let half = 1i64 << (SHIFT - 1);
        let (x, y) = (x as i64, y as i64);
        if a.abs() > b.abs() {
            Self {
                x,
                y: (y << SHIFT) + half,
                dx: if a > 0.0 { 1 } else { -1 },
                dy: (b * one / a.abs()).round() as i64,
                x_major: true,
            }
        } else {
            Self {
                x: (x << SHIFT) + half,
                y,
                dx: (a * one / b.abs()).round() as i64,
                dy: if b > 0.0 { 1 } else { -1 },
                x_major: false,
            }
        }
    }

    const fn reversed(self) -> Self {
        Self {
            dx: -self.dx,
            dy: -self.dy,
            ..self
        }
    }

    const fn pixel(&self) -> (i32, i32) {
        let (px, py) = if self.x_major {
            (self.x, self.y >> SHIFT)
        } else {
            (self.x >> SHIFT, self.y)
        };
        (clamp_i32(px), clamp_i32(py))
    }
}

impl Iterator for Walker {
    type Item = (i32, i32);

    /// Yields the current pixel, then steps. Never ends on its own; the
    /// caller stops at the image border.
    fn next(&mut self) -> Option<Self::Item> {
        let p = self.pixel();
        self.x += self.dx;
        self.y += self.dy;
        Some(p)
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn clamp_i32(v: i64) -> i32 {
    if v < i32::MIN as i64 {
        i32::MIN
    } else if v > i32::MAX as i64 {
        i32::MAX
    } else {
        v as i32
    }
}

/// Row-major index of `(x, y)`, or `None` outside the image.
#[allow(clippy::cast_sign_loss)]
const fn index_of(x: i32, y: i32, width: usize, height: usize) -> Option<usize> {
    if x < 0 || y < 0 || x as usize >= width || y as usize >= height {
        None
    } else {
        Some(y as usize * width + x as usize)
    }
}

/// Walk until more than `max_gap` consecutive pixels are missing or the
/// border is reached. Returns the last live edge pixel seen.
fn walk_to_end(
    walker: Walker,
    state: &[PixelState],
    width: usize,
    height: usize,
    max_gap: u32,
) -> (i32, i32) {
    let mut end = walker.pixel();
    let mut gap = 0u32;
    for (px, py) in walker {
        let Some(i) = index_of(px, py, width, height) else {
            break;
        };
        if state[i] == PixelState::Absent {
            gap += 1;
            if gap > max_gap {
                break;
            }
        } else {
            gap = 0;
            end = (px, py);
        }
    }
    end
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::Luma;

    fn params(vote_threshold: u32, min_line_length: u32, max_line_gap: u32) -> HoughParams {
        HoughParams {
            vote_threshold,
            min_line_length,
            max_line_gap,
            ..HoughParams::default()
        }
    }

    fn edge_map(width: u32, height: u32, pixels: impl IntoIterator<Item = (u32, u32)>) -> GrayImage {
        let mut img = GrayImage::new(width, height);
        for (x, y) in pixels {
            img.put_pixel(x, y, Luma([255]));
        }
        img
    }

    fn same_endpoints(s: LineSegment, a: (i32, i32), b: (i32, i32)) -> bool {
        (s.start() == a && s.end() == b) || (s.start() == b && s.end() == a)
    }

    #[test]
    fn empty_edge_map_yields_no_segments() {
        let lines = detect_lines(&GrayImage::new(40, 30), &HoughParams::default()).unwrap();
        assert!(lines.is_empty());
    }

    #[test]
    fn sparse_noise_below_threshold_yields_no_segments() {
        let edges = edge_map(50, 50, [(3, 7), (20, 41), (44, 2), (10, 10)]);
        let lines = detect_lines(&edges, &HoughParams::default()).unwrap();
        assert!(lines.is_empty());
    }

    #[test]
    fn horizontal_run_detected_end_to_end() {
        let edges = edge_map(80, 40, (10..=60).map(|x| (x, 20)));
        let lines = detect_lines(&edges, &params(20, 10, 5)).unwrap();
        assert_eq!(lines.len(), 1, "got {lines:?}");
        assert!(
            same_endpoints(lines[0], (10, 20), (60, 20)),
            "got {:?}",
            lines[0]
        );
    }

    #[test]
    fn vertical_run_detected_end_to_end() {
        let edges = edge_map(30, 90, (5..=75).map(|y| (12, y)));
        let lines = detect_lines(&edges, &params(20, 10, 5)).unwrap();
        assert_eq!(lines.len(), 1, "got {lines:?}");
        assert!(
            same_endpoints(lines[0], (12, 5), (12, 75)),
            "got {:?}",
            lines[0]
        );
    }

    #[test]
    fn diagonal_run_detected_end_to_end() {
        let edges = edge_map(70, 70, (5..=64).map(|t| (t, t)));
        let lines = detect_lines(&edges, &params(20, 10, 5)).unwrap();
        assert_eq!(lines.len(), 1, "got {lines:?}");
        assert!(
            same_endpoints(lines[0], (5, 5), (64, 64)),
            "got {:?}",
            lines[0]
        );
    }

    #[test]
    fn gap_larger_than_max_splits_segments() {
        // Two 40-pixel runs separated by an 8-pixel hole.
        let left = (0..=39).map(|x| (x, 10));
        let right = (48..=87).map(|x| (x, 10));
        let edges = edge_map(100, 20, left.chain(right));
        let lines = detect_lines(&edges, &params(15, 10, 5)).unwrap();

        assert!(!lines.is_empty());
        for s in &lines {
            assert_eq!((s.y1, s.y2), (10, 10), "segment left the run: {s:?}");
            let (lo, hi) = (s.x1.min(s.x2), s.x1.max(s.x2));
            assert!(hi <= 39 || lo >= 48, "segment bridges the hole: {s:?}");
        }
        assert!(lines.iter().any(|s| s.x1.max(s.x2) <= 39));
        assert!(lines.iter().any(|s| s.x1.min(s.x2) >= 48));
    }

    #[test]
    fn gap_within_max_is_bridged() {
        let left = (0..=39).map(|x| (x, 10));
        let right = (48..=87).map(|x| (x, 10));
        let edges = edge_map(100, 20, left.chain(right));
        let lines = detect_lines(&edges, &params(15, 10, 20)).unwrap();
        assert!(
            lines.iter().any(|s| s.x1.min(s.x2) <= 39 && s.x1.max(s.x2) >= 48),
            "expected a segment across the hole, got {lines:?}"
        );
    }

    #[test]
    fn short_runs_are_discarded() {
        let edges = edge_map(60, 60, (20..=27).map(|x| (x, 30)));
        let lines = detect_lines(&edges, &params(5, 10, 5)).unwrap();
        assert!(lines.is_empty(), "got {lines:?}");
    }

    #[test]
    fn no_segment_shorter_than_min_length() {
        // A grid of short and long runs in several directions.
        let mut pixels: Vec<(u32, u32)> = Vec::new();
        pixels.extend((2..=90).map(|x| (x, 5)));
        pixels.extend((10..=14).map(|x| (x, 40)));
        pixels.extend((8..=70).map(|y| (60, y)));
        pixels.extend((0..=30).map(|t| (70 + t / 2, 60 + t)));
        let edges = edge_map(100, 100, pixels);
        let min = 12;
        let lines = detect_lines(&edges, &params(8, min, 3)).unwrap();
        assert!(!lines.is_empty());
        for s in &lines {
            assert!(s.length() >= f64::from(min), "too short: {s:?}");
        }
    }

    #[test]
    fn detection_is_deterministic() {
        let mut pixels: Vec<(u32, u32)> = (0..=60).map(|t| (t + 5, 70 - t)).collect();
        pixels.extend((0..=50).map(|x| (x + 10, 20)));
        let edges = edge_map(90, 90, pixels);
        let a = detect_lines(&edges, &params(15, 10, 4)).unwrap();
        let b = detect_lines(&edges, &params(15, 10, 4)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_resolution_rejected() {
        let edges = GrayImage::new(10, 10);
        let bad_rho = HoughParams {
            rho: -1.0,
            ..HoughParams::default()
        };
        assert!(matches!(
            detect_lines(&edges, &bad_rho),
            Err(PipelineError::InvalidConfig(_))
        ));
        let bad_theta = HoughParams {
            theta: 0.0,
            ..HoughParams::default()
        };
        assert!(matches!(
            detect_lines(&edges, &bad_theta),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn oversized_accumulator_rejected() {
        let mut edges = GrayImage::new(40, 40);
        edges.put_pixel(20, 20, Luma([255]));
        for params in [
            HoughParams {
                rho: 1e-12,
                ..HoughParams::default()
            },
            HoughParams {
                theta: 1e-12,
                ..HoughParams::default()
            },
        ] {
            assert!(params.validate().is_ok());
            assert!(matches!(
                detect_lines(&edges, &params),
                Err(PipelineError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn fine_resolution_within_limit_accepted() {
        let mut edges = GrayImage::new(40, 40);
        edges.put_pixel(20, 20, Luma([255]));
        let params = HoughParams {
            rho: 0.01,
            ..HoughParams::default()
        };
        assert_eq!(detect_lines(&edges, &params).unwrap(), vec![]);
    }

    #[test]
    fn walker_follows_horizontal_line() {
        let w = Walker::new(5, 7, PI / 2.0);
        let pixels: Vec<(i32, i32)> = w.take(4).collect();
        assert!(pixels.iter().all(|&(_, y)| y == 7));
        let xs: Vec<i32> = pixels.iter().map(|p| p.0).collect();
        assert!(xs == [5, 4, 3, 2] || xs == [5, 6, 7, 8], "got {xs:?}");
    }

    #[test]
    fn walker_reversal_goes_the_other_way() {
        let w = Walker::new(10, 10, 0.0);
        let forward: Vec<(i32, i32)> = w.take(3).collect();
        let backward: Vec<(i32, i32)> = w.reversed().take(3).collect();
        assert_eq!(forward[0], backward[0]);
        assert_eq!(forward[1].1 - 10, 10 - backward[1].1);
        assert!(forward.iter().chain(&backward).all(|&(x, _)| x == 10));
    }
}
