//! Per-stage timings and counts for one pipeline run.
//!
//! Timestamps come from an injected [`Clock`]: the pipeline crate never
//! reads the system time itself. `lanefind-io` supplies an
//! `Instant`-backed clock for batch runs.
//!
//! Durations serialize as fractional seconds.

use std::fmt;
use std::fmt::Write as _;
use std::time::Duration;

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};

use crate::types::{Dimensions, PipelineConfig, PipelineError, StagedResult};
use crate::{blur, edge, grayscale, hough, mask, overlay};

/// Source of wall-clock timestamps.
pub trait Clock {
    /// Opaque timestamp type.
    type Instant;

    /// Capture the current time.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// `Duration` as `f64` seconds.
mod seconds {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Duration::try_from_secs_f64(f64::deserialize(deserializer)?).map_err(D::Error::custom)
    }
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Stage 1: grayscale conversion.
    pub grayscale: StageDiagnostics,
    /// Stage 2: Gaussian blur.
    pub blur: StageDiagnostics,
    /// Stage 3: edge detection.
    pub edge_detection: StageDiagnostics,
    /// Stage 4: region-of-interest masking.
    pub mask: StageDiagnostics,
    /// Stage 5: Hough line detection.
    pub line_detection: StageDiagnostics,
    /// Stage 6: overlay and compositing.
    pub overlay: StageDiagnostics,
    /// Total wall-clock duration of the entire pipeline (seconds).
    #[serde(with = "seconds")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "seconds")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics that vary by pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Grayscale conversion metrics.
    Grayscale {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
    },
    /// Gaussian blur metrics.
    Blur {
        /// Kernel side length.
        kernel_size: u32,
        /// Sigma implied by the kernel size.
        sigma: f64,
    },
    /// Edge detection metrics.
    EdgeDetection {
        /// Hysteresis low threshold.
        low_threshold: i32,
        /// Hysteresis high threshold.
        high_threshold: i32,
        /// Number of edge pixels in the output.
        edge_pixel_count: u64,
        /// Total pixel count for computing edge density.
        total_pixel_count: u64,
    },
    /// Region-of-interest masking metrics.
    Mask {
        /// Polygon vertices as `(x, y)`.
        vertices: [(i32, i32); 4],
        /// Edge pixels before masking.
        edge_pixels_before: u64,
        /// Edge pixels inside the region.
        edge_pixels_after: u64,
    },
    /// Hough line detection metrics.
    LineDetection {
        /// Accumulator votes needed to walk a line.
        vote_threshold: u32,
        /// Minimum accepted segment length.
        min_line_length: u32,
        /// Maximum bridged gap.
        max_line_gap: u32,
        /// Segments emitted.
        segment_count: usize,
        /// Length of the longest segment in pixels (0 when none).
        longest_segment: f64,
    },
    /// Overlay metrics.
    Overlay {
        /// Segments drawn.
        segment_count: usize,
        /// Stroke width in pixels.
        thickness: u32,
    },
}

/// High-level summary counts for the entire pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Source image width in pixels.
    pub image_width: u32,
    /// Source image height in pixels.
    pub image_height: u32,
    /// Total pixel count.
    pub pixel_count: u64,
    /// Edge pixels before masking.
    pub edge_pixel_count: u64,
    /// Edge pixels inside the region of interest.
    pub masked_pixel_count: u64,
    /// Line segments detected.
    pub segment_count: usize,
}

impl PipelineDiagnostics {
    /// Stages in pipeline order with their short names.
    #[must_use]
    pub const fn stages(&self) -> [(&'static str, &StageDiagnostics); 6] {
        [
            ("grayscale", &self.grayscale),
            ("blur", &self.blur),
            ("edges", &self.edge_detection),
            ("mask", &self.mask),
            ("lines", &self.line_detection),
            ("overlay", &self.overlay),
        ]
    }

    /// Multi-line text report: one row per stage with its time, share of
    /// the total, and metrics.
    #[must_use]
    pub fn report(&self) -> String {
        let total_ms = duration_ms(self.total_duration);
        let summary = &self.summary;
        let mut out = format!(
            "{}x{} image, {total_ms:.3}ms total\n",
            summary.image_width, summary.image_height
        );
        for (name, stage) in self.stages() {
            let ms = duration_ms(stage.duration);
            let share = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let _ = writeln!(out, "  {name:<10}{ms:>9.3}ms {share:>5.1}%  {}", stage.metrics);
        }
        let _ = write!(
            out,
            "  {} edge px, {} in region, {} segments",
            summary.edge_pixel_count, summary.masked_pixel_count, summary.segment_count
        );
        out
    }
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl fmt::Display for StageMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grayscale { width, height } => write!(f, "{width}x{height}"),
            Self::Blur { kernel_size, sigma } => {
                write!(f, "kernel={kernel_size} sigma={sigma:.2}")
            }
            Self::EdgeDetection {
                low_threshold,
                high_threshold,
                edge_pixel_count,
                total_pixel_count,
            } => write!(
                f,
                "thresholds={low_threshold}/{high_threshold} edges={edge_pixel_count} ({:.1}%)",
                percent(*edge_pixel_count, *total_pixel_count)
            ),
            Self::Mask {
                vertices,
                edge_pixels_before,
                edge_pixels_after,
            } => write!(
                f,
                "roi={vertices:?} edges={edge_pixels_before}->{edge_pixels_after} ({:.1}% kept)",
                percent(*edge_pixels_after, *edge_pixels_before)
            ),
            Self::LineDetection {
                vote_threshold,
                min_line_length,
                max_line_gap,
                segment_count,
                longest_segment,
            } => write!(
                f,
                "votes>={vote_threshold} len>={min_line_length} gap<={max_line_gap} \
                 segments={segment_count} longest={longest_segment:.1}px"
            ),
            Self::Overlay {
                segment_count,
                thickness,
            } => write!(f, "{segment_count} strokes of {thickness}px"),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn percent(part: u64, whole: u64) -> f64 {
    if whole > 0 {
        part as f64 / whole as f64 * 100.0
    } else {
        0.0
    }
}

/// Count edge pixels (non-zero) in a binary image.
#[must_use]
pub fn count_edge_pixels(image: &GrayImage) -> u64 {
    image
        .pixels()
        .map(|p| u64::from(u8::from(p.0[0] != 0)))
        .sum()
}

/// Time one stage, returning its output and duration.
fn timed<C: Clock, T>(clock: &C, stage: impl FnOnce() -> T) -> (T, Duration) {
    let start = clock.now();
    let out = stage();
    (out, clock.elapsed(&start))
}

/// Run the full pipeline, keeping every intermediate and collecting
/// per-stage diagnostics.
///
/// The configuration is validated before any stage runs.
///
/// # Errors
///
/// Returns any [`PipelineError`] raised by validation or by a stage; see
/// [`crate::process`].
pub fn process_with_diagnostics<C: Clock>(
    image: &DynamicImage,
    config: &PipelineConfig,
    clock: &C,
) -> Result<(StagedResult, PipelineDiagnostics), PipelineError> {
    config.validate()?;
    let total_start = clock.now();

    let (gray, gray_time) = timed(clock, || grayscale::to_luma(image));
    let gray = gray?;
    let (width, height) = gray.dimensions();
    let dimensions = Dimensions { width, height };
    let pixel_count = dimensions.pixel_count();
    tracing::debug!(width, height, "grayscale");

    let (blurred, blur_time) = timed(clock, || {
        blur::gaussian_blur(&gray, config.blur_kernel_size)
    });
    let blurred = blurred?;
    tracing::debug!(kernel_size = config.blur_kernel_size, "blur");

    let (edges, edge_time) = timed(clock, || {
        edge::detect_edges(&blurred, config.canny_low, config.canny_high)
    });
    let edges = edges?;
    let edge_pixel_count = count_edge_pixels(&edges);
    tracing::debug!(edge_pixel_count, "edge detection");

    let roi = mask::RoiPolygon::from_dimensions(width, height);
    let (masked, mask_time) = timed(clock, || mask::mask_to_region(&edges, width, height));
    let masked = masked?;
    let masked_pixel_count = count_edge_pixels(&masked);
    tracing::debug!(masked_pixel_count, vertices = ?roi.vertices, "mask");

    let params = config.hough_params();
    let (segments, hough_time) = timed(clock, || hough::detect_lines(&masked, &params));
    let segments = segments?;
    tracing::debug!(segment_count = segments.len(), "line detection");

    let original = image.to_rgb8();
    let style = config.overlay_style();
    let (output, overlay_time) = timed(clock, || overlay::overlay(&original, &segments, &style));
    let output = output?;

    let total_duration = clock.elapsed(&total_start);
    let longest_segment = segments
        .iter()
        .map(|s| s.length())
        .fold(0.0_f64, f64::max);

    let diagnostics = PipelineDiagnostics {
        grayscale: StageDiagnostics {
            duration: gray_time,
            metrics: StageMetrics::Grayscale { width, height },
        },
        blur: StageDiagnostics {
            duration: blur_time,
            metrics: StageMetrics::Blur {
                kernel_size: config.blur_kernel_size,
                sigma: blur::sigma_for_kernel_size(config.blur_kernel_size),
            },
        },
        edge_detection: StageDiagnostics {
            duration: edge_time,
            metrics: StageMetrics::EdgeDetection {
                low_threshold: config.canny_low,
                high_threshold: config.canny_high,
                edge_pixel_count,
                total_pixel_count: pixel_count,
            },
        },
        mask: StageDiagnostics {
            duration: mask_time,
            metrics: StageMetrics::Mask {
                vertices: roi.vertices,
                edge_pixels_before: edge_pixel_count,
                edge_pixels_after: masked_pixel_count,
            },
        },
        line_detection: StageDiagnostics {
            duration: hough_time,
            metrics: StageMetrics::LineDetection {
                vote_threshold: params.vote_threshold,
                min_line_length: params.min_line_length,
                max_line_gap: params.max_line_gap,
                segment_count: segments.len(),
                longest_segment,
            },
        },
        overlay: StageDiagnostics {
            duration: overlay_time,
            metrics: StageMetrics::Overlay {
                segment_count: segments.len(),
                thickness: style.thickness,
            },
        },
        total_duration,
        summary: PipelineSummary {
            image_width: width,
            image_height: height,
            pixel_count,
            edge_pixel_count,
            masked_pixel_count,
            segment_count: segments.len(),
        },
    };

    let staged = StagedResult {
        original,
        grayscale: gray,
        blurred,
        edges,
        roi,
        masked,
        segments,
        output,
        dimensions,
    };
    Ok((staged, diagnostics))
}

/// [`Clock`] that never advances, for callers that only want the
/// intermediates.
pub(crate) struct StoppedClock;

impl Clock for StoppedClock {
    type Instant = ();

    fn now(&self) {}

    fn elapsed(&self, _since: &()) -> Duration {
        Duration::ZERO
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use image::{Luma, RgbImage};

    /// Clock that advances one millisecond per reading.
    struct TickClock(Cell<u64>);

    impl Clock for TickClock {
        type Instant = u64;

        fn now(&self) -> u64 {
            let t = self.0.get();
            self.0.set(t + 1);
            t
        }

        fn elapsed(&self, since: &u64) -> Duration {
            Duration::from_millis(self.now() - since)
        }
    }

    fn sample_diagnostics() -> PipelineDiagnostics {
        let stage = |ms, metrics| StageDiagnostics {
            duration: Duration::from_millis(ms),
            metrics,
        };
        PipelineDiagnostics {
            grayscale: stage(
                5,
                StageMetrics::Grayscale {
                    width: 100,
                    height: 100,
                },
            ),
            blur: stage(
                20,
                StageMetrics::Blur {
                    kernel_size: 5,
                    sigma: 1.1,
                },
            ),
            edge_detection: stage(
                30,
                StageMetrics::EdgeDetection {
                    low_threshold: 50,
                    high_threshold: 150,
                    edge_pixel_count: 500,
                    total_pixel_count: 10_000,
                },
            ),
            mask: stage(
                3,
                StageMetrics::Mask {
                    vertices: [(0, 100), (47, 60), (55, 60), (100, 100)],
                    edge_pixels_before: 500,
                    edge_pixels_after: 120,
                },
            ),
            line_detection: stage(
                12,
                StageMetrics::LineDetection {
                    vote_threshold: 50,
                    min_line_length: 10,
                    max_line_gap: 150,
                    segment_count: 2,
                    longest_segment: 64.5,
                },
            ),
            overlay: stage(
                4,
                StageMetrics::Overlay {
                    segment_count: 2,
                    thickness: 10,
                },
            ),
            total_duration: Duration::from_millis(74),
            summary: PipelineSummary {
                image_width: 100,
                image_height: 100,
                pixel_count: 10_000,
                edge_pixel_count: 500,
                masked_pixel_count: 120,
                segment_count: 2,
            },
        }
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let ms = duration_ms(Duration::from_millis(1234));
        assert!((ms - 1234.0).abs() < 0.01);
    }

    #[test]
    fn count_edge_pixels_counts_nonzero() {
        let mut img = GrayImage::new(10, 10);
        for i in 0..5 {
            img.put_pixel(i, 0, Luma([255]));
        }
        assert_eq!(count_edge_pixels(&img), 5);
    }

    #[test]
    fn report_lists_every_stage() {
        let report = sample_diagnostics().report();
        assert!(report.starts_with("100x100 image, 74.000ms total\n"));
        for (name, _) in sample_diagnostics().stages() {
            assert!(
                report.lines().any(|l| l.trim_start().starts_with(name)),
                "missing {name}"
            );
        }
        assert!(report.contains("segments=2"));
        assert!(report.contains("edges=500->120 (24.0% kept)"));
        assert!(report.ends_with("500 edge px, 120 in region, 2 segments"));
    }

    #[test]
    fn zero_total_duration_reports_zero_share() {
        let mut diag = sample_diagnostics();
        for stage in [
            &mut diag.grayscale,
            &mut diag.blur,
            &mut diag.edge_detection,
            &mut diag.mask,
            &mut diag.line_detection,
            &mut diag.overlay,
        ] {
            stage.duration = Duration::ZERO;
        }
        diag.total_duration = Duration::ZERO;
        let report = diag.report();
        assert!(!report.contains("NaN"));
        assert!(report.contains("0.0%"));
    }

    #[test]
    fn diagnostics_serialize_durations_as_seconds() {
        let json = serde_json::to_value(sample_diagnostics()).unwrap();
        let total = json["total_duration"].as_f64().unwrap();
        assert!((total - 0.074).abs() < 1e-9);
        let back: PipelineDiagnostics = serde_json::from_value(json).unwrap();
        assert_eq!(back.total_duration, Duration::from_millis(74));
        assert_eq!(back.summary, sample_diagnostics().summary);
    }

    #[test]
    fn negative_duration_rejected_on_deserialize() {
        let mut json = serde_json::to_value(sample_diagnostics()).unwrap();
        json["total_duration"] = serde_json::json!(-1.0);
        assert!(serde_json::from_value::<PipelineDiagnostics>(json).is_err());
    }

    #[test]
    fn diagnostics_match_staged_result() {
        let img = RgbImage::from_fn(64, 48, |x, _| {
            if x < 32 {
                image::Rgb([0, 0, 0])
            } else {
                image::Rgb([255, 255, 255])
            }
        });
        let clock = TickClock(Cell::new(0));
        let (staged, diag) = process_with_diagnostics(
            &DynamicImage::ImageRgb8(img),
            &PipelineConfig::default(),
            &clock,
        )
        .unwrap();

        assert_eq!(diag.summary.image_width, 64);
        assert_eq!(diag.summary.edge_pixel_count, count_edge_pixels(&staged.edges));
        assert_eq!(diag.summary.masked_pixel_count, count_edge_pixels(&staged.masked));
        assert_eq!(diag.summary.segment_count, staged.segments.len());
        assert!(diag.summary.edge_pixel_count > 0);
        assert!(diag.summary.masked_pixel_count <= diag.summary.edge_pixel_count);
        assert!(diag.edge_detection.duration >= Duration::from_millis(1));
        assert!(diag.total_duration > diag.blur.duration);
    }

    #[test]
    fn invalid_config_reported_before_any_stage() {
        let config = PipelineConfig {
            canny_low: 200,
            canny_high: 100,
            ..PipelineConfig::default()
        };
        let clock = TickClock(Cell::new(0));
        let result = process_with_diagnostics(
            &DynamicImage::ImageRgb8(RgbImage::new(8, 8)),
            &config,
            &clock,
        );
        assert!(matches!(
            result,
            Err(PipelineError::InvalidThreshold {
                low: 200,
                high: 100
            })
        ));
        assert_eq!(clock.0.get(), 0);
    }
}
