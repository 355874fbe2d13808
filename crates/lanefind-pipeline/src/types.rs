//! Shared types for the lanefind detection pipeline.

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can reference
/// intermediate raster data without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` so downstream crates can reference the
/// original and composited images without depending on `image` directly.
pub use image::RgbImage;

/// Re-export `DynamicImage`, the pipeline's input type.
pub use image::DynamicImage;

use crate::mask::RoiPolygon;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Total pixel count (`width * height`).
    #[must_use]
    pub fn pixel_count(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// A straight line segment between two integer pixel positions.
///
/// Endpoints are ordered as the detector walked them; callers must not
/// rely on any particular orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineSegment {
    /// Horizontal position of the first endpoint.
    pub x1: i32,
    /// Vertical position of the first endpoint.
    pub y1: i32,
    /// Horizontal position of the second endpoint.
    pub x2: i32,
    /// Vertical position of the second endpoint.
    pub y2: i32,
}

impl LineSegment {
    /// Create a new segment from `(x1, y1)` to `(x2, y2)`.
    #[must_use]
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// The first endpoint as `(x, y)`.
    #[must_use]
    pub const fn start(self) -> (i32, i32) {
        (self.x1, self.y1)
    }

    /// The second endpoint as `(x, y)`.
    #[must_use]
    pub const fn end(self) -> (i32, i32) {
        (self.x2, self.y2)
    }

    /// Euclidean length in pixels.
    #[must_use]
    pub fn length(self) -> f64 {
        let dx = f64::from(self.x2 - self.x1);
        let dy = f64::from(self.y2 - self.y1);
        dx.hypot(dy)
    }
}

/// Configuration for the detection pipeline.
///
/// Defaults reproduce the tuning the ROI ratios were calibrated against.
/// Call [`validate`](Self::validate) before running stages directly;
/// [`crate::process`] validates on entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Side length of the square Gaussian smoothing kernel. Must be odd.
    pub blur_kernel_size: u32,

    /// Hysteresis low threshold. Gradient magnitudes between this and
    /// `canny_high` are kept only when connected to a strong edge.
    pub canny_low: i32,

    /// Hysteresis high threshold. Gradient magnitudes at or above this
    /// value are always edges.
    pub canny_high: i32,

    /// Distance resolution of the Hough accumulator, in pixels.
    pub hough_rho: f64,

    /// Angular resolution of the Hough accumulator, in radians.
    pub hough_theta: f64,

    /// Minimum accumulator votes before a line candidate is walked.
    pub hough_threshold: u32,

    /// Segments shorter than this many pixels are discarded.
    pub min_line_length: u32,

    /// Largest run of missing edge pixels bridged within one segment.
    pub max_line_gap: u32,

    /// Seed for the order in which edge pixels are sampled.
    pub hough_seed: u64,

    /// Overlay stroke color as `[r, g, b]`.
    pub line_color: [u8; 3],

    /// Overlay stroke width in pixels.
    pub line_thickness: u32,

    /// Weight applied to the original image when compositing.
    pub source_weight: f64,

    /// Weight applied to the line layer when compositing.
    pub line_weight: f64,

    /// Constant added to every channel after weighting.
    pub blend_bias: f64,
}

impl PipelineConfig {
    /// Default Gaussian kernel size.
    pub const DEFAULT_BLUR_KERNEL_SIZE: u32 = 5;
    /// Default hysteresis low threshold.
    pub const DEFAULT_CANNY_LOW: i32 = 50;
    /// Default hysteresis high threshold.
    pub const DEFAULT_CANNY_HIGH: i32 = 150;
    /// Default Hough distance resolution.
    pub const DEFAULT_HOUGH_RHO: f64 = 1.0;
    /// Default Hough angular resolution (one degree).
    pub const DEFAULT_HOUGH_THETA: f64 = std::f64::consts::PI / 180.0;
    /// Default Hough vote threshold.
    pub const DEFAULT_HOUGH_THRESHOLD: u32 = 50;
    /// Default minimum segment length.
    pub const DEFAULT_MIN_LINE_LENGTH: u32 = 10;
    /// Default maximum gap within a segment.
    pub const DEFAULT_MAX_LINE_GAP: u32 = 150;
    /// Default sampling seed.
    pub const DEFAULT_HOUGH_SEED: u64 = 0x1a4e_f14d;
    /// Default overlay color (red).
    pub const DEFAULT_LINE_COLOR: [u8; 3] = [255, 0, 0];
    /// Default overlay stroke width.
    pub const DEFAULT_LINE_THICKNESS: u32 = 10;
    /// Default weight of the original image.
    pub const DEFAULT_SOURCE_WEIGHT: f64 = 0.8;
    /// Default weight of the line layer.
    pub const DEFAULT_LINE_WEIGHT: f64 = 1.0;
    /// Default blend bias.
    pub const DEFAULT_BLEND_BIAS: f64 = 0.0;

    /// Check every parameter before any stage runs.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidThreshold`] for a threshold pair
    /// outside `[0, 255]` or with `canny_low >= canny_high`.
    /// Returns [`PipelineError::InvalidConfig`] for any other
    /// out-of-range parameter.
    pub fn validate(&self) -> Result<(), PipelineError> {
        crate::blur::check_kernel_size(self.blur_kernel_size)?;
        crate::edge::check_thresholds(self.canny_low, self.canny_high)?;
        self.hough_params().validate()?;
        self.overlay_style().validate()
    }

    /// The line detector parameters carried by this config.
    #[must_use]
    pub const fn hough_params(&self) -> HoughParams {
        HoughParams {
            rho: self.hough_rho,
            theta: self.hough_theta,
            vote_threshold: self.hough_threshold,
            min_line_length: self.min_line_length,
            max_line_gap: self.max_line_gap,
            seed: self.hough_seed,
        }
    }

    /// The compositor parameters carried by this config.
    #[must_use]
    pub const fn overlay_style(&self) -> OverlayStyle {
        OverlayStyle {
            color: self.line_color,
            thickness: self.line_thickness,
            source_weight: self.source_weight,
            line_weight: self.line_weight,
            bias: self.blend_bias,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            blur_kernel_size: Self::DEFAULT_BLUR_KERNEL_SIZE,
            canny_low: Self::DEFAULT_CANNY_LOW,
            canny_high: Self::DEFAULT_CANNY_HIGH,
            hough_rho: Self::DEFAULT_HOUGH_RHO,
            hough_theta: Self::DEFAULT_HOUGH_THETA,
            hough_threshold: Self::DEFAULT_HOUGH_THRESHOLD,
            min_line_length: Self::DEFAULT_MIN_LINE_LENGTH,
            max_line_gap: Self::DEFAULT_MAX_LINE_GAP,
            hough_seed: Self::DEFAULT_HOUGH_SEED,
            line_color: Self::DEFAULT_LINE_COLOR,
            line_thickness: Self::DEFAULT_LINE_THICKNESS,
            source_weight: Self::DEFAULT_SOURCE_WEIGHT,
            line_weight: Self::DEFAULT_LINE_WEIGHT,
            blend_bias: Self::DEFAULT_BLEND_BIAS,
        }
    }
}

/// Parameters of the probabilistic Hough line detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoughParams {
    /// Distance resolution in pixels.
    pub rho: f64,
    /// Angular resolution in radians.
    pub theta: f64,
    /// Votes a cell needs before its line is walked.
    pub vote_threshold: u32,
    /// Minimum accepted segment length in pixels.
    pub min_line_length: u32,
    /// Maximum bridged gap in pixels.
    pub max_line_gap: u32,
    /// Sampling order seed.
    pub seed: u64,
}

impl HoughParams {
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] when `rho` or `theta` is
    /// not a finite positive number, or `theta` exceeds half a turn.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.rho.is_finite() || self.rho <= 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "hough rho must be positive, got {}",
                self.rho
            )));
        }
        if !self.theta.is_finite() || self.theta <= 0.0 || self.theta > std::f64::consts::PI {
            return Err(PipelineError::InvalidConfig(format!(
                "hough theta must be in (0, pi], got {}",
                self.theta
            )));
        }
        Ok(())
    }
}

impl Default for HoughParams {
    fn default() -> Self {
        PipelineConfig::default().hough_params()
    }
}

/// How detected segments are drawn and blended over the original.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    /// Stroke color as `[r, g, b]`.
    pub color: [u8; 3],
    /// Stroke width in pixels.
    pub thickness: u32,
    /// Weight of the original image.
    pub source_weight: f64,
    /// Weight of the line layer.
    pub line_weight: f64,
    /// Constant added after weighting.
    pub bias: f64,
}

impl OverlayStyle {
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for a zero stroke width or
    /// a non-finite blend weight.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.thickness == 0 {
            return Err(PipelineError::InvalidConfig(
                "line thickness must be at least 1".to_string(),
            ));
        }
        let weights = [self.source_weight, self.line_weight, self.bias];
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(PipelineError::InvalidConfig(format!(
                "blend weights must be finite, got {weights:?}"
            )));
        }
        Ok(())
    }
}

impl Default for OverlayStyle {
    fn default() -> Self {
        PipelineConfig::default().overlay_style()
    }
}

/// Result of running the pipeline with every intermediate preserved.
///
/// Note: does not derive `PartialEq`; compare the raster fields
/// individually when needed.
#[derive(Debug, Clone)]
pub struct StagedResult {
    /// Original image as 8-bit RGB (the compositor's base layer).
    pub original: RgbImage,
    /// Stage 1: luma image.
    pub grayscale: GrayImage,
    /// Stage 2: Gaussian-smoothed luma image.
    pub blurred: GrayImage,
    /// Stage 3: binary edge map.
    pub edges: GrayImage,
    /// Region of interest used for masking.
    pub roi: RoiPolygon,
    /// Stage 4: edge map restricted to the region of interest.
    pub masked: GrayImage,
    /// Stage 5: detected line segments.
    pub segments: Vec<LineSegment>,
    /// Stage 6: original image with the segments composited on top.
    pub output: RgbImage,
    /// Source image dimensions in pixels.
    pub dimensions: Dimensions,
}

/// Errors that can occur during pipeline processing.
///
/// Every variant is fatal for the image being processed; nothing here is
/// retryable since each stage is a pure function of its input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// An image does not have the shape a stage expects.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The edge detector threshold pair is malformed.
    #[error(
        "invalid edge thresholds: low={low}, high={high} (need 0 <= low < high <= 255)"
    )]
    InvalidThreshold {
        /// Requested low threshold.
        low: i32,
        /// Requested high threshold.
        high: i32,
    },

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}

/// Serde-compatible proxy for `PipelineError`.
///
/// Keeps the wire format stable (externally tagged variants) while the
/// Rust enum stays free to grow helper impls.
#[derive(Serialize, Deserialize)]
enum PipelineErrorProxy {
    InvalidInput(String),
    InvalidThreshold { low: i32, high: i32 },
    InvalidConfig(String),
}

impl Serialize for PipelineError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let proxy = match self {
            Self::InvalidInput(s) => PipelineErrorProxy::InvalidInput(s.clone()),
            Self::InvalidThreshold { low, high } => PipelineErrorProxy::InvalidThreshold {
                low: *low,
                high: *high,
            },
            Self::InvalidConfig(s) => PipelineErrorProxy::InvalidConfig(s.clone()),
        };
        proxy.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PipelineError {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = PipelineErrorProxy::deserialize(deserializer)?;
        Ok(match proxy {
            PipelineErrorProxy::InvalidInput(s) => Self::InvalidInput(s),
            PipelineErrorProxy::InvalidThreshold { low, high } => {
                Self::InvalidThreshold { low, high }
            }
            PipelineErrorProxy::InvalidConfig(s) => Self::InvalidConfig(s),
        })
    }
}
