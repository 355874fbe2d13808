//! lanefind-pipeline: Pure lane-line detection pipeline (sans-IO).
//!
//! Finds straight lane markings in a road image through:
//! grayscale -> blur -> edge detection -> region-of-interest mask ->
//! probabilistic Hough transform -> overlay.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! images and returns structured data. Directory scanning and image
//! encode/decode live in `lanefind-io`.

pub mod blur;
pub mod diagnostics;
pub mod edge;
pub mod grayscale;
pub mod hough;
pub mod mask;
pub mod overlay;
pub mod types;

pub use mask::RoiPolygon;
pub use types::{
    Dimensions, HoughParams, LineSegment, OverlayStyle, PipelineConfig, PipelineError,
    StagedResult,
};

/// Run the full lane detection pipeline and return the composited image.
///
/// # Pipeline steps
///
/// 1. Grayscale conversion
/// 2. Gaussian blur (noise reduction)
/// 3. Canny edge detection
/// 4. Region-of-interest mask
/// 5. Probabilistic Hough line detection
/// 6. Segment overlay blended over the original
///
/// The output always has the input's dimensions. An image with no
/// detectable lines still produces an output (the weighted original).
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] or
/// [`PipelineError::InvalidThreshold`] if `config` fails validation, and
/// [`PipelineError::InvalidInput`] for an empty image or a pixel layout
/// other than 8-bit gray or RGB.
pub fn process(
    image: &types::DynamicImage,
    config: &PipelineConfig,
) -> Result<types::RgbImage, PipelineError> {
    process_staged(image, config).map(|staged| staged.output)
}

/// Run the full pipeline, preserving every intermediate result.
///
/// Same stages and errors as [`process`].
///
/// # Errors
///
/// See [`process`].
pub fn process_staged(
    image: &types::DynamicImage,
    config: &PipelineConfig,
) -> Result<StagedResult, PipelineError> {
    diagnostics::process_with_diagnostics(image, config, &diagnostics::StoppedClock)
        .map(|(staged, _)| staged)
}
