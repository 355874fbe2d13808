//! Batch driver: run the pipeline over every image in a directory.
//!
//! Images are processed in parallel with rayon. A failing image is
//! recorded in the report and does not stop the others.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};

use lanefind_pipeline::diagnostics::{PipelineDiagnostics, process_with_diagnostics};
use lanefind_pipeline::types::DynamicImage;
use lanefind_pipeline::{LineSegment, PipelineConfig};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::clock::SystemClock;
use crate::error::{IoError, Result, error_chain};
use crate::fs::{list_images, load_image, output_file_name, save_png, stage_file_name};

/// Options that do not affect detection results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOptions {
    /// Also write the grayscale, blurred, edge, and masked rasters.
    pub write_stages: bool,
    /// Attach per-stage timings and counts to each successful outcome.
    pub diagnostics: bool,
}

/// What happened to one input file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageOutcome {
    /// Input file.
    pub input: PathBuf,
    /// Result of processing it.
    #[serde(flatten)]
    pub status: ImageStatus,
}

/// Success or failure of one input file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImageStatus {
    /// The composited image was written.
    Done {
        /// Path of `out_<stem>.png`.
        output: PathBuf,
        /// Detected segments, in detection order.
        segments: Vec<LineSegment>,
        /// Intermediate rasters written, if requested.
        stage_files: Vec<PathBuf>,
        /// Per-stage timings and counts, if requested.
        #[serde(skip_serializing_if = "Option::is_none")]
        diagnostics: Option<PipelineDiagnostics>,
    },
    /// Decoding, processing, or writing failed.
    Failed {
        /// Error message including its causes.
        error: String,
    },
}

/// Per-image outcomes of a batch run, sorted by input file name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    /// Directory that was scanned.
    pub input_dir: PathBuf,
    /// Directory outputs were written to.
    pub output_dir: PathBuf,
    /// One entry per regular file found.
    pub images: Vec<ImageOutcome>,
}

impl BatchReport {
    /// Number of images written successfully.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.images
            .iter()
            .filter(|o| matches!(o.status, ImageStatus::Done { .. }))
            .count()
    }

    /// Number of images that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.images.len() - self.succeeded()
    }

    /// `true` when no image failed (an empty batch counts).
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

/// Process every regular file in `input_dir`, writing results to
/// `output_dir` (created if missing).
///
/// Inputs that share a stem (`road.jpg`, `road.png`) would write the same
/// output file. The first in name order keeps it; the others are
/// recorded as [`IoError::OutputCollision`] failures without being
/// processed.
///
/// # Errors
///
/// Returns [`IoError::Pipeline`] if `config` is invalid,
/// [`IoError::NotADirectory`] or [`IoError::ReadDir`] if `input_dir`
/// cannot be listed, and [`IoError::FileSystem`] if `output_dir` cannot
/// be created. Per-image failures are reported in the [`BatchReport`]
/// instead.
pub fn process_directory(
    input_dir: &Path,
    output_dir: &Path,
    config: &PipelineConfig,
    options: BatchOptions,
) -> Result<BatchReport> {
    config.validate()?;
    let files = list_images(input_dir)?;
    std::fs::create_dir_all(output_dir).map_err(|source| IoError::FileSystem {
        operation: "create output directory",
        path: output_dir.to_path_buf(),
        source,
    })?;
    tracing::info!(
        input_dir = %input_dir.display(),
        output_dir = %output_dir.display(),
        files = files.len(),
        "starting batch"
    );

    let claims = claim_outputs(&files);
    let images: Vec<ImageOutcome> = files
        .par_iter()
        .zip(claims.par_iter())
        .map(|(path, claim)| {
            let result = match claim {
                Some((output, first)) => Err(IoError::OutputCollision {
                    path: path.clone(),
                    output: output.clone(),
                    first: first.clone(),
                }),
                None => process_file(path, output_dir, config, options),
            };
            let status = match result {
                Ok(status) => status,
                Err(e) => {
                    let error = error_chain(&e);
                    tracing::warn!(input = %path.display(), %error, "image failed");
                    ImageStatus::Failed { error }
                }
            };
            ImageOutcome {
                input: path.clone(),
                status,
            }
        })
        .collect();

    let report = BatchReport {
        input_dir: input_dir.to_path_buf(),
        output_dir: output_dir.to_path_buf(),
        images,
    };
    tracing::info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        "batch finished"
    );
    Ok(report)
}

/// For each file, the output name and the earlier file that already
/// writes it, or `None` when the file owns its output.
fn claim_outputs(files: &[PathBuf]) -> Vec<Option<(String, PathBuf)>> {
    let mut owners: HashMap<String, &PathBuf> = HashMap::new();
    files
        .iter()
        .map(|path| {
            let name = output_file_name(path)?;
            match owners.entry(name) {
                Entry::Occupied(owner) => Some((owner.key().clone(), (*owner.get()).clone())),
                Entry::Vacant(slot) => {
                    slot.insert(path);
                    None
                }
            }
        })
        .collect()
}

/// Decode one file, run the pipeline, and write `out_<stem>.png` (plus
/// the stage rasters when requested) into `output_dir`.
///
/// # Errors
///
/// Returns [`IoError::FileName`] for an input without a stem,
/// [`IoError::Decode`], [`IoError::Pipeline`], or [`IoError::Encode`].
pub fn process_file(
    input: &Path,
    output_dir: &Path,
    config: &PipelineConfig,
    options: BatchOptions,
) -> Result<ImageStatus> {
    let name = output_file_name(input).ok_or_else(|| IoError::FileName(input.to_path_buf()))?;
    let image = load_image(input)?;
    let (staged, diagnostics) =
        process_with_diagnostics(&DynamicImage::ImageRgb8(image), config, &SystemClock)?;

    let output = output_dir.join(name);
    save_png(&staged.output, &output)?;

    let mut stage_files = Vec::new();
    if options.write_stages {
        let stages = [
            ("gray", &staged.grayscale),
            ("blur", &staged.blurred),
            ("edges", &staged.edges),
            ("masked", &staged.masked),
        ];
        for (stage, raster) in stages {
            let name = stage_file_name(input, stage)
                .ok_or_else(|| IoError::FileName(input.to_path_buf()))?;
            let path = output_dir.join(name);
            save_png(raster, &path)?;
            stage_files.push(path);
        }
    }

    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        segments = staged.segments.len(),
        elapsed_ms = diagnostics.total_duration.as_secs_f64() * 1000.0,
        "processed image"
    );
    Ok(ImageStatus::Done {
        output,
        segments: staged.segments,
        stage_files,
        diagnostics: options.diagnostics.then_some(diagnostics),
    })
}
