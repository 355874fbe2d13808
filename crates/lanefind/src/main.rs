//! lanefind: detect straight lane markings in a directory of road images.
//!
//! Every regular file in the input directory is decoded, run through the
//! detection pipeline, and written as `out_<stem>.png` with the detected
//! segments drawn over it. Files that fail are reported and skipped.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin lanefind -- [OPTIONS] <INPUT_DIR>
//! ```
//!
//! Set `RUST_LOG=debug` for per-stage logging, or pass `--diagnostics`
//! for a timing table per image.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use lanefind_io::batch::{BatchOptions, BatchReport, ImageStatus};
use lanefind_io::error::error_chain;
use lanefind_io::fs::{load_config, parse_config};
use lanefind_io::IoError;
use lanefind_pipeline::PipelineConfig;

/// Find straight lane markings in road images.
///
/// Writes `out_<name>.png` for every image in INPUT_DIR, with detected
/// line segments drawn over the original.
#[derive(Parser)]
#[command(name = "lanefind", version)]
struct Cli {
    /// Directory of input images.
    input_dir: PathBuf,

    /// Directory to write results into (created if missing).
    #[arg(long, short, default_value = ".")]
    output_dir: PathBuf,

    /// Gaussian kernel side length (odd).
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_BLUR_KERNEL_SIZE)]
    blur_kernel_size: u32,

    /// Edge detector low threshold (0-255).
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_CANNY_LOW, allow_hyphen_values = true)]
    canny_low: i32,

    /// Edge detector high threshold (0-255, above the low threshold).
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_CANNY_HIGH, allow_hyphen_values = true)]
    canny_high: i32,

    /// Hough distance resolution in pixels.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_HOUGH_RHO)]
    hough_rho: f64,

    /// Hough angular resolution in radians.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_HOUGH_THETA)]
    hough_theta: f64,

    /// Accumulator votes needed before a line is traced.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_HOUGH_THRESHOLD)]
    hough_threshold: u32,

    /// Shortest segment kept, in pixels.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MIN_LINE_LENGTH)]
    min_line_length: u32,

    /// Longest run of missing pixels bridged within a segment.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MAX_LINE_GAP)]
    max_line_gap: u32,

    /// Seed for the edge pixel sampling order.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_HOUGH_SEED)]
    hough_seed: u64,

    /// Overlay color as `R,G,B`.
    #[arg(long, default_value = "255,0,0", value_parser = parse_color)]
    line_color: [u8; 3],

    /// Overlay stroke width in pixels.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_LINE_THICKNESS)]
    line_thickness: u32,

    /// Weight of the original image in the composite.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_SOURCE_WEIGHT)]
    source_weight: f64,

    /// Weight of the line layer in the composite.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_LINE_WEIGHT)]
    line_weight: f64,

    /// Constant added to every composited channel.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_BLEND_BIAS, allow_hyphen_values = true)]
    blend_bias: f64,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// Missing fields take their defaults.
    #[arg(long, conflicts_with = "config")]
    config_json: Option<String>,

    /// Read the pipeline config from a JSON file instead of the flags.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also write grayscale, blurred, edge, and masked rasters.
    #[arg(long)]
    stages: bool,

    /// Collect per-stage timings and counts for every image.
    #[arg(long)]
    diagnostics: bool,

    /// Print the batch report as JSON instead of a text summary.
    #[arg(long)]
    json: bool,
}

/// Parse `R,G,B` with each component in 0-255.
fn parse_color(s: &str) -> Result<[u8; 3], String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let &[r, g, b] = parts.as_slice() else {
        return Err(format!("expected R,G,B, got {s:?}"));
    };
    let channel = |c: &str| {
        c.parse::<u8>()
            .map_err(|e| format!("invalid color component {c:?}: {e}"))
    };
    Ok([channel(r)?, channel(g)?, channel(b)?])
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// `--config-json` and `--config` take precedence over the individual
/// flags. The result is validated either way.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, IoError> {
    if let Some(ref json) = cli.config_json {
        return parse_config(json, "--config-json");
    }
    if let Some(ref path) = cli.config {
        return load_config(path);
    }

    let config = PipelineConfig {
        blur_kernel_size: cli.blur_kernel_size,
        canny_low: cli.canny_low,
        canny_high: cli.canny_high,
        hough_rho: cli.hough_rho,
        hough_theta: cli.hough_theta,
        hough_threshold: cli.hough_threshold,
        min_line_length: cli.min_line_length,
        max_line_gap: cli.max_line_gap,
        hough_seed: cli.hough_seed,
        line_color: cli.line_color,
        line_thickness: cli.line_thickness,
        source_weight: cli.source_weight,
        line_weight: cli.line_weight,
        blend_bias: cli.blend_bias,
    };
    config.validate()?;
    Ok(config)
}

fn print_summary(report: &BatchReport) {
    for outcome in &report.images {
        match &outcome.status {
            ImageStatus::Done {
                output,
                segments,
                diagnostics,
                ..
            } => {
                println!(
                    "{} -> {} ({} segments)",
                    outcome.input.display(),
                    output.display(),
                    segments.len()
                );
                if let Some(diagnostics) = diagnostics {
                    println!("{}\n", diagnostics.report());
                }
            }
            ImageStatus::Failed { error } => {
                println!("{}: FAILED: {error}", outcome.input.display());
            }
        }
    }
    println!(
        "{} processed, {} failed",
        report.succeeded(),
        report.failed()
    );
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", error_chain(&e));
            return ExitCode::FAILURE;
        }
    };
    tracing::debug!(?config, "pipeline configuration");

    let options = BatchOptions {
        write_stages: cli.stages,
        diagnostics: cli.diagnostics,
    };
    let report = match lanefind_io::process_directory(&cli.input_dir, &cli.output_dir, &config, options)
    {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{}", error_chain(&e));
            return ExitCode::FAILURE;
        }
    };

    if cli.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing report: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        print_summary(&report);
    }

    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
