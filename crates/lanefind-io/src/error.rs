use std::path::PathBuf;

use lanefind_pipeline::PipelineError;

/// Errors raised at the filesystem and codec boundary.
///
/// Directory and configuration errors abort a whole batch. Decode,
/// encode, and pipeline errors only fail the image they belong to.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// The input path exists but is not a directory, or does not exist.
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// Listing a directory failed part way.
    #[error("failed to read directory {}", path.display())]
    ReadDir {
        /// Directory being listed.
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// A file could not be opened or decoded as an image.
    #[error("failed to decode {}", path.display())]
    Decode {
        /// Offending input file.
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Writing an output image failed.
    #[error("failed to encode {}", path.display())]
    Encode {
        /// Output file being written.
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// An input file has no usable stem to derive output names from.
    #[error("cannot derive an output name from {}", .0.display())]
    FileName(PathBuf),

    /// Another input in the batch already writes to the same output
    /// file, e.g. `road.jpg` and `road.png` both map to `out_road.png`.
    #[error("{} also maps to {output}, already claimed by {}", path.display(), first.display())]
    OutputCollision {
        /// Input that was skipped.
        path: PathBuf,
        /// Output file name both inputs map to.
        output: String,
        /// Input that keeps the output.
        first: PathBuf,
    },

    /// Reading a file or creating a directory failed.
    #[error("{operation} failed for {}", path.display())]
    FileSystem {
        /// What was being attempted.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration document is not a valid `PipelineConfig`.
    #[error("invalid configuration in {origin}")]
    Config {
        /// Where the document came from (a path or a flag name).
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    /// The pipeline rejected the image or the configuration.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Shorthand for results at the I/O boundary.
pub type Result<T> = std::result::Result<T, IoError>;

/// Render an error and its `source` chain as one line, `outer: inner`.
#[must_use]
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}
