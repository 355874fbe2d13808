//! lanefind-io: filesystem and codec boundary for the lanefind pipeline.
//!
//! Everything that touches the disk or the system clock lives here:
//! listing input directories, decoding images, writing PNG results,
//! loading JSON configuration, and the parallel batch driver. Detection
//! itself is delegated to the sans-IO `lanefind-pipeline` crate.

pub mod batch;
pub mod clock;
pub mod error;
pub mod fs;

pub use batch::{BatchOptions, BatchReport, ImageOutcome, ImageStatus, process_directory};
pub use clock::SystemClock;
pub use error::{IoError, Result};
