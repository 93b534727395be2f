//! Planning for bulk cloud-to-cloud transfers.
//!
//! Everything in this crate is pure: it decides what to move and how to
//! group it, never touching the network or the filesystem.
//!
//! # Pipeline
//!
//! 1. **Tag**: give each listed file an [`ActionTag`] according to the
//!    job's [`FilterMode`]
//! 2. **Assign**: route tagged files into disjoint [`Lane`]s
//! 3. **Plan**: build conversion/compression plans for the convert and
//!    compress lanes
//! 4. **Batch**: size and cut each lane into memory-bounded batches

mod batch;
mod compress;
mod convert;
mod lanes;
mod progress;
mod tagging;
mod types;
mod validation;

pub use batch::{
    Batch, BatchSizer, DEFAULT_MAX_BATCH_SIZE, DEFAULT_SAFETY_FACTOR, average_file_size,
    batch_size, batches,
};
pub use compress::{
    CompressOptions, CompressionAlgorithm, CompressionPlan, TEXT_EXTENSIONS, compress,
};
pub use convert::{
    ConversionPlan, MediaFormat, MediaKind, Priority, Tooling, conversion_priority, convert,
    default_target, order_by_priority, requires_ffmpeg, requires_imagemagick,
};
pub use lanes::{LaneAssignment, assign};
pub use progress::{Progress, progress};
pub use tagging::{TaggingRules, tag_file, tag_files};
pub use types::{ActionTag, FileEntry, FilterMode, Lane, ListedFile, Options};
pub use validation::validate_listing_path;

use cloudhaul_protocol::ErrorReason;

/// Errors produced while planning.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlannerError {
    #[error("unsupported conversion: {from} -> {to}")]
    UnsupportedConversion { from: String, to: String },

    #[error("invalid {algorithm} level {level} (expected {min}..={max})")]
    InvalidCompressionLevel {
        algorithm: CompressionAlgorithm,
        level: i32,
        min: i32,
        max: i32,
    },

    #[error("invalid path: {0}")]
    InvalidPath(String),
}

impl PlannerError {
    /// Machine-readable reason for this error.
    pub fn reason(&self) -> ErrorReason {
        match self {
            Self::UnsupportedConversion { .. } => ErrorReason::UnsupportedConversion,
            Self::InvalidCompressionLevel { .. } => ErrorReason::InvalidCompressionLevel,
            Self::InvalidPath(_) => ErrorReason::InvalidPath,
        }
    }
}
