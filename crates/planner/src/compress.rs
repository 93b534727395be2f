//! Compression planning for the compress lane.

use serde::{Deserialize, Serialize};

use crate::PlannerError;
use crate::types::{FileEntry, Options};

/// Extensions whose content is text-like and compresses well.
pub const TEXT_EXTENSIONS: &[&str] = &["txt", "log", "csv", "json", "xml", "sql"];

const TEXT_RATIO: f64 = 0.3;
const BINARY_RATIO: f64 = 0.9;

/// A supported compression algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionAlgorithm {
    /// Zstandard (.zst)
    #[default]
    Zstd,
    /// Gzip (.gz)
    Gzip,
    /// Brotli (.br)
    Brotli,
    /// XZ/LZMA (.xz)
    Xz,
    /// Bzip2 (.bz2)
    Bzip2,
}

impl CompressionAlgorithm {
    /// Suffix appended to the input extension, including the dot.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Zstd => ".zst",
            Self::Gzip => ".gz",
            Self::Brotli => ".br",
            Self::Xz => ".xz",
            Self::Bzip2 => ".bz2",
        }
    }

    pub fn default_level(&self) -> i32 {
        match self {
            Self::Zstd => 3,
            Self::Gzip | Self::Xz => 6,
            Self::Brotli | Self::Bzip2 => 9,
        }
    }

    /// Inclusive range of accepted levels.
    pub fn level_range(&self) -> (i32, i32) {
        match self {
            Self::Zstd => (1, 22),
            Self::Gzip | Self::Bzip2 => (1, 9),
            Self::Brotli => (0, 11),
            Self::Xz => (0, 9),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zstd => "zstd",
            Self::Gzip => "gzip",
            Self::Brotli => "brotli",
            Self::Xz => "xz",
            Self::Bzip2 => "bzip2",
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller choices for [`compress`]; unset fields take algorithm defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressOptions {
    #[serde(default)]
    pub algorithm: Option<CompressionAlgorithm>,
    #[serde(default)]
    pub level: Option<i32>,
    #[serde(default)]
    pub extra: Options,
}

/// A planned compression of one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressionPlan {
    pub source_path: String,
    pub input_extension: String,
    pub algorithm: CompressionAlgorithm,
    pub compression_level: i32,
    /// `input_extension` followed by the algorithm suffix, e.g. `log.zst`.
    pub output_extension: String,
    /// Heuristic output size in bytes.
    pub estimated_size: u64,
    pub options: Options,
}

/// Plans compressing `file`. Defaults to zstd at level 3.
pub fn compress(
    file: &FileEntry,
    options: &CompressOptions,
) -> Result<CompressionPlan, PlannerError> {
    let algorithm = options.algorithm.unwrap_or_default();
    let level = options.level.unwrap_or_else(|| algorithm.default_level());
    let (min, max) = algorithm.level_range();
    if !(min..=max).contains(&level) {
        return Err(PlannerError::InvalidCompressionLevel {
            algorithm,
            level,
            min,
            max,
        });
    }

    let ratio = if TEXT_EXTENSIONS.iter().any(|e| *e == file.extension()) {
        TEXT_RATIO
    } else {
        BINARY_RATIO
    };

    Ok(CompressionPlan {
        source_path: file.path().to_string(),
        input_extension: file.extension().to_string(),
        algorithm,
        compression_level: level,
        output_extension: format!("{}{}", file.extension(), algorithm.suffix()),
        estimated_size: (file.size() as f64 * ratio).round() as u64,
        options: options.extra.clone(),
    })
}
