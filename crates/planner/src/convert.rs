//! Conversion catalog and planning for the convert lane.

use serde::{Deserialize, Serialize};

use crate::PlannerError;
use crate::types::{FileEntry, Options};

/// Broad media family of a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Image,
    Video,
    Document,
}

/// A file format known to the conversion catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaFormat {
    Wav,
    Aiff,
    Flac,
    Mp3,
    Bmp,
    Tiff,
    Webp,
    Png,
    Jpeg,
    Avi,
    Mp4,
    Mkv,
    Pdf,
    Docx,
}

impl MediaFormat {
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Wav | Self::Aiff | Self::Flac | Self::Mp3 => MediaKind::Audio,
            Self::Bmp | Self::Tiff | Self::Webp | Self::Png | Self::Jpeg => MediaKind::Image,
            Self::Avi | Self::Mp4 | Self::Mkv => MediaKind::Video,
            Self::Pdf | Self::Docx => MediaKind::Document,
        }
    }

    /// Canonical extension, without a leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Aiff => "aiff",
            Self::Flac => "flac",
            Self::Mp3 => "mp3",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
            Self::Webp => "webp",
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Avi => "avi",
            Self::Mp4 => "mp4",
            Self::Mkv => "mkv",
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }

    /// Recognises an extension case-insensitively, accepting common aliases.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        Some(match ext.as_str() {
            "wav" | "wave" => Self::Wav,
            "aiff" | "aif" => Self::Aiff,
            "flac" => Self::Flac,
            "mp3" => Self::Mp3,
            "bmp" => Self::Bmp,
            "tiff" | "tif" => Self::Tiff,
            "webp" => Self::Webp,
            "png" => Self::Png,
            "jpg" | "jpeg" => Self::Jpeg,
            "avi" => Self::Avi,
            "mp4" => Self::Mp4,
            "mkv" => Self::Mkv,
            "pdf" => Self::Pdf,
            "docx" => Self::Docx,
            _ => return None,
        })
    }
}

impl std::fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Dispatch priority within the convert lane. Orders `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// External capability a conversion needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tooling {
    /// Audio/video transcoding.
    Ffmpeg,
    /// Raster image re-encoding.
    ImageMagick,
}

struct CatalogEntry {
    input: MediaFormat,
    output: MediaFormat,
    /// Expected output size as a fraction of input size.
    ratio: f64,
    tooling: Tooling,
}

/// Supported pairs. The first entry for an input is its default target.
const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        input: MediaFormat::Wav,
        output: MediaFormat::Flac,
        ratio: 0.55,
        tooling: Tooling::Ffmpeg,
    },
    CatalogEntry {
        input: MediaFormat::Aiff,
        output: MediaFormat::Flac,
        ratio: 0.55,
        tooling: Tooling::Ffmpeg,
    },
    CatalogEntry {
        input: MediaFormat::Bmp,
        output: MediaFormat::Webp,
        ratio: 0.08,
        tooling: Tooling::ImageMagick,
    },
    CatalogEntry {
        input: MediaFormat::Tiff,
        output: MediaFormat::Webp,
        ratio: 0.12,
        tooling: Tooling::ImageMagick,
    },
    CatalogEntry {
        input: MediaFormat::Tiff,
        output: MediaFormat::Png,
        ratio: 0.6,
        tooling: Tooling::ImageMagick,
    },
    CatalogEntry {
        input: MediaFormat::Avi,
        output: MediaFormat::Mp4,
        ratio: 0.4,
        tooling: Tooling::Ffmpeg,
    },
];

fn lookup(input: MediaFormat, output: MediaFormat) -> Option<&'static CatalogEntry> {
    CATALOG
        .iter()
        .find(|e| e.input == input && e.output == output)
}

/// A planned format conversion for one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionPlan {
    pub source_path: String,
    pub input_format: MediaFormat,
    pub output_format: MediaFormat,
    /// Heuristic output size in bytes.
    pub estimated_size: u64,
    pub tooling: Tooling,
    pub priority: Priority,
    pub options: Options,
}

/// Plans converting `file` into `target`.
pub fn convert(
    file: &FileEntry,
    target: MediaFormat,
    options: &Options,
) -> Result<ConversionPlan, PlannerError> {
    let unsupported = || PlannerError::UnsupportedConversion {
        from: file.extension().to_string(),
        to: target.to_string(),
    };
    let input = MediaFormat::from_extension(file.extension()).ok_or_else(unsupported)?;
    let entry = lookup(input, target).ok_or_else(unsupported)?;

    Ok(ConversionPlan {
        source_path: file.path().to_string(),
        input_format: input,
        output_format: target,
        estimated_size: (file.size() as f64 * entry.ratio).round() as u64,
        tooling: entry.tooling,
        priority: conversion_priority(input),
        options: options.clone(),
    })
}

/// Preferred conversion target for a format, if it has one.
pub fn default_target(format: MediaFormat) -> Option<MediaFormat> {
    CATALOG
        .iter()
        .find(|e| e.input == format)
        .map(|e| e.output)
}

/// Audio first, then images and video, documents last.
pub fn conversion_priority(format: MediaFormat) -> Priority {
    match format.kind() {
        MediaKind::Audio => Priority::High,
        MediaKind::Image | MediaKind::Video => Priority::Medium,
        MediaKind::Document => Priority::Low,
    }
}

/// Whether the pair is in the catalog and needs an audio/video executor.
pub fn requires_ffmpeg(input: MediaFormat, output: MediaFormat) -> bool {
    lookup(input, output).is_some_and(|e| e.tooling == Tooling::Ffmpeg)
}

/// Whether the pair is in the catalog and needs an image executor.
pub fn requires_imagemagick(input: MediaFormat, output: MediaFormat) -> bool {
    lookup(input, output).is_some_and(|e| e.tooling == Tooling::ImageMagick)
}

/// Stable-sorts convert-lane files so higher priority formats dispatch first.
///
/// Files with unrecognised extensions sort last.
pub fn order_by_priority(files: &mut [FileEntry]) {
    files.sort_by_key(|f| {
        std::cmp::Reverse(MediaFormat::from_extension(f.extension()).map(conversion_priority))
    });
}
