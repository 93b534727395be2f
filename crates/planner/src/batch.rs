use serde::Serialize;

use crate::types::{FileEntry, Lane};

/// Default multiplier applied to the average file size when budgeting memory.
pub const DEFAULT_SAFETY_FACTOR: f64 = 2.0;

/// Default ceiling on files per batch, keeping scheduling queues bounded.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

/// Computes memory-bounded batch sizes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchSizer {
    pub safety_factor: f64,
    pub max_batch_size: usize,
}

impl Default for BatchSizer {
    fn default() -> Self {
        Self {
            safety_factor: DEFAULT_SAFETY_FACTOR,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

impl BatchSizer {
    /// `clamp(floor(available / (average × safety_factor)), 1, max_batch_size)`.
    ///
    /// An average of zero (empty or all-empty files) yields the upper bound.
    pub fn batch_size(&self, average_file_size: u64, available_memory: u64) -> usize {
        let upper = self.max_batch_size.max(1);
        if average_file_size == 0 {
            return upper;
        }
        let per_file = average_file_size as f64 * self.safety_factor.max(f64::MIN_POSITIVE);
        let fit = (available_memory as f64 / per_file).floor();
        if fit >= upper as f64 {
            upper
        } else {
            (fit as usize).max(1)
        }
    }
}

/// [`BatchSizer::batch_size`] with default tuning.
pub fn batch_size(average_file_size: u64, available_memory: u64) -> usize {
    BatchSizer::default().batch_size(average_file_size, available_memory)
}

/// Mean size of `files` in bytes; zero for an empty slice.
pub fn average_file_size(files: &[FileEntry]) -> u64 {
    if files.is_empty() {
        return 0;
    }
    let total: u64 = files.iter().map(FileEntry::size).sum();
    total / files.len() as u64
}

/// A contiguous run of files from one lane, dispatched as a unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Batch {
    pub lane: Lane,
    /// Position of this batch within its lane.
    pub index: usize,
    pub files: Vec<FileEntry>,
    pub total_bytes: u64,
}

/// Cuts a lane into batches of at most `size` files, preserving order.
pub fn batches(lane: Lane, files: &[FileEntry], size: usize) -> Vec<Batch> {
    files
        .chunks(size.max(1))
        .enumerate()
        .map(|(index, chunk)| Batch {
            lane,
            index,
            files: chunk.to_vec(),
            total_bytes: chunk.iter().map(FileEntry::size).sum(),
        })
        .collect()
}
