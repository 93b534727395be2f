use serde::Serialize;

use crate::types::{FileEntry, Lane};

/// Files partitioned into disjoint lanes.
///
/// Every non-ignored input file appears in exactly one lane, and the order
/// within a lane matches the input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LaneAssignment {
    express: Vec<FileEntry>,
    convert: Vec<FileEntry>,
    ghost: Vec<FileEntry>,
    compress: Vec<FileEntry>,
    #[serde(skip)]
    ignored: usize,
}

impl LaneAssignment {
    /// Files routed to `lane`, in input order.
    pub fn lane(&self, lane: Lane) -> &[FileEntry] {
        match lane {
            Lane::Express => &self.express,
            Lane::Convert => &self.convert,
            Lane::Ghost => &self.ghost,
            Lane::Compress => &self.compress,
        }
    }

    /// Number of files across all lanes.
    pub fn len(&self) -> usize {
        self.express.len() + self.convert.len() + self.ghost.len() + self.compress.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of input files tagged `ignore`.
    pub fn ignored(&self) -> usize {
        self.ignored
    }

    /// Total bytes across all lanes.
    pub fn total_bytes(&self) -> u64 {
        Lane::ALL
            .iter()
            .flat_map(|&lane| self.lane(lane))
            .map(FileEntry::size)
            .sum()
    }

    /// Non-empty lanes in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = (Lane, &[FileEntry])> {
        Lane::ALL
            .into_iter()
            .map(|lane| (lane, self.lane(lane)))
            .filter(|(_, files)| !files.is_empty())
    }

    /// Consumes the assignment, returning the files of a lane.
    pub fn into_lane(self, lane: Lane) -> Vec<FileEntry> {
        match lane {
            Lane::Express => self.express,
            Lane::Convert => self.convert,
            Lane::Ghost => self.ghost,
            Lane::Compress => self.compress,
        }
    }

    fn lane_mut(&mut self, lane: Lane) -> &mut Vec<FileEntry> {
        match lane {
            Lane::Express => &mut self.express,
            Lane::Convert => &mut self.convert,
            Lane::Ghost => &mut self.ghost,
            Lane::Compress => &mut self.compress,
        }
    }
}

/// Partitions files into lanes by action tag in a single pass.
pub fn assign(files: impl IntoIterator<Item = FileEntry>) -> LaneAssignment {
    let mut out = LaneAssignment::default();
    for file in files {
        match file.action().lane() {
            Some(lane) => out.lane_mut(lane).push(file),
            None => out.ignored += 1,
        }
    }
    out
}
