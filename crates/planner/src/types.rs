use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Free-form options passed through to conversion and compression tools.
pub type Options = BTreeMap<String, String>;

/// How aggressively a job filters and reshapes its file set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// Copy everything byte-for-byte.
    None,
    /// Drop junk, link oversized files, convert and compress where useful.
    #[default]
    Smart,
    /// Smart, plus skip build output and VCS directories.
    CodeClean,
}

/// What should happen to a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTag {
    Transfer,
    Convert,
    Link,
    Compress,
    Ignore,
}

impl ActionTag {
    /// The lane a file with this tag is routed to, or `None` if it is dropped.
    pub fn lane(&self) -> Option<Lane> {
        match self {
            Self::Transfer => Some(Lane::Express),
            Self::Convert => Some(Lane::Convert),
            Self::Link => Some(Lane::Ghost),
            Self::Compress => Some(Lane::Compress),
            Self::Ignore => None,
        }
    }
}

/// One of the disjoint work categories a file is routed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// Byte-for-byte copy.
    Express,
    /// Needs a conversion plan before dispatch.
    Convert,
    /// Packed before transfer.
    Compress,
    /// Referenced rather than copied.
    Ghost,
}

impl Lane {
    /// All lanes, in dispatch order.
    pub const ALL: [Lane; 4] = [Lane::Express, Lane::Convert, Lane::Compress, Lane::Ghost];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Express => "express",
            Self::Convert => "convert",
            Self::Compress => "compress",
            Self::Ghost => "ghost",
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw entry as produced by the external enumerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedFile {
    pub path: String,
    pub size: u64,
}

impl ListedFile {
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
        }
    }
}

/// An enumerated file with its action decided. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    name: String,
    size: u64,
    extension: String,
    action: ActionTag,
    path: String,
}

impl FileEntry {
    /// Builds an entry, deriving `name` and `extension` from `path`.
    ///
    /// The extension is lowercased and has no leading dot; files without one
    /// get an empty extension.
    pub fn new(path: impl Into<String>, size: u64, action: ActionTag) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        let extension = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
            _ => String::new(),
        };
        Self {
            name,
            size,
            extension,
            action,
            path,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn action(&self) -> ActionTag {
        self.action
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}
