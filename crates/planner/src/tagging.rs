//! Deciding the [`ActionTag`] of each listed file.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::PlannerError;
use crate::compress::TEXT_EXTENSIONS;
use crate::convert::{MediaFormat, default_target};
use crate::types::{ActionTag, FileEntry, FilterMode, ListedFile};
use crate::validation::validate_listing_path;

/// Files at or above this size are linked instead of copied (10 GiB).
const DEFAULT_GHOST_THRESHOLD: u64 = 10 * 1024 * 1024 * 1024;

/// Rules driving smart and code-clean tagging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaggingRules {
    /// Size in bytes from which a file goes to the ghost lane.
    pub ghost_threshold: u64,
    /// Extensions (lowercase, no dot) routed to the compress lane.
    pub compressible_extensions: Vec<String>,
    /// Exact file names that are never transferred.
    pub junk_names: Vec<String>,
    /// Directory names skipped entirely in code-clean mode.
    pub excluded_dirs: Vec<String>,
}

impl Default for TaggingRules {
    fn default() -> Self {
        Self {
            ghost_threshold: DEFAULT_GHOST_THRESHOLD,
            compressible_extensions: TEXT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            junk_names: [".DS_Store", "Thumbs.db", "desktop.ini"]
                .map(String::from)
                .to_vec(),
            excluded_dirs: ["node_modules", "target", ".git", "__pycache__", "build", "dist"]
                .map(String::from)
                .to_vec(),
        }
    }
}

/// Tags a single file. The path must already be valid.
pub fn tag_file(file: &ListedFile, mode: FilterMode, rules: &TaggingRules) -> ActionTag {
    if mode == FilterMode::None {
        return ActionTag::Transfer;
    }

    let mut components = file.path.split('/');
    let name = components.next_back().unwrap_or_default();

    if mode == FilterMode::CodeClean
        && components.any(|dir| rules.excluded_dirs.iter().any(|d| d == dir))
    {
        return ActionTag::Ignore;
    }
    if rules.junk_names.iter().any(|j| j == name) {
        return ActionTag::Ignore;
    }
    if file.size >= rules.ghost_threshold {
        return ActionTag::Link;
    }

    let extension = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => return ActionTag::Transfer,
    };
    if MediaFormat::from_extension(&extension).and_then(default_target).is_some() {
        return ActionTag::Convert;
    }
    if rules.compressible_extensions.iter().any(|e| *e == extension) {
        return ActionTag::Compress;
    }
    ActionTag::Transfer
}

/// Validates and tags a listing, producing immutable [`FileEntry`] values in
/// listing order.
pub fn tag_files(
    listing: impl IntoIterator<Item = ListedFile>,
    mode: FilterMode,
    rules: &TaggingRules,
) -> Result<Vec<FileEntry>, PlannerError> {
    let files = listing
        .into_iter()
        .map(|listed| -> Result<FileEntry, PlannerError> {
            validate_listing_path(&listed.path)?;
            let action = tag_file(&listed, mode, rules);
            Ok(FileEntry::new(listed.path, listed.size, action))
        })
        .collect::<Result<Vec<_>, _>>()?;

    debug!(files = files.len(), mode = ?mode, "listing tagged");
    Ok(files)
}
