use serde::{Deserialize, Serialize};

/// File and byte completion percentages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub file_percent: f64,
    pub byte_percent: f64,
}

/// Computes completion percentages (0–100).
///
/// A zero total is vacuously complete and reports 100. Counts that overshoot
/// their total (engine retries re-sending bytes) are capped at 100.
pub fn progress(
    total_files: u64,
    transferred_files: u64,
    total_bytes: u64,
    transferred_bytes: u64,
) -> Progress {
    Progress {
        file_percent: percent(transferred_files, total_files),
        byte_percent: percent(transferred_bytes, total_bytes),
    }
}

fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (done as f64 / total as f64 * 100.0).min(100.0)
}
