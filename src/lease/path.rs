use std::path::{Path, PathBuf};

/// Suffix of the abort endpoint co-located with each lease file.
pub const ABORT_SUFFIX: &str = "sock";

/// Path of the lease file for `id` inside `dir`.
pub fn lease_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(id.to_string())
}

/// Path of the abort endpoint for `id` inside `dir`.
pub fn abort_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{}.{}", id, ABORT_SUFFIX))
}

/// Parse a directory-entry basename under the lease naming rule.
///
/// A lease basename is the decimal representation of the job id with no
/// sign and no leading zeros ("0" itself is valid). Anything else is not a
/// lease file and must stay invisible to the scanner; accepting "007" next
/// to "7" would let two files alias one job.
pub fn parse_lease_basename(name: &str) -> Option<u64> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if name.len() > 1 && name.starts_with('0') {
        return None;
    }
    name.parse().ok()
}
