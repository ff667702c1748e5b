use std::fs;
use std::path::Path;

use crate::error::{Result, ScanError};

/// Index encoded in `name`, if it is `prefix` followed by decimal digits only.
pub fn parse_index(name: &str, prefix: &str) -> Option<u64> {
    let suffix = name.strip_prefix(prefix)?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Highest test-file index present in `dir`, or 0 when there is none.
///
/// Used when verifying files written by an earlier session. Gaps are not
/// filled in here; the verify pass reports them as lost files.
pub fn discover_file_count(dir: &Path, prefix: &str) -> Result<u64> {
    let listing_error = |source| ScanError::Discovery {
        path: dir.to_path_buf(),
        source,
    };
    let mut highest = 0u64;
    for entry in fs::read_dir(dir).map_err(listing_error)? {
        let entry = entry.map_err(listing_error)?;
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(index) = parse_index(name, prefix) {
            highest = highest.max(index);
        }
    }
    Ok(highest)
}
