//! Status file persistence
//!
//! The status file is a JSON object mapping task id to terminal state tag
//! (core orchestration spec §6). It is written atomically after every
//! terminal state transition: write to a sibling temp file, then rename,
//! so a crash mid-write never leaves a half-written file in place.

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::error::StoreError;

/// Load the status map from disk.
///
/// Returns an empty map if the file does not exist yet (first run).
pub fn load_statuses(path: impl AsRef<Path>) -> Result<HashMap<String, String>, StoreError> {
    let path = path.as_ref();
    debug!(?path, "load_statuses: called");
    if !path.exists() {
        debug!(?path, "load_statuses: file does not exist, returning empty map");
        return Ok(HashMap::new());
    }

    let content = std::fs::read_to_string(path).map_err(|source| StoreError::Read {
        path: path.display().to_string(),
        source,
    })?;

    if content.trim().is_empty() {
        return Ok(HashMap::new());
    }

    let statuses: HashMap<String, String> = serde_json::from_str(&content)?;
    Ok(statuses)
}

/// Persist the status map atomically.
///
/// Writes to `<path>.tmp` in the same directory, then renames over `path`.
/// On POSIX filesystems `rename` is atomic, so readers never observe a
/// partially-written status file.
pub fn save_statuses(path: impl AsRef<Path>, statuses: &HashMap<String, String>) -> Result<(), StoreError> {
    let path = path.as_ref();
    debug!(?path, count = statuses.len(), "save_statuses: called");

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Write {
                path: parent.display().to_string(),
                source,
            })?;
        }
    }

    let serialized = serde_json::to_string_pretty(statuses)?;

    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, serialized).map_err(|source| StoreError::Write {
        path: tmp_path.display().to_string(),
        source,
    })?;

    std::fs::rename(&tmp_path, path).map_err(|source| StoreError::Write {
        path: path.display().to_string(),
        source,
    })?;

    debug!(?path, "save_statuses: wrote status file atomically");
    Ok(())
}
