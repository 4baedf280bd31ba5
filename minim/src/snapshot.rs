//! JSON snapshot files.
//!
//! Every file the store writes goes through [`write_atomic`]: the document is
//! serialized to a `.tmp` sibling and renamed over the target, so readers see
//! either the previous snapshot or the new one, never a torn write.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Result, StorageError};

/// Snapshot format version shared by all store files.
pub(crate) const SNAPSHOT_VERSION: u32 = 1;

/// Serializes `value` as pretty JSON and atomically replaces `path` with it.
pub(crate) fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(StorageError::Serialize)?;

    let tmp = tmp_path(path);
    fs::write(&tmp, json).map_err(|e| StorageError::WriteFailed {
        path: tmp.display().to_string(),
        source: e,
    })?;
    fs::rename(&tmp, path).map_err(|e| StorageError::WriteFailed {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(())
}

/// Reads and parses the JSON document at `path`.
pub(crate) fn read<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let json = fs::read_to_string(path).map_err(|e| StorageError::ReadFailed {
        path: path.display().to_string(),
        source: e,
    })?;

    let value = serde_json::from_str(&json).map_err(|e| StorageError::Parse {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(value)
}

/// Rejects snapshots written by an incompatible version.
pub(crate) fn check_version(path: &Path, version: u32) -> Result<()> {
    if version != SNAPSHOT_VERSION {
        return Err(corrupted(
            path,
            format!("unsupported snapshot version: expected {SNAPSHOT_VERSION}, found {version}"),
        ));
    }
    Ok(())
}

/// Builds a [`StorageError::CorruptedSnapshot`] for `path`.
pub(crate) fn corrupted(path: &Path, reason: String) -> crate::error::MinimError {
    StorageError::CorruptedSnapshot {
        path: path.display().to_string(),
        reason,
    }
    .into()
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
