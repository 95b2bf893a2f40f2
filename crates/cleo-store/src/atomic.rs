//! Atomic file primitives: temp-file + fsync + rename writes and tolerant
//! reads.

use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;

use crate::error::StoreError;

/// Write bytes atomically: temp file in the target's directory (so the
/// rename stays within one filesystem), fsync, rename over the target.
/// Parent directories are created on demand.
pub fn atomic_write(target: &Path, data: &[u8]) -> Result<(), StoreError> {
    let parent = target
        .parent()
        .ok_or_else(|| StoreError::file(format!("{} has no parent", target.display())))?;

    std::fs::create_dir_all(parent)
        .map_err(|e| StoreError::file(format!("create {}: {e}", parent.display())))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| StoreError::file(format!("temp file in {}: {e}", parent.display())))?;

    tmp.write_all(data)
        .map_err(|e| StoreError::file(format!("write temp for {}: {e}", target.display())))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StoreError::file(format!("fsync temp for {}: {e}", target.display())))?;

    tmp.persist(target)
        .map_err(|e| StoreError::file(format!("persist {}: {e}", target.display())))?;

    Ok(())
}

/// Serialize to pretty JSON (2-space indent) with a trailing newline and
/// write atomically.
pub fn write_json<T: Serialize>(target: &Path, value: &T) -> Result<(), StoreError> {
    let mut text = serde_json::to_string_pretty(value)
        .map_err(|e| StoreError::file(format!("serialize {}: {e}", target.display())))?;
    text.push('\n');
    atomic_write(target, text.as_bytes())
}

/// Read and parse a JSON file. `Ok(None)` if the file does not exist;
/// `FileError` if it exists but cannot be read or parsed.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StoreError::file(format!("read {}: {e}", path.display())));
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StoreError::file(format!("parse {}: {e}", path.display())))
}

/// SHA-256 of a file's current content, or `None` if it does not exist.
pub fn file_digest(path: &Path) -> Result<Option<[u8; 32]>, StoreError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StoreError::file(format!("read {}: {e}", path.display())));
        }
    };
    Ok(Some(digest(&bytes)))
}

pub fn digest(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}
