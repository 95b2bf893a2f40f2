//! Auxiliary documents (manifest, memory, checks, skills, release) kept
//! next to the core data files: same locking, same atomic writes.

use cleo_core::CleoError;
use cleo_store::lock::{self, LockOptions};
use cleo_store::{atomic, Store};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;

pub(crate) fn side_path(store: &Store, name: &str) -> PathBuf {
    store.paths().data_dir().join(name)
}

/// Read-modify-write one auxiliary document under its own lock.
pub(crate) fn update<T, R>(
    store: &Store,
    name: &str,
    f: impl FnOnce(&mut T) -> Result<R, CleoError>,
) -> Result<R, CleoError>
where
    T: Default + Serialize + DeserializeOwned,
{
    let path = side_path(store, name);
    let _guard = lock::acquire(&path, &LockOptions::default()).map_err(CleoError::from)?;

    let mut doc: T = atomic::read_json(&path).map_err(CleoError::from)?.unwrap_or_default();
    let result = f(&mut doc)?;
    atomic::write_json(&path, &doc).map_err(CleoError::from)?;
    Ok(result)
}

/// Read one auxiliary document without holding its lock open.
pub(crate) fn read<T>(store: &Store, name: &str) -> Result<T, CleoError>
where
    T: Default + DeserializeOwned,
{
    let path = side_path(store, name);
    Ok(atomic::read_json(&path).map_err(CleoError::from)?.unwrap_or_default())
}
