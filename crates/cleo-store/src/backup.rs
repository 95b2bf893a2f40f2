//! Timestamped backups of the live data files.
//!
//! Backups are written before risky mutations (migration, restore,
//! cascading delete, archive) and on demand. The core never reads them
//! back except through an explicit restore.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use cleo_config::paths::ProjectPaths;

use crate::atomic;
use crate::error::StoreError;

/// Manifest written alongside the copied files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    pub created_at: chrono::DateTime<Utc>,
    pub reason: String,
    pub files: Vec<String>,
}

/// Copy every existing data file into `backups/<timestamp>/`. Returns the
/// backup directory.
pub fn backup_all(paths: &ProjectPaths, reason: &str) -> Result<PathBuf, StoreError> {
    let base = Utc::now().format("%Y-%m-%dT%H-%M-%S").to_string();

    // Collision suffix for multiple backups within the same second.
    let mut name = base.clone();
    let mut suffix = 1u32;
    while paths.backups_dir().join(&name).exists() {
        name = format!("{base}-{suffix}");
        suffix += 1;
    }

    let backup_dir = paths.backups_dir().join(&name);
    std::fs::create_dir_all(&backup_dir)
        .map_err(|e| StoreError::file(format!("create {}: {e}", backup_dir.display())))?;

    let mut copied = Vec::new();
    for file in paths.data_files() {
        if !file.exists() {
            continue;
        }
        let file_name = file
            .file_name()
            .ok_or_else(|| StoreError::file(format!("{} has no file name", file.display())))?;
        let target = backup_dir.join(file_name);
        std::fs::copy(&file, &target).map_err(|e| {
            StoreError::file(format!("copy {} -> {}: {e}", file.display(), target.display()))
        })?;
        copied.push(file_name.to_string_lossy().into_owned());
    }
    if paths.db().exists() {
        let target = backup_dir.join("tasks.db");
        std::fs::copy(paths.db(), &target)
            .map_err(|e| StoreError::file(format!("copy database: {e}")))?;
        copied.push("tasks.db".into());
    }

    let manifest = BackupManifest {
        created_at: Utc::now(),
        reason: reason.to_string(),
        files: copied,
    };
    atomic::write_json(&backup_dir.join("manifest.json"), &manifest)?;

    tracing::info!(dir = %backup_dir.display(), reason, "backup written");
    Ok(backup_dir)
}

/// Remove backups older than the retention window. Returns how many were
/// removed.
pub fn prune(paths: &ProjectPaths, retention_days: u32) -> Result<usize, StoreError> {
    let backups_dir = paths.backups_dir();
    if !backups_dir.exists() {
        return Ok(0);
    }

    let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
    let mut removed = 0usize;

    let entries = std::fs::read_dir(&backups_dir)
        .map_err(|e| StoreError::file(format!("read {}: {e}", backups_dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::file(format!("read backup entry: {e}")))?;
        if !entry.path().is_dir() {
            continue;
        }

        let manifest: Option<BackupManifest> =
            atomic::read_json(&entry.path().join("manifest.json")).unwrap_or(None);
        let created_at = match manifest {
            Some(m) => m.created_at,
            // Unreadable manifest: age by directory mtime instead.
            None => match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified.into(),
                Err(_) => continue,
            },
        };

        if created_at < cutoff {
            std::fs::remove_dir_all(entry.path())
                .map_err(|e| StoreError::file(format!("remove backup: {e}")))?;
            removed += 1;
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn project(dir: &std::path::Path) -> ProjectPaths {
        ProjectPaths::with_data_dir(dir.to_path_buf(), dir.join(".cleo"))
    }

    #[test]
    fn test_backup_copies_existing_files() {
        let dir = tempdir().unwrap();
        let paths = project(dir.path());
        atomic::atomic_write(&paths.todo(), b"{\"tasks\": []}").unwrap();
        atomic::atomic_write(&paths.sessions(), b"{\"sessions\": []}").unwrap();

        let backup_dir = backup_all(&paths, "before migrate").unwrap();

        assert!(backup_dir.join("todo.json").exists());
        assert!(backup_dir.join("sessions.json").exists());
        assert!(!backup_dir.join("todo-archive.json").exists());

        let manifest: BackupManifest =
            atomic::read_json(&backup_dir.join("manifest.json")).unwrap().unwrap();
        assert_eq!(manifest.reason, "before migrate");
        assert_eq!(manifest.files.len(), 2);
    }

    #[test]
    fn test_backups_in_same_second_get_suffixes() {
        let dir = tempdir().unwrap();
        let paths = project(dir.path());
        atomic::atomic_write(&paths.todo(), b"{}").unwrap();

        let first = backup_all(&paths, "a").unwrap();
        let second = backup_all(&paths, "b").unwrap();
        assert_ne!(first, second);
        assert!(first.exists());
        assert!(second.exists());
    }

    #[test]
    fn test_prune_removes_old_keeps_new() {
        let dir = tempdir().unwrap();
        let paths = project(dir.path());
        atomic::atomic_write(&paths.todo(), b"{}").unwrap();

        let old_dir = backup_all(&paths, "old").unwrap();
        // Age the old backup by rewriting its manifest.
        let manifest = BackupManifest {
            created_at: Utc::now() - chrono::Duration::days(90),
            reason: "old".into(),
            files: vec!["todo.json".into()],
        };
        atomic::write_json(&old_dir.join("manifest.json"), &manifest).unwrap();

        let new_dir = backup_all(&paths, "new").unwrap();

        let removed = prune(&paths, 30).unwrap();
        assert_eq!(removed, 1);
        assert!(!old_dir.exists());
        assert!(new_dir.exists());
    }

    #[test]
    fn test_prune_without_backups_dir() {
        let dir = tempdir().unwrap();
        let paths = project(dir.path());
        assert_eq!(prune(&paths, 30).unwrap(), 0);
    }
}
