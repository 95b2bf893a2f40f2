//! Engine migration between JSON files and SQLite.
//!
//! The SQLite side follows a strict atomic pattern: the new database is
//! written to `<db>.new`, validated, the existing `<db>` is copied to
//! `<db>.backup`, then `<db>.new` is renamed over `<db>` and the backup is
//! removed. On any failure the temp file is removed and the original is
//! untouched; neither ephemeral file survives a successful run.

use serde::Serialize;
use std::path::{Path, PathBuf};

use cleo_config::paths::ProjectPaths;

use crate::atomic;
use crate::documents::{ArchiveDocument, AuditDocument, SessionsDocument, TasksDocument};
use crate::error::StoreError;
use crate::sqlite;

/// Row counts moved by a migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub tasks: usize,
    pub archived_tasks: usize,
    pub sessions: usize,
    pub audit_entries: usize,
}

fn new_path(db: &Path) -> PathBuf {
    let mut name = db.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    name.push_str(".new");
    db.with_file_name(name)
}

fn backup_path(db: &Path) -> PathBuf {
    let mut name = db.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    name.push_str(".backup");
    db.with_file_name(name)
}

/// Parse every source JSON file up front. A corrupt file aborts the
/// migration before anything is written; missing files are empty documents.
fn load_json_sources(
    paths: &ProjectPaths,
) -> Result<(TasksDocument, ArchiveDocument, SessionsDocument, AuditDocument), StoreError> {
    let tasks: TasksDocument = atomic::read_json(&paths.todo())?.unwrap_or_default();
    let archive: ArchiveDocument = atomic::read_json(&paths.archive())?.unwrap_or_default();
    let sessions: SessionsDocument = atomic::read_json(&paths.sessions())?.unwrap_or_default();
    let audit: AuditDocument = atomic::read_json(&paths.audit_log())?.unwrap_or_default();
    Ok((tasks, archive, sessions, audit))
}

/// Migrate the JSON files into the SQLite database.
pub fn json_to_sqlite(paths: &ProjectPaths) -> Result<MigrationReport, StoreError> {
    let db = paths.db();
    let (tasks, archive, sessions, audit) = load_json_sources(paths)?;

    // Data-loss guard: refuse to replace a populated database with nothing.
    if db.exists() {
        let conn = sqlite::open(&db)?;
        sqlite::ensure_schema(&conn)?;
        let existing = sqlite::table_count(&conn, "tasks")?;
        if existing > 0 && tasks.tasks.is_empty() {
            return Err(StoreError::validation(format!(
                "Refusing migration that would cause data loss: database holds {existing} \
                 task(s) but the source JSON has none"
            )));
        }
    }

    let tmp = new_path(&db);
    let result = build_and_swap(&db, &tmp, &tasks, &archive, &sessions, &audit);
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result?;

    Ok(MigrationReport {
        tasks: tasks.tasks.len(),
        archived_tasks: archive.archived_tasks.len(),
        sessions: sessions.sessions.len(),
        audit_entries: audit.entries.len(),
    })
}

fn build_and_swap(
    db: &Path,
    tmp: &Path,
    tasks: &TasksDocument,
    archive: &ArchiveDocument,
    sessions: &SessionsDocument,
    audit: &AuditDocument,
) -> Result<(), StoreError> {
    if let Some(parent) = tmp.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| StoreError::file(format!("create {}: {e}", parent.display())))?;
    }
    let _ = std::fs::remove_file(tmp);

    // 1. Build the new database at the temp path.
    {
        let mut conn = sqlite::open(tmp)?;
        sqlite::ensure_schema(&conn)?;
        sqlite::save_tasks(&mut conn, tasks)?;
        sqlite::save_archive(&mut conn, archive)?;
        sqlite::save_sessions(&mut conn, sessions)?;
        for entry in &audit.entries {
            sqlite::append_audit(&conn, entry)?;
        }
    }

    // 2. Validate: schema row present, counts reconcile with the source.
    {
        let conn = sqlite::open(tmp)?;
        if !sqlite::has_schema_meta(&conn)? {
            return Err(StoreError::file("new database is missing its schema metadata"));
        }
        let checks = [
            ("tasks", tasks.tasks.len()),
            ("archive", archive.archived_tasks.len()),
            ("sessions", sessions.sessions.len()),
            ("audit", audit.entries.len()),
        ];
        for (table, expected) in checks {
            let actual = sqlite::table_count(&conn, table)?;
            if actual != expected {
                return Err(StoreError::ChecksumMismatch {
                    message: format!(
                        "{table} count mismatch after migration: wrote {actual}, source has {expected}"
                    ),
                });
            }
        }
    }

    // 3. Keep the current database recoverable while we swap.
    let backup = backup_path(db);
    if db.exists() {
        std::fs::copy(db, &backup)
            .map_err(|e| StoreError::file(format!("backup database: {e}")))?;
    }

    // 4. Atomic swap, then drop the backup only once the swap succeeded.
    std::fs::rename(tmp, db)
        .map_err(|e| StoreError::file(format!("activate new database: {e}")))?;
    let _ = std::fs::remove_file(&backup);

    tracing::info!(db = %db.display(), "migration to sqlite complete");
    Ok(())
}

/// Migrate the SQLite database back into the JSON files.
pub fn sqlite_to_json(paths: &ProjectPaths) -> Result<MigrationReport, StoreError> {
    let db = paths.db();
    if !db.exists() {
        return Err(StoreError::validation(format!(
            "No database to migrate at {}",
            db.display()
        )));
    }

    let conn = sqlite::open(&db)?;
    sqlite::ensure_schema(&conn)?;
    let tasks = sqlite::load_tasks(&conn)?;
    let archive = sqlite::load_archive(&conn)?;
    let sessions = sqlite::load_sessions(&conn)?;
    let audit = sqlite::load_audit(&conn)?;

    atomic::write_json(&paths.todo(), &tasks)?;
    atomic::write_json(&paths.archive(), &archive)?;
    atomic::write_json(&paths.sessions(), &sessions)?;
    atomic::write_json(&paths.audit_log(), &audit)?;

    Ok(MigrationReport {
        tasks: tasks.tasks.len(),
        archived_tasks: archive.archived_tasks.len(),
        sessions: sessions.sessions.len(),
        audit_entries: audit.entries.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cleo_core::task::{ArchiveInfo, ArchivedTask, Task};
    use tempfile::tempdir;

    fn project(dir: &std::path::Path) -> ProjectPaths {
        ProjectPaths::with_data_dir(dir.to_path_buf(), dir.join(".cleo"))
    }

    fn seed_json(paths: &ProjectPaths, task_count: usize) {
        let mut tasks = TasksDocument::default();
        for i in 1..=task_count {
            tasks.tasks.push(Task::new(
                format!("T{i}"),
                format!("Task number {i}"),
                format!("Longer description for task number {i}"),
            ));
        }
        atomic::write_json(&paths.todo(), &tasks).unwrap();

        let mut archive = ArchiveDocument::default();
        archive.archived_tasks.push(ArchivedTask {
            task: Task::new("T100", "Archived valid title", "Archived valid description"),
            archive: ArchiveInfo {
                archived_at: chrono::Utc::now(),
                reason: Some("done".into()),
            },
        });
        atomic::write_json(&paths.archive(), &archive).unwrap();
        atomic::write_json(&paths.sessions(), &SessionsDocument::default()).unwrap();
        atomic::write_json(&paths.audit_log(), &AuditDocument::default()).unwrap();
    }

    #[test]
    fn test_fresh_migration_counts() {
        let dir = tempdir().unwrap();
        let paths = project(dir.path());
        seed_json(&paths, 3);

        let report = json_to_sqlite(&paths).unwrap();
        assert_eq!(report.tasks, 3);
        assert_eq!(report.archived_tasks, 1);
        assert!(paths.db().exists());
    }

    #[test]
    fn test_no_ephemeral_files_after_success() {
        let dir = tempdir().unwrap();
        let paths = project(dir.path());
        seed_json(&paths, 2);

        json_to_sqlite(&paths).unwrap();
        assert!(!new_path(&paths.db()).exists());
        assert!(!backup_path(&paths.db()).exists());
    }

    #[test]
    fn test_data_loss_guard() {
        let dir = tempdir().unwrap();
        let paths = project(dir.path());

        // Populate the database first.
        seed_json(&paths, 2);
        json_to_sqlite(&paths).unwrap();

        // Now empty the source and try again.
        atomic::write_json(&paths.todo(), &TasksDocument::default()).unwrap();
        let err = json_to_sqlite(&paths).unwrap_err();
        match err {
            StoreError::Validation { message } => {
                assert!(message.contains("data loss"), "{message}");
            }
            other => panic!("expected Validation, got {other:?}"),
        }

        // The database is unchanged.
        let conn = sqlite::open(&paths.db()).unwrap();
        assert_eq!(sqlite::table_count(&conn, "tasks").unwrap(), 2);
    }

    #[test]
    fn test_corrupt_source_aborts_before_writing() {
        let dir = tempdir().unwrap();
        let paths = project(dir.path());
        atomic::atomic_write(&paths.todo(), b"{broken json").unwrap();

        let err = json_to_sqlite(&paths).unwrap_err();
        assert!(matches!(err, StoreError::FileError { .. }));
        assert!(!paths.db().exists());
        assert!(!new_path(&paths.db()).exists());
    }

    #[test]
    fn test_archive_legacy_key_accepted_as_source() {
        let dir = tempdir().unwrap();
        let paths = project(dir.path());
        seed_json(&paths, 1);

        // Rewrite the archive with the legacy root key.
        let legacy = serde_json::json!({
            "_meta": {"schemaVersion": "1.0"},
            "tasks": []
        });
        atomic::write_json(&paths.archive(), &legacy).unwrap();

        let report = json_to_sqlite(&paths).unwrap();
        assert_eq!(report.archived_tasks, 0);
    }

    #[test]
    fn test_roundtrip_preserves_task_and_archive_sets() {
        let dir = tempdir().unwrap();
        let paths = project(dir.path());
        seed_json(&paths, 4);

        let before: TasksDocument = atomic::read_json(&paths.todo()).unwrap().unwrap();
        let before_archive: ArchiveDocument =
            atomic::read_json(&paths.archive()).unwrap().unwrap();

        json_to_sqlite(&paths).unwrap();
        // Clobber the JSON files to prove the data comes back from the db.
        atomic::write_json(&paths.todo(), &TasksDocument::default()).unwrap();
        sqlite_to_json(&paths).unwrap();

        let after: TasksDocument = atomic::read_json(&paths.todo()).unwrap().unwrap();
        let after_archive: ArchiveDocument =
            atomic::read_json(&paths.archive()).unwrap().unwrap();

        let ids = |doc: &TasksDocument| {
            let mut v: Vec<String> = doc.tasks.iter().map(|t| t.id.clone()).collect();
            v.sort();
            v
        };
        assert_eq!(ids(&after), ids(&before));
        assert_eq!(after.tasks, before.tasks);
        assert_eq!(after_archive.archived_tasks, before_archive.archived_tasks);
    }

    #[test]
    fn test_sqlite_to_json_without_db_fails() {
        let dir = tempdir().unwrap();
        let paths = project(dir.path());
        assert!(sqlite_to_json(&paths).is_err());
    }
}
