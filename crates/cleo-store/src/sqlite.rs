//! SQLite backend: one row per entity, document metadata in `schema_meta`.

use rusqlite::Connection;
use std::path::Path;

use cleo_core::audit::AuditEntry;
use cleo_core::session::Session;
use cleo_core::task::{ArchivedTask, Task};

use crate::documents::{
    ArchiveDocument, AuditDocument, DocumentMeta, SessionsDocument, TasksDocument, SCHEMA_VERSION,
};
use crate::error::StoreError;

pub(crate) fn open(path: &Path) -> Result<Connection, StoreError> {
    Connection::open(path)
        .map_err(|e| StoreError::file(format!("open database {}: {e}", path.display())))
}

pub(crate) fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_meta (
             key   TEXT PRIMARY KEY,
             value TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS tasks (
             id   TEXT PRIMARY KEY,
             seq  INTEGER NOT NULL,
             data TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS archive (
             id   TEXT PRIMARY KEY,
             seq  INTEGER NOT NULL,
             data TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS sessions (
             id   TEXT PRIMARY KEY,
             seq  INTEGER NOT NULL,
             data TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS audit (
             seq  INTEGER PRIMARY KEY AUTOINCREMENT,
             data TEXT NOT NULL
         );",
    )
    .map_err(db_err)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schemaVersion', ?1)",
        [SCHEMA_VERSION],
    )
    .map_err(db_err)?;
    Ok(())
}

pub(crate) fn has_schema_meta(conn: &Connection) -> Result<bool, StoreError> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM schema_meta WHERE key = 'schemaVersion'",
            [],
            |row| row.get(0),
        )
        .map_err(db_err)?;
    Ok(count > 0)
}

pub(crate) fn table_count(conn: &Connection, table: &str) -> Result<usize, StoreError> {
    // Table names come from this module only, never from input.
    let count: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })
        .map_err(db_err)?;
    Ok(count as usize)
}

fn load_meta(conn: &Connection, key: &str) -> Result<DocumentMeta, StoreError> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_meta WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(db_err(other)),
        })?;

    match value {
        Some(text) => serde_json::from_str(&text)
            .map_err(|e| StoreError::file(format!("parse {key} metadata: {e}"))),
        None => Ok(DocumentMeta::default()),
    }
}

fn save_meta(conn: &Connection, key: &str, meta: &DocumentMeta) -> Result<(), StoreError> {
    let text = serde_json::to_string(meta)
        .map_err(|e| StoreError::file(format!("serialize {key} metadata: {e}")))?;
    conn.execute(
        "INSERT INTO schema_meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [key, &text],
    )
    .map_err(db_err)?;
    Ok(())
}

fn load_rows<T: serde::de::DeserializeOwned>(
    conn: &Connection,
    table: &str,
) -> Result<Vec<T>, StoreError> {
    let mut stmt = conn
        .prepare(&format!("SELECT data FROM {table} ORDER BY seq"))
        .map_err(db_err)?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(db_err)?;

    let mut out = Vec::new();
    for row in rows {
        let text = row.map_err(db_err)?;
        out.push(
            serde_json::from_str(&text)
                .map_err(|e| StoreError::file(format!("parse {table} row: {e}")))?,
        );
    }
    Ok(out)
}

fn replace_rows<T: serde::Serialize>(
    conn: &Connection,
    table: &str,
    rows: &[(String, &T)],
) -> Result<(), StoreError> {
    conn.execute(&format!("DELETE FROM {table}"), []).map_err(db_err)?;
    let mut stmt = conn
        .prepare(&format!(
            "INSERT INTO {table} (id, seq, data) VALUES (?1, ?2, ?3)"
        ))
        .map_err(db_err)?;
    for (seq, (id, value)) in rows.iter().enumerate() {
        let text = serde_json::to_string(value)
            .map_err(|e| StoreError::file(format!("serialize {table} row: {e}")))?;
        stmt.execute(rusqlite::params![id, seq as i64, text])
            .map_err(db_err)?;
    }
    Ok(())
}

pub(crate) fn load_tasks(conn: &Connection) -> Result<TasksDocument, StoreError> {
    Ok(TasksDocument {
        meta: load_meta(conn, "tasksMeta")?,
        tasks: load_rows::<Task>(conn, "tasks")?,
    })
}

pub(crate) fn save_tasks(conn: &mut Connection, doc: &TasksDocument) -> Result<(), StoreError> {
    let tx = conn.transaction().map_err(db_err)?;
    let rows: Vec<(String, &Task)> = doc.tasks.iter().map(|t| (t.id.clone(), t)).collect();
    replace_rows(&tx, "tasks", &rows)?;
    save_meta(&tx, "tasksMeta", &doc.meta)?;
    tx.commit().map_err(db_err)
}

pub(crate) fn load_archive(conn: &Connection) -> Result<ArchiveDocument, StoreError> {
    Ok(ArchiveDocument {
        meta: load_meta(conn, "archiveMeta")?,
        archived_tasks: load_rows::<ArchivedTask>(conn, "archive")?,
    })
}

pub(crate) fn save_archive(conn: &mut Connection, doc: &ArchiveDocument) -> Result<(), StoreError> {
    let tx = conn.transaction().map_err(db_err)?;
    let rows: Vec<(String, &ArchivedTask)> = doc
        .archived_tasks
        .iter()
        .map(|a| (a.task.id.clone(), a))
        .collect();
    replace_rows(&tx, "archive", &rows)?;
    save_meta(&tx, "archiveMeta", &doc.meta)?;
    tx.commit().map_err(db_err)
}

pub(crate) fn load_sessions(conn: &Connection) -> Result<SessionsDocument, StoreError> {
    Ok(SessionsDocument {
        meta: load_meta(conn, "sessionsMeta")?,
        sessions: load_rows::<Session>(conn, "sessions")?,
    })
}

pub(crate) fn save_sessions(
    conn: &mut Connection,
    doc: &SessionsDocument,
) -> Result<(), StoreError> {
    let tx = conn.transaction().map_err(db_err)?;
    let rows: Vec<(String, &Session)> = doc.sessions.iter().map(|s| (s.id.clone(), s)).collect();
    replace_rows(&tx, "sessions", &rows)?;
    save_meta(&tx, "sessionsMeta", &doc.meta)?;
    tx.commit().map_err(db_err)
}

pub(crate) fn load_audit(conn: &Connection) -> Result<AuditDocument, StoreError> {
    let mut stmt = conn
        .prepare("SELECT data FROM audit ORDER BY seq")
        .map_err(db_err)?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(db_err)?;

    let mut entries = Vec::new();
    for row in rows {
        let text = row.map_err(db_err)?;
        entries.push(
            serde_json::from_str::<AuditEntry>(&text)
                .map_err(|e| StoreError::file(format!("parse audit row: {e}")))?,
        );
    }
    Ok(AuditDocument { entries })
}

pub(crate) fn append_audit(conn: &Connection, entry: &AuditEntry) -> Result<(), StoreError> {
    let text = serde_json::to_string(entry)
        .map_err(|e| StoreError::file(format!("serialize audit entry: {e}")))?;
    conn.execute("INSERT INTO audit (data) VALUES (?1)", [&text])
        .map_err(db_err)?;
    Ok(())
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::file(format!("database: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cleo_core::task::Task;
    use tempfile::tempdir;

    fn temp_conn() -> (tempfile::TempDir, Connection) {
        let dir = tempdir().unwrap();
        let conn = open(&dir.path().join("tasks.db")).unwrap();
        ensure_schema(&conn).unwrap();
        (dir, conn)
    }

    #[test]
    fn test_schema_meta_row_present() {
        let (_dir, conn) = temp_conn();
        assert!(has_schema_meta(&conn).unwrap());
    }

    #[test]
    fn test_tasks_roundtrip_preserves_order() {
        let (_dir, mut conn) = temp_conn();

        let doc = TasksDocument {
            meta: DocumentMeta::default(),
            tasks: vec![
                Task::new("T2", "Second valid title", "Second valid description"),
                Task::new("T1", "First valid title", "First valid description"),
            ],
        };
        save_tasks(&mut conn, &doc).unwrap();

        let loaded = load_tasks(&conn).unwrap();
        assert_eq!(loaded, doc);
        // Insertion order survives, not id order.
        assert_eq!(loaded.tasks[0].id, "T2");
    }

    #[test]
    fn test_save_replaces_previous_rows() {
        let (_dir, mut conn) = temp_conn();

        let mut doc = TasksDocument::default();
        doc.tasks
            .push(Task::new("T1", "First valid title", "First valid description"));
        save_tasks(&mut conn, &doc).unwrap();

        doc.tasks.clear();
        doc.tasks
            .push(Task::new("T2", "Second valid title", "Second valid description"));
        save_tasks(&mut conn, &doc).unwrap();

        let loaded = load_tasks(&conn).unwrap();
        assert_eq!(loaded.tasks.len(), 1);
        assert_eq!(loaded.tasks[0].id, "T2");
    }

    #[test]
    fn test_audit_append_is_ordered() {
        use cleo_core::envelope::{Gateway, Source};
        let (_dir, conn) = temp_conn();

        for operation in ["add", "update"] {
            append_audit(
                &conn,
                &AuditEntry {
                    ts: chrono::Utc::now(),
                    action: "dispatch.finish".into(),
                    gateway: Gateway::Mutate,
                    domain: "tasks".into(),
                    operation: operation.into(),
                    source: Source::Cli,
                    request_id: "01ARZ3NDEKTSV4RRFFQ69G5FAV".into(),
                    task_id: None,
                    session_id: None,
                    exit_code: 0,
                    duration_ms: 1,
                    details: None,
                },
            )
            .unwrap();
        }

        let doc = load_audit(&conn).unwrap();
        assert_eq!(doc.entries.len(), 2);
        assert_eq!(doc.entries[0].operation, "add");
        assert_eq!(doc.entries[1].operation, "update");
    }

    #[test]
    fn test_table_counts() {
        let (_dir, mut conn) = temp_conn();
        assert_eq!(table_count(&conn, "tasks").unwrap(), 0);

        let mut doc = TasksDocument::default();
        doc.tasks
            .push(Task::new("T1", "First valid title", "First valid description"));
        save_tasks(&mut conn, &doc).unwrap();
        assert_eq!(table_count(&conn, "tasks").unwrap(), 1);
    }
}
