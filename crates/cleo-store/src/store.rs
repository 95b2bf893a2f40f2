//! The process-wide store: single writer for every data file.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use cleo_config::config::StorageEngine;
use cleo_config::paths::ProjectPaths;
use cleo_core::audit::AuditEntry;
use cleo_core::task::task_number;

use crate::atomic;
use crate::backup;
use crate::documents::{ArchiveDocument, AuditDocument, SessionsDocument, TasksDocument};
use crate::error::StoreError;
use crate::lock::{self, LockGuard, LockOptions};
use crate::sqlite;

/// The files the store owns. Locks are per-file; two mutators touching
/// different files may proceed in parallel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataFile {
    Todo,
    Archive,
    Sessions,
    AuditLog,
}

pub struct Store {
    paths: ProjectPaths,
    engine: StorageEngine,
    lock_opts: LockOptions,
    /// Content digests recorded at load time, used to detect the file
    /// changing underneath us between a load and the following save.
    digests: Mutex<HashMap<PathBuf, [u8; 32]>>,
}

impl Store {
    pub fn open(paths: ProjectPaths, engine: StorageEngine) -> Self {
        Self {
            paths,
            engine,
            lock_opts: LockOptions::default(),
            digests: Mutex::new(HashMap::new()),
        }
    }

    /// Store with custom lock options (for tests exercising contention).
    pub fn open_with_lock_options(
        paths: ProjectPaths,
        engine: StorageEngine,
        lock_opts: LockOptions,
    ) -> Self {
        Self {
            paths,
            engine,
            lock_opts,
            digests: Mutex::new(HashMap::new()),
        }
    }

    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    pub fn engine(&self) -> StorageEngine {
        self.engine
    }

    /// Create the data directory and empty documents where missing.
    pub fn init(&self) -> Result<(), StoreError> {
        std::fs::create_dir_all(self.paths.data_dir()).map_err(|e| {
            StoreError::file(format!("create {}: {e}", self.paths.data_dir().display()))
        })?;

        match self.engine {
            StorageEngine::Json => {
                if !self.paths.todo().exists() {
                    atomic::write_json(&self.paths.todo(), &TasksDocument::default())?;
                }
                if !self.paths.archive().exists() {
                    atomic::write_json(&self.paths.archive(), &ArchiveDocument::default())?;
                }
                if !self.paths.sessions().exists() {
                    atomic::write_json(&self.paths.sessions(), &SessionsDocument::default())?;
                }
                if !self.paths.audit_log().exists() {
                    atomic::write_json(&self.paths.audit_log(), &AuditDocument::default())?;
                }
            }
            StorageEngine::Sqlite => {
                let conn = sqlite::open(&self.paths.db())?;
                sqlite::ensure_schema(&conn)?;
            }
        }
        Ok(())
    }

    /// Whether this project has been initialized.
    pub fn is_initialized(&self) -> bool {
        match self.engine {
            StorageEngine::Json => self.paths.todo().exists(),
            StorageEngine::Sqlite => self.paths.db().exists(),
        }
    }

    fn path_for(&self, file: DataFile) -> PathBuf {
        match file {
            DataFile::Todo => self.paths.todo(),
            DataFile::Archive => self.paths.archive(),
            DataFile::Sessions => self.paths.sessions(),
            DataFile::AuditLog => self.paths.audit_log(),
        }
    }

    /// Acquire the exclusive lock for `file`, run `f`, release on every
    /// exit path. Readers take the same lock as writers to observe a
    /// consistent snapshot.
    pub fn with_lock<T>(
        &self,
        file: DataFile,
        f: impl FnOnce() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _guard: LockGuard = lock::acquire(&self.path_for(file), &self.lock_opts)?;
        f()
    }

    // -- Tasks --------------------------------------------------------------

    pub fn load_tasks(&self) -> Result<TasksDocument, StoreError> {
        match self.engine {
            StorageEngine::Json => {
                let path = self.paths.todo();
                let doc = atomic::read_json(&path)?.unwrap_or_default();
                self.remember_digest(&path)?;
                Ok(doc)
            }
            StorageEngine::Sqlite => {
                let conn = sqlite::open(&self.paths.db())?;
                sqlite::ensure_schema(&conn)?;
                sqlite::load_tasks(&conn)
            }
        }
    }

    pub fn save_tasks(&self, doc: &TasksDocument) -> Result<(), StoreError> {
        match self.engine {
            StorageEngine::Json => {
                let path = self.paths.todo();
                self.check_unchanged(&path)?;
                atomic::write_json(&path, doc)?;
                self.remember_digest(&path)
            }
            StorageEngine::Sqlite => {
                let mut conn = sqlite::open(&self.paths.db())?;
                sqlite::ensure_schema(&conn)?;
                sqlite::save_tasks(&mut conn, doc)
            }
        }
    }

    // -- Archive ------------------------------------------------------------

    pub fn load_archive(&self) -> Result<ArchiveDocument, StoreError> {
        match self.engine {
            StorageEngine::Json => {
                let path = self.paths.archive();
                let doc = atomic::read_json(&path)?.unwrap_or_default();
                self.remember_digest(&path)?;
                Ok(doc)
            }
            StorageEngine::Sqlite => {
                let conn = sqlite::open(&self.paths.db())?;
                sqlite::ensure_schema(&conn)?;
                sqlite::load_archive(&conn)
            }
        }
    }

    pub fn save_archive(&self, doc: &ArchiveDocument) -> Result<(), StoreError> {
        match self.engine {
            StorageEngine::Json => {
                let path = self.paths.archive();
                self.check_unchanged(&path)?;
                atomic::write_json(&path, doc)?;
                self.remember_digest(&path)
            }
            StorageEngine::Sqlite => {
                let mut conn = sqlite::open(&self.paths.db())?;
                sqlite::ensure_schema(&conn)?;
                sqlite::save_archive(&mut conn, doc)
            }
        }
    }

    // -- Sessions -----------------------------------------------------------

    pub fn load_sessions(&self) -> Result<SessionsDocument, StoreError> {
        match self.engine {
            StorageEngine::Json => {
                let path = self.paths.sessions();
                let doc = atomic::read_json(&path)?.unwrap_or_default();
                self.remember_digest(&path)?;
                Ok(doc)
            }
            StorageEngine::Sqlite => {
                let conn = sqlite::open(&self.paths.db())?;
                sqlite::ensure_schema(&conn)?;
                sqlite::load_sessions(&conn)
            }
        }
    }

    pub fn save_sessions(&self, doc: &SessionsDocument) -> Result<(), StoreError> {
        match self.engine {
            StorageEngine::Json => {
                let path = self.paths.sessions();
                self.check_unchanged(&path)?;
                atomic::write_json(&path, doc)?;
                self.remember_digest(&path)
            }
            StorageEngine::Sqlite => {
                let mut conn = sqlite::open(&self.paths.db())?;
                sqlite::ensure_schema(&conn)?;
                sqlite::save_sessions(&mut conn, doc)
            }
        }
    }

    // -- Audit --------------------------------------------------------------

    /// Append one audit entry under the audit log's own lock.
    pub fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        match self.engine {
            StorageEngine::Json => self.with_lock(DataFile::AuditLog, || {
                let path = self.paths.audit_log();
                let mut doc: AuditDocument = atomic::read_json(&path)?.unwrap_or_default();
                doc.entries.push(entry.clone());
                atomic::write_json(&path, &doc)
            }),
            StorageEngine::Sqlite => self.with_lock(DataFile::AuditLog, || {
                let conn = sqlite::open(&self.paths.db())?;
                sqlite::ensure_schema(&conn)?;
                sqlite::append_audit(&conn, entry)
            }),
        }
    }

    pub fn load_audit(&self) -> Result<AuditDocument, StoreError> {
        match self.engine {
            StorageEngine::Json => {
                Ok(atomic::read_json(&self.paths.audit_log())?.unwrap_or_default())
            }
            StorageEngine::Sqlite => {
                let conn = sqlite::open(&self.paths.db())?;
                sqlite::ensure_schema(&conn)?;
                sqlite::load_audit(&conn)
            }
        }
    }

    // -- Ids ----------------------------------------------------------------

    /// Next monotonic task id, counting both the live set and the archive.
    pub fn next_task_id(
        &self,
        tasks: &TasksDocument,
        archive: &ArchiveDocument,
    ) -> String {
        let live = tasks.tasks.iter().filter_map(|t| task_number(&t.id));
        let archived = archive
            .archived_tasks
            .iter()
            .filter_map(|a| task_number(&a.task.id));
        let max = live.chain(archived).max().unwrap_or(0);
        format!("T{}", max + 1)
    }

    // -- Backups ------------------------------------------------------------

    /// Timestamped copy of the live data files, taken before risky
    /// mutations.
    pub fn backup(&self, reason: &str) -> Result<PathBuf, StoreError> {
        backup::backup_all(&self.paths, reason)
    }

    pub fn prune_backups(&self, retention_days: u32) -> Result<usize, StoreError> {
        backup::prune(&self.paths, retention_days)
    }

    // -- Internal -----------------------------------------------------------

    fn remember_digest(&self, path: &PathBuf) -> Result<(), StoreError> {
        let mut digests = self.digests.lock().expect("digest map poisoned");
        match atomic::file_digest(path)? {
            Some(digest) => {
                digests.insert(path.clone(), digest);
            }
            None => {
                digests.remove(path);
            }
        }
        Ok(())
    }

    fn check_unchanged(&self, path: &PathBuf) -> Result<(), StoreError> {
        let digests = self.digests.lock().expect("digest map poisoned");
        let Some(expected) = digests.get(path) else {
            return Ok(());
        };
        match atomic::file_digest(path)? {
            Some(actual) if actual != *expected => Err(StoreError::ConcurrentModification {
                path: path.clone(),
            }),
            _ => Ok(()),
        }
    }
}
