//! Durable storage for CLEO projects.
//!
//! The process-wide [`Store`] exclusively owns the on-disk files under the
//! project data directory for its lifetime:
//!
//! ```text
//! <root>/.cleo/
//! ├── todo.json            live tasks
//! ├── todo-archive.json    archived tasks
//! ├── sessions.json        sessions
//! ├── todo-log.jsonl       audit log (a single JSON object, see documents)
//! ├── config.toml          effective configuration
//! ├── backups/<ts>/        pre-mutation backups
//! └── tasks.db             SQLite engine (migration-managed)
//! ```
//!
//! All writes are temp-file + rename atomic; mutators and readers serialize
//! on a per-file directory lock.

pub mod atomic;
pub mod backup;
pub mod documents;
pub mod error;
pub mod lock;
pub mod migrate;
mod sqlite;
pub mod store;

pub use documents::{ArchiveDocument, AuditDocument, SessionsDocument, TasksDocument};
pub use error::StoreError;
pub use store::{DataFile, Store};
