//! On-disk document shapes. Every persisted file is versioned through a
//! `_meta.schemaVersion` field.

use chrono::{DateTime, Utc};
use cleo_core::audit::AuditEntry;
use cleo_core::session::Session;
use cleo_core::task::{ArchivedTask, Task};
use serde::{Deserialize, Serialize};

/// Current schema version written by this build.
pub const SCHEMA_VERSION: &str = "2.0";

fn schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMeta {
    #[serde(default = "schema_version")]
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_archived: Option<DateTime<Utc>>,
}

impl Default for DocumentMeta {
    fn default() -> Self {
        Self {
            schema_version: schema_version(),
            last_archived: None,
        }
    }
}

/// `todo.json`: the live task set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TasksDocument {
    #[serde(rename = "_meta", default)]
    pub meta: DocumentMeta,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl TasksDocument {
    pub fn find(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }
}

/// `todo-archive.json`. Historically written with either `archivedTasks`
/// or `tasks` as the root key; reads accept both, writes always emit
/// `archivedTasks`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveDocument {
    #[serde(rename = "_meta", default)]
    pub meta: DocumentMeta,
    #[serde(rename = "archivedTasks", alias = "tasks", default)]
    pub archived_tasks: Vec<ArchivedTask>,
}

impl ArchiveDocument {
    pub fn find(&self, id: &str) -> Option<&ArchivedTask> {
        self.archived_tasks.iter().find(|a| a.task.id == id)
    }
}

/// `sessions.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionsDocument {
    #[serde(rename = "_meta", default)]
    pub meta: DocumentMeta,
    #[serde(default)]
    pub sessions: Vec<Session>,
}

impl SessionsDocument {
    pub fn active(&self) -> Option<&Session> {
        self.sessions
            .iter()
            .find(|s| s.status == cleo_core::session::SessionStatus::Active)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }
}

/// `todo-log.jsonl`: despite the extension, one JSON object holding the
/// append-only entry list. The shape is preserved until a migration is
/// designed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditDocument {
    #[serde(default)]
    pub entries: Vec<AuditEntry>,
}
