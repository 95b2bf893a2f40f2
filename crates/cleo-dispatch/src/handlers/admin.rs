//! The `admin` domain: project initialization, configuration, backups,
//! migration, and maintenance.

use chrono::Utc;
use cleo_config::config::{Config, StorageEngine};
use cleo_core::task::TaskStatus;
use cleo_core::{CleoError, ErrorCode};
use cleo_store::{atomic, migrate, DataFile};
use serde_json::{json, Value};

use super::{dry_run, opt_str, req_str, unknown_operation, HandlerCx, HandlerOutcome};

pub fn handle(
    cx: &HandlerCx<'_>,
    operation: &str,
    params: &Value,
) -> Result<HandlerOutcome, CleoError> {
    match operation {
        "init" => init(cx, params),
        "config.set" => config_set(cx, params),
        "backup" => backup(cx, params),
        "restore" => restore(cx, params),
        "migrate" => migrate_engine(cx, params),
        "sync" => sync(cx, params),
        "cleanup" => cleanup(cx, params),
        "job.cancel" => job_cancel(cx, params),
        "safestop" => safestop(cx, params),
        "inject.generate" => inject_generate(cx, params),
        other => Err(unknown_operation("admin", other)),
    }
}

fn init(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let name = opt_str(params, "name").map(String::from);

    if cx.store.is_initialized() {
        return Ok(HandlerOutcome::already_done(json!({
            "initialized": true,
            "dataDir": cx.store.paths().data_dir(),
        })));
    }

    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true})));
    }

    cx.store.init().map_err(CleoError::from)?;
    cx.config
        .save(&cx.store.paths().config_file())
        .map_err(|e| CleoError::new(ErrorCode::FileError, format!("write config: {e}")))?;

    tracing::info!(dir = %cx.store.paths().data_dir().display(), "project initialized");
    Ok(HandlerOutcome::new(json!({
        "initialized": true,
        "name": name,
        "dataDir": cx.store.paths().data_dir(),
    })))
}

fn config_set(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let key = req_str(params, "key")?;
    let value = req_str(params, "value")?;

    // Validate against the live file, not the in-memory copy, so
    // concurrent set calls merge instead of clobbering.
    let path = cx.store.paths().config_file();
    let mut config = Config::load(&path)
        .map_err(|e| CleoError::new(ErrorCode::FileError, format!("read config: {e}")))?;
    config.set(key, value)?;

    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true, "key": key, "value": value})));
    }

    config
        .save(&path)
        .map_err(|e| CleoError::new(ErrorCode::FileError, format!("write config: {e}")))?;
    Ok(HandlerOutcome::new(json!({"key": key, "value": value})))
}

fn backup(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let reason = opt_str(params, "reason").unwrap_or("manual");
    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true})));
    }
    let dir = cx.store.backup(reason).map_err(CleoError::from)?;
    Ok(HandlerOutcome::new(json!({"backupDir": dir})))
}

/// Copy the files of a named backup over the live data files. The current
/// state is backed up first, so a bad restore is itself restorable.
fn restore(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let name = req_str(params, "backup")?;
    let source = cx.store.paths().backups_dir().join(name);
    if !source.is_dir() {
        return Err(CleoError::not_found(format!("Backup '{name}'")));
    }

    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true, "wouldRestore": name})));
    }

    cx.store
        .with_lock(DataFile::Todo, || {
            cx.store.backup(&format!("before restore of {name}"))?;

            let mut restored = Vec::new();
            for target in cx.store.paths().data_files() {
                let Some(file_name) = target.file_name() else {
                    continue;
                };
                let candidate = source.join(file_name);
                if !candidate.exists() {
                    continue;
                }
                let bytes = std::fs::read(&candidate).map_err(|e| {
                    cleo_store::StoreError::file(format!("read {}: {e}", candidate.display()))
                })?;
                atomic::atomic_write(&target, &bytes)?;
                restored.push(file_name.to_string_lossy().into_owned());
            }
            Ok(HandlerOutcome::new(json!({"restored": restored, "from": name})))
        })
        .map_err(CleoError::from)
}

fn migrate_engine(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let to = req_str(params, "to")?;
    let target = match to {
        "sqlite" => StorageEngine::Sqlite,
        "json" => StorageEngine::Json,
        _ => {
            return Err(CleoError::new(
                ErrorCode::ValidationError,
                format!("Invalid migration target: '{to}'. Valid: json, sqlite"),
            ));
        }
    };

    if cx.store.engine() == target {
        return Err(CleoError::validation(format!(
            "Storage engine is already {target}"
        )));
    }

    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true, "wouldMigrateTo": to})));
    }

    cx.store
        .backup(&format!("before migration to {to}"))
        .map_err(CleoError::from)?;

    let report = match target {
        StorageEngine::Sqlite => migrate::json_to_sqlite(cx.store.paths()),
        StorageEngine::Json => migrate::sqlite_to_json(cx.store.paths()),
    }
    .map_err(CleoError::from)?;

    // Persist the engine switch; it takes effect when the store is next
    // opened.
    let path = cx.store.paths().config_file();
    let mut config = Config::load(&path)
        .map_err(|e| CleoError::new(ErrorCode::FileError, format!("read config: {e}")))?;
    config.set("storage.engine", to)?;
    config
        .save(&path)
        .map_err(|e| CleoError::new(ErrorCode::FileError, format!("write config: {e}")))?;

    Ok(HandlerOutcome::new(json!({
        "migratedTo": to,
        "report": report,
    })))
}

/// Recompute derived task statuses from the dependency graph: pending
/// tasks with unmet dependencies become blocked, blocked tasks whose
/// dependencies completed become pending.
fn sync(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    cx.store
        .with_lock(DataFile::Todo, || {
            let mut doc = cx.store.load_tasks()?;

            let done: Vec<String> = doc
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Done)
                .map(|t| t.id.clone())
                .collect();
            let known: Vec<String> = doc.tasks.iter().map(|t| t.id.clone()).collect();

            let mut changed = Vec::new();
            for task in &mut doc.tasks {
                let unmet = task
                    .depends
                    .iter()
                    .any(|d| known.contains(d) && !done.contains(d));
                let next = match (task.status, unmet) {
                    (TaskStatus::Pending, true) => Some(TaskStatus::Blocked),
                    (TaskStatus::Blocked, false) => Some(TaskStatus::Pending),
                    _ => None,
                };
                if let Some(next) = next {
                    task.status = next;
                    task.updated = Utc::now();
                    changed.push(task.id.clone());
                }
            }

            if dry_run(params) {
                return Ok(HandlerOutcome::new(json!({"dryRun": true, "wouldChange": changed})));
            }
            if !changed.is_empty() {
                cx.store.save_tasks(&doc)?;
            }
            Ok(HandlerOutcome::new(json!({"changed": changed})))
        })
        .map_err(CleoError::from)
}

fn cleanup(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true})));
    }

    let pruned = cx
        .store
        .prune_backups(cx.config.archive.retention_days)
        .map_err(CleoError::from)?;
    let jobs_removed = cx.jobs.cleanup(chrono::Duration::days(1));

    Ok(HandlerOutcome::new(json!({
        "backupsPruned": pruned,
        "jobsRemoved": jobs_removed,
    })))
}

fn job_cancel(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let job_id = req_str(params, "jobId")?;
    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true})));
    }
    // Cancelling a finished or unknown job reports false rather than
    // erroring; the caller's intent (job not running) already holds.
    let cancelled = cx.jobs.cancel(job_id);
    Ok(HandlerOutcome::new(json!({"jobId": job_id, "cancelled": cancelled})))
}

/// Park the project safely: suspend the active session so another agent
/// can pick the work up cleanly.
fn safestop(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    cx.store
        .with_lock(DataFile::Sessions, || {
            let mut doc = cx.store.load_sessions()?;
            let Some(active_id) = doc.active().map(|s| s.id.clone()) else {
                return Ok(HandlerOutcome::new(json!({"suspended": false})));
            };

            if dry_run(params) {
                return Ok(HandlerOutcome::new(json!({"dryRun": true, "wouldSuspend": active_id})));
            }

            let Some(session) = doc.find_mut(&active_id) else {
                return Err(cleo_store::StoreError::validation(
                    "active session disappeared mid-operation",
                ));
            };
            session.status = cleo_core::session::SessionStatus::Suspended;
            cx.store.save_sessions(&doc)?;
            Ok(
                HandlerOutcome::new(json!({"suspended": true, "sessionId": &active_id}))
                    .with_session(active_id),
            )
        })
        .map_err(CleoError::from)
}

/// Generate the agent-context digest and write it to `.cleo/inject.md`.
fn inject_generate(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let tasks = cx.store.load_tasks()?;
    let sessions = cx.store.load_sessions()?;

    let open: Vec<String> = tasks
        .tasks
        .iter()
        .filter(|t| t.status.is_open())
        .map(|t| format!("- {} [{}] {}", t.id, t.status, t.title))
        .collect();

    let mut content = String::from("# Project context\n\n## Open tasks\n\n");
    content.push_str(&open.join("\n"));
    content.push('\n');
    match sessions.active() {
        Some(session) => {
            content.push_str(&format!("\n## Session\n\nActive: {} ({})\n", session.id, session.scope));
        }
        None => content.push_str("\n## Session\n\nNone active.\n"),
    }

    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true, "content": content})));
    }

    let path = cx.store.paths().data_dir().join("inject.md");
    atomic::atomic_write(&path, content.as_bytes()).map_err(CleoError::from)?;
    Ok(HandlerOutcome::new(json!({"path": path, "content": content})))
}
