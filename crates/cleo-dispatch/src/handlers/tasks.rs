//! The `tasks` domain: the primary unit of work.

use chrono::Utc;
use cleo_core::graph::TaskGraph;
use cleo_core::task::{
    task_number, ArchiveInfo, ArchivedTask, Priority, Task, TaskStatus, TaskType,
};
use cleo_core::{CleoError, ErrorCode};
use cleo_store::DataFile;
use cleo_verify::{OperationContext, SnapshotView, VerificationGate};
use serde_json::{json, Value};

use super::{dry_run, opt_str, opt_str_list, req_str, unknown_operation, HandlerCx, HandlerOutcome};

pub fn handle(
    cx: &HandlerCx<'_>,
    operation: &str,
    params: &Value,
) -> Result<HandlerOutcome, CleoError> {
    match operation {
        // queries
        "show" => show(cx, params),
        "list" => list(cx, params),
        "find" => find(cx, params),
        "tree" => tree(cx, params),
        "blockers" => blockers(cx, params),
        "deps" => deps(cx, params),
        "stats" => stats(cx),
        "export" => export(cx),
        "history" => history(cx, params),
        "lint" => lint(cx),
        "batch-validate" => batch_validate(cx, params),
        "next" => next(cx),
        "exists" => exists(cx, params),
        // mutations
        "add" => add(cx, params),
        "update" => update(cx, params),
        "complete" => complete(cx, params),
        "delete" => delete(cx, params),
        "archive" => archive(cx, params),
        "restore" => restore(cx, params),
        "reparent" => reparent(cx, params),
        "promote" => promote(cx, params),
        "reorder" => reorder(cx, params),
        "reopen" => reopen(cx, params),
        "relates.add" => relates_add(cx, params),
        "start" => start(cx, params),
        "stop" => stop(cx, params),
        "workflow.pass" | "workflow.fail" => workflow(cx, operation, params),
        other => Err(unknown_operation("tasks", other)),
    }
}

// -- Queries ---------------------------------------------------------------

fn show(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let task_id = req_str(params, "taskId")?;
    let doc = cx.store.load_tasks()?;
    if let Some(task) = doc.find(task_id) {
        return Ok(HandlerOutcome::new(to_value(task)?).with_task(task_id));
    }
    let archive = cx.store.load_archive()?;
    match archive.find(task_id) {
        Some(entry) => Ok(HandlerOutcome::new(to_value(entry)?).with_task(task_id)),
        None => Err(CleoError::not_found(format!("Task {task_id}"))
            .with_fix("cleo tasks list".to_string())),
    }
}

fn list(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let doc = cx.store.load_tasks()?;
    let status = opt_str(params, "status");
    let label = opt_str(params, "label");
    let phase = opt_str(params, "phase");
    let compact = params.get("compact").and_then(Value::as_bool).unwrap_or(false);

    let selected: Vec<&Task> = doc
        .tasks
        .iter()
        .filter(|t| status.map(|s| t.status.as_str() == s).unwrap_or(true))
        .filter(|t| label.map(|l| t.labels.iter().any(|x| x == l)).unwrap_or(true))
        .filter(|t| phase.map(|p| t.phase.as_deref() == Some(p)).unwrap_or(true))
        .collect();

    let tasks: Vec<Value> = if compact {
        selected.iter().map(|t| compact_projection(t)).collect()
    } else {
        selected
            .iter()
            .map(|t| to_value(t))
            .collect::<Result<_, _>>()?
    };

    Ok(HandlerOutcome::new(json!({
        "tasks": tasks,
        "count": selected.len(),
        "compact": compact,
    })))
}

fn compact_projection(task: &Task) -> Value {
    json!({
        "id": &task.id,
        "title": &task.title,
        "status": task.status,
        "priority": task.priority,
    })
}

fn find(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let query = req_str(params, "query")?.to_ascii_lowercase();
    let doc = cx.store.load_tasks()?;
    let matches: Vec<Value> = doc
        .tasks
        .iter()
        .filter(|t| {
            t.title.to_ascii_lowercase().contains(&query)
                || t.description.to_ascii_lowercase().contains(&query)
        })
        .map(compact_projection)
        .collect();
    Ok(HandlerOutcome::new(json!({
        "matches": matches,
        "query": query,
    })))
}

fn tree(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let doc = cx.store.load_tasks()?;
    let graph = TaskGraph::build(&doc.tasks);

    fn node(id: &str, doc: &cleo_store::TasksDocument, graph: &TaskGraph) -> Value {
        let task = doc.find(id);
        let children: Vec<Value> = graph
            .children_of(id)
            .iter()
            .map(|c| node(c, doc, graph))
            .collect();
        json!({
            "id": id,
            "title": task.map(|t| t.title.clone()).unwrap_or_default(),
            "status": task.map(|t| t.status.as_str()).unwrap_or("unknown"),
            "children": children,
        })
    }

    let roots: Vec<Value> = match opt_str(params, "taskId") {
        Some(id) => {
            if doc.find(id).is_none() {
                return Err(CleoError::not_found(format!("Task {id}")));
            }
            vec![node(id, &doc, &graph)]
        }
        None => doc
            .tasks
            .iter()
            .filter(|t| t.parent_id.is_none())
            .map(|t| node(&t.id, &doc, &graph))
            .collect(),
    };

    Ok(HandlerOutcome::new(json!({"roots": roots})))
}

fn blockers(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let task_id = req_str(params, "taskId")?;
    let doc = cx.store.load_tasks()?;
    let task = doc
        .find(task_id)
        .ok_or_else(|| CleoError::not_found(format!("Task {task_id}")))?;

    let blockers: Vec<Value> = task
        .depends
        .iter()
        .filter_map(|dep| match doc.find(dep) {
            Some(dep_task) if dep_task.status != TaskStatus::Done => {
                Some(compact_projection(dep_task))
            }
            Some(_) => None,
            None => Some(json!({"id": dep, "missing": true})),
        })
        .collect();

    Ok(HandlerOutcome::new(json!({
        "taskId": task_id,
        "blocked": !blockers.is_empty(),
        "blockers": blockers,
    }))
    .with_task(task_id))
}

fn deps(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let task_id = req_str(params, "taskId")?;
    let doc = cx.store.load_tasks()?;
    let task = doc
        .find(task_id)
        .ok_or_else(|| CleoError::not_found(format!("Task {task_id}")))?;

    let dependents: Vec<&str> = doc
        .tasks
        .iter()
        .filter(|t| t.depends.iter().any(|d| d == task_id))
        .map(|t| t.id.as_str())
        .collect();

    Ok(HandlerOutcome::new(json!({
        "taskId": task_id,
        "depends": &task.depends,
        "dependents": dependents,
        "relates": &task.relates,
    }))
    .with_task(task_id))
}

fn stats(cx: &HandlerCx<'_>) -> Result<HandlerOutcome, CleoError> {
    let doc = cx.store.load_tasks()?;
    let archive = cx.store.load_archive()?;

    let mut by_status = serde_json::Map::new();
    let mut by_priority = serde_json::Map::new();
    for task in &doc.tasks {
        let status_count = count_of(&by_status, task.status.as_str());
        by_status.insert(task.status.as_str().to_string(), json!(status_count + 1));
        let priority_count = count_of(&by_priority, task.priority.as_str());
        by_priority.insert(task.priority.as_str().to_string(), json!(priority_count + 1));
    }

    let done = doc
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Done)
        .count();
    let total = doc.tasks.len();
    let completion_pct = if total == 0 {
        0
    } else {
        (done * 100 / total) as u64
    };

    Ok(HandlerOutcome::new(json!({
        "total": total,
        "archived": archive.archived_tasks.len(),
        "byStatus": by_status,
        "byPriority": by_priority,
        "completionPct": completion_pct,
    })))
}

fn count_of(map: &serde_json::Map<String, Value>, key: &str) -> u64 {
    map.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn export(cx: &HandlerCx<'_>) -> Result<HandlerOutcome, CleoError> {
    let doc = cx.store.load_tasks()?;
    Ok(HandlerOutcome::new(to_value(&doc)?))
}

fn history(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let audit = cx.store.load_audit()?;
    let task_id = opt_str(params, "taskId");
    let entries: Vec<Value> = audit
        .entries
        .iter()
        .filter(|e| task_id.map(|id| e.task_id.as_deref() == Some(id)).unwrap_or(true))
        .map(|e| to_value(e))
        .collect::<Result<_, _>>()?;
    Ok(HandlerOutcome::new(json!({"entries": entries})))
}

fn lint(cx: &HandlerCx<'_>) -> Result<HandlerOutcome, CleoError> {
    let doc = cx.store.load_tasks()?;
    let now = Utc::now();
    let max_depth = cx.config.hierarchy.max_depth as usize;
    let mut findings = Vec::new();

    for task in &doc.tasks {
        let title_len = task.title.trim().chars().count();
        if !(5..=100).contains(&title_len) {
            findings.push(json!({"taskId": &task.id, "rule": "title-length"}));
        }
        let desc_len = task.description.trim().chars().count();
        if !(10..=1000).contains(&desc_len) {
            findings.push(json!({"taskId": &task.id, "rule": "description-length"}));
        }
        if task.title.trim() == task.description.trim() {
            findings.push(json!({"taskId": &task.id, "rule": "title-equals-description"}));
        }
        if task.created > task.updated || task.updated > now {
            findings.push(json!({"taskId": &task.id, "rule": "timestamp-order"}));
        }
        if let Some(completed) = task.completed_at {
            if completed < task.created || completed > now {
                findings.push(json!({"taskId": &task.id, "rule": "completed-at-range"}));
            }
        }
        if let Some(parent) = &task.parent_id {
            if doc.find(parent).is_none() {
                findings.push(json!({"taskId": &task.id, "rule": "dangling-parent", "target": parent}));
            }
        }
        for dep in &task.depends {
            if doc.find(dep).is_none() {
                findings.push(json!({"taskId": &task.id, "rule": "dangling-dependency", "target": dep}));
            }
        }
    }

    let graph = TaskGraph::build(&doc.tasks);
    if let Some(cycle) = graph.cycle_nodes() {
        findings.push(json!({"rule": "dependency-cycle", "members": cycle}));
    }
    for task in &doc.tasks {
        if graph.depth_of(&task.id).map(|d| d > max_depth).unwrap_or(false) {
            findings.push(json!({"taskId": &task.id, "rule": "hierarchy-depth"}));
        }
    }

    Ok(HandlerOutcome::new(json!({
        "clean": findings.is_empty(),
        "findings": findings,
    })))
}

fn batch_validate(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let entries = params
        .get("tasks")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            CleoError::new(ErrorCode::ValidationError, "Parameter 'tasks' must be an array")
        })?;

    let doc = cx.store.load_tasks()?;
    let view = SnapshotView {
        tasks: &doc.tasks,
        max_depth: cx.config.hierarchy.max_depth,
        max_siblings: cx.config.hierarchy.max_siblings,
    };
    let gate = VerificationGate::new();

    let results: Vec<Value> = entries
        .iter()
        .map(|entry| {
            let ctx = OperationContext {
                domain: "tasks",
                operation: "add",
                gateway: cleo_core::envelope::Gateway::Mutate,
                params: entry,
                protocol_type: None,
            };
            let report = gate.run(&ctx, &view);
            json!({
                "valid": report.passed(),
                "blockedAt": report.blocked_at,
            })
        })
        .collect();

    let valid = results.iter().filter(|r| r["valid"] == true).count();
    Ok(HandlerOutcome::new(json!({
        "results": results,
        "valid": valid,
        "invalid": results.len() - valid,
    })))
}

fn next(cx: &HandlerCx<'_>) -> Result<HandlerOutcome, CleoError> {
    let doc = cx.store.load_tasks()?;

    let mut candidates: Vec<&Task> = doc
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending)
        .filter(|t| {
            t.depends.iter().all(|dep| {
                doc.find(dep).map(|d| d.status == TaskStatus::Done).unwrap_or(false)
            })
        })
        .collect();
    candidates.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| task_number(&a.id).cmp(&task_number(&b.id)))
    });

    match candidates.first() {
        Some(task) => Ok(HandlerOutcome::new(to_value(task)?).with_task(task.id.clone())),
        None => Ok(HandlerOutcome::new(json!({"next": null}))),
    }
}

fn exists(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let task_id = req_str(params, "taskId")?;
    let doc = cx.store.load_tasks()?;
    let in_live = doc.find(task_id).is_some();
    let in_archive = !in_live && cx.store.load_archive()?.find(task_id).is_some();
    Ok(HandlerOutcome::new(json!({
        "taskId": task_id,
        "exists": in_live || in_archive,
        "archived": in_archive,
    })))
}

// -- Mutations -------------------------------------------------------------

fn add(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    cx.store.with_lock(DataFile::Todo, || {
        let mut doc = cx.store.load_tasks()?;
        let archive = cx.store.load_archive()?;

        let id = match opt_str(params, "id") {
            Some(explicit) => {
                if doc.find(explicit).is_some() || archive.find(explicit).is_some() {
                    return Err(cleo_store::StoreError::IdCollision {
                        id: explicit.to_string(),
                    });
                }
                explicit.to_string()
            }
            None => cx.store.next_task_id(&doc, &archive),
        };

        let mut task = Task::new(
            id.as_str(),
            req_str(params, "title").map_err(to_store_validation)?,
            req_str(params, "description").map_err(to_store_validation)?,
        );
        apply_fields(&mut task, params).map_err(to_store_validation)?;

        if dry_run(params) {
            return Ok(HandlerOutcome::new(json!({
                "dryRun": true,
                "wouldCreate": serde_json::to_value(&task).unwrap_or(Value::Null),
            })));
        }

        doc.tasks.push(task.clone());
        cx.store.save_tasks(&doc)?;
        Ok(HandlerOutcome::new(serde_json::to_value(&task).unwrap_or(Value::Null)).with_task(id))
    })
    .map_err(not_found_or)
}

fn update(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let task_id = req_str(params, "taskId")?.to_string();
    mutate_task(cx, &task_id, params, |task, params| {
        apply_fields(task, params)?;
        if let Some(note) = opt_str(params, "notes") {
            task.add_note(note);
        }
        Ok(json!({"updated": true}))
    })
}

fn complete(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let task_id = req_str(params, "taskId")?;
    cx.store
        .with_lock(DataFile::Todo, || {
            let mut doc = cx.store.load_tasks()?;
            let task = doc
                .find_mut(task_id)
                .ok_or_else(|| cleo_store::StoreError::validation(format!("Task {task_id} not found")))?;

            if task.status == TaskStatus::Done {
                let data = serde_json::to_value(&*task).unwrap_or(Value::Null);
                return Ok(HandlerOutcome::already_done(data).with_task(task_id));
            }

            if dry_run(params) {
                return Ok(HandlerOutcome::new(json!({"dryRun": true, "wouldComplete": task_id})));
            }

            task.status = TaskStatus::Done;
            // Set exactly once; a re-completed task after reopen gets a
            // fresh stamp because reopen cleared it.
            if task.completed_at.is_none() {
                task.completed_at = Some(Utc::now());
            }
            if let Some(note) = opt_str(params, "notes") {
                task.add_note(note);
            }
            task.updated = Utc::now();

            let data = serde_json::to_value(&*task).unwrap_or(Value::Null);
            cx.store.save_tasks(&doc)?;
            Ok(HandlerOutcome::new(data).with_task(task_id))
        })
        .map_err(not_found_or)
}

fn delete(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let task_id = req_str(params, "taskId")?;
    let cascade = super::opt_bool(params, "cascade");

    cx.store
        .with_lock(DataFile::Todo, || {
            let mut doc = cx.store.load_tasks()?;
            if doc.find(task_id).is_none() {
                return Err(cleo_store::StoreError::validation(format!(
                    "Task {task_id} not found"
                )));
            }

            let graph = TaskGraph::build(&doc.tasks);
            let mut doomed = vec![task_id.to_string()];
            if cascade {
                let mut frontier = vec![task_id.to_string()];
                while let Some(current) = frontier.pop() {
                    for child in graph.children_of(&current) {
                        if !doomed.contains(&child) {
                            doomed.push(child.clone());
                            frontier.push(child);
                        }
                    }
                }
            }

            // Anything outside the doomed set that still points at it
            // keeps the delete from happening.
            let blocking: Vec<&str> = doc
                .tasks
                .iter()
                .filter(|t| !doomed.contains(&t.id))
                .filter(|t| {
                    t.depends.iter().any(|d| doomed.contains(d))
                        || t.parent_id.as_ref().map(|p| doomed.contains(p)).unwrap_or(false)
                })
                .map(|t| t.id.as_str())
                .collect();
            if !blocking.is_empty() {
                return Err(cleo_store::StoreError::validation(format!(
                    "Cannot delete {task_id}: referenced by {}",
                    blocking.join(", ")
                )));
            }

            if dry_run(params) {
                return Ok(HandlerOutcome::new(json!({"dryRun": true, "wouldDelete": doomed})));
            }

            if cascade {
                cx.store.backup(&format!("delete --cascade {task_id}"))?;
            }
            doc.tasks.retain(|t| !doomed.contains(&t.id));
            cx.store.save_tasks(&doc)?;
            Ok(HandlerOutcome::new(json!({"deleted": doomed})).with_task(task_id))
        })
        .map_err(map_delete_error)
}

/// A delete blocked by live references is a dependency error, not a
/// generic validation failure.
fn map_delete_error(err: cleo_store::StoreError) -> CleoError {
    let cleo = not_found_or(err);
    if cleo.message.contains("referenced by") {
        CleoError::new(ErrorCode::DependencyError, cleo.message)
    } else {
        cleo
    }
}

fn archive(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let task_id = req_str(params, "taskId")?;
    let reason = opt_str(params, "reason").map(String::from);

    cx.store
        .with_lock(DataFile::Todo, || {
            cx.store.with_lock(DataFile::Archive, || {
                let mut doc = cx.store.load_tasks()?;
                let mut archive_doc = cx.store.load_archive()?;

                if archive_doc.find(task_id).is_some() {
                    let data =
                        serde_json::to_value(archive_doc.find(task_id)).unwrap_or(Value::Null);
                    return Ok(HandlerOutcome::already_done(data).with_task(task_id));
                }

                let index = doc
                    .tasks
                    .iter()
                    .position(|t| t.id == task_id)
                    .ok_or_else(|| {
                        cleo_store::StoreError::validation(format!("Task {task_id} not found"))
                    })?;

                if dry_run(params) {
                    return Ok(HandlerOutcome::new(
                        json!({"dryRun": true, "wouldArchive": task_id}),
                    ));
                }

                cx.store.backup(&format!("archive {task_id}"))?;

                // The task is stored as-is; being in the archive file is
                // what marks it archived, so restore can return it
                // unchanged.
                let task = doc.tasks.remove(index);
                let entry = ArchivedTask {
                    task,
                    archive: ArchiveInfo {
                        archived_at: Utc::now(),
                        reason: reason.clone(),
                    },
                };
                archive_doc.archived_tasks.push(entry.clone());
                doc.meta.last_archived = Some(Utc::now());

                cx.store.save_archive(&archive_doc)?;
                cx.store.save_tasks(&doc)?;
                Ok(
                    HandlerOutcome::new(serde_json::to_value(&entry).unwrap_or(Value::Null))
                        .with_task(task_id),
                )
            })
        })
        .map_err(not_found_or)
}

fn restore(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let task_id = req_str(params, "taskId")?;

    cx.store
        .with_lock(DataFile::Todo, || {
            cx.store.with_lock(DataFile::Archive, || {
                let mut doc = cx.store.load_tasks()?;
                let mut archive_doc = cx.store.load_archive()?;

                let index = archive_doc
                    .archived_tasks
                    .iter()
                    .position(|a| a.task.id == task_id)
                    .ok_or_else(|| {
                        cleo_store::StoreError::validation(format!(
                            "Task {task_id} not found in the archive"
                        ))
                    })?;

                if doc.find(task_id).is_some() {
                    return Err(cleo_store::StoreError::IdCollision {
                        id: task_id.to_string(),
                    });
                }

                if dry_run(params) {
                    return Ok(HandlerOutcome::new(
                        json!({"dryRun": true, "wouldRestore": task_id}),
                    ));
                }

                cx.store.backup(&format!("restore {task_id}"))?;

                // Every field except `updated` comes back exactly as it
                // was archived.
                let mut task = archive_doc.archived_tasks.remove(index).task;
                task.updated = Utc::now();
                let data = serde_json::to_value(&task).unwrap_or(Value::Null);
                doc.tasks.push(task);

                cx.store.save_tasks(&doc)?;
                cx.store.save_archive(&archive_doc)?;
                Ok(HandlerOutcome::new(data).with_task(task_id))
            })
        })
        .map_err(|e| match e {
            cleo_store::StoreError::Validation { ref message } if message.contains("not found") => {
                CleoError::new(ErrorCode::NotFound, message.clone())
            }
            other => other.into(),
        })
}

fn reparent(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let task_id = req_str(params, "taskId")?.to_string();
    let parent = opt_str(params, "parentId").map(String::from);
    mutate_task(cx, &task_id, params, move |task, _| {
        task.parent_id = parent.clone();
        Ok(json!({"parentId": &task.parent_id}))
    })
}

fn promote(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let task_id = req_str(params, "taskId")?.to_string();
    mutate_task(cx, &task_id, params, |task, _| {
        task.task_type = match task.task_type {
            TaskType::Subtask => TaskType::Task,
            TaskType::Task => TaskType::Epic,
            TaskType::Epic => {
                return Err(CleoError::new(
                    ErrorCode::ValidationError,
                    format!("Task {} is already an epic", task.id),
                ));
            }
        };
        // An epic sits at the top of the hierarchy.
        if task.task_type == TaskType::Epic {
            task.parent_id = None;
        }
        Ok(json!({"type": task.task_type}))
    })
}

fn reorder(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let task_id = req_str(params, "taskId")?;
    let position = params
        .get("position")
        .and_then(Value::as_u64)
        .ok_or_else(|| {
            CleoError::new(ErrorCode::ValidationError, "Parameter 'position' must be a non-negative integer")
        })? as usize;

    cx.store
        .with_lock(DataFile::Todo, || {
            let mut doc = cx.store.load_tasks()?;
            let index = doc
                .tasks
                .iter()
                .position(|t| t.id == task_id)
                .ok_or_else(|| {
                    cleo_store::StoreError::validation(format!("Task {task_id} not found"))
                })?;
            if position >= doc.tasks.len() {
                return Err(cleo_store::StoreError::validation(format!(
                    "Position {position} is out of range (0..{})",
                    doc.tasks.len() - 1
                )));
            }

            if dry_run(params) {
                return Ok(HandlerOutcome::new(json!({"dryRun": true})));
            }

            let mut task = doc.tasks.remove(index);
            task.updated = Utc::now();
            doc.tasks.insert(position, task);
            cx.store.save_tasks(&doc)?;
            Ok(HandlerOutcome::new(json!({"taskId": task_id, "position": position}))
                .with_task(task_id))
        })
        .map_err(not_found_or)
}

fn reopen(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let task_id = req_str(params, "taskId")?.to_string();
    mutate_task(cx, &task_id, params, |task, _| {
        if !matches!(task.status, TaskStatus::Done | TaskStatus::Cancelled) {
            return Err(CleoError::new(
                ErrorCode::ValidationError,
                format!("Task {} is not completed or cancelled", task.id),
            ));
        }
        task.status = TaskStatus::Pending;
        task.completed_at = None;
        Ok(json!({"status": task.status}))
    })
}

fn relates_add(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let task_id = req_str(params, "taskId")?.to_string();
    let related = req_str(params, "relatedId")?.to_string();

    cx.store
        .with_lock(DataFile::Todo, || {
            let mut doc = cx.store.load_tasks()?;
            if doc.find(&related).is_none() {
                return Err(cleo_store::StoreError::validation(format!(
                    "Related task {related} not found"
                )));
            }
            let task = doc.find_mut(&task_id).ok_or_else(|| {
                cleo_store::StoreError::validation(format!("Task {task_id} not found"))
            })?;

            let already = task.relates.contains(&related);
            if !already && !dry_run(params) {
                task.relates.push(related.clone());
                task.updated = Utc::now();
            }
            let data =
                json!({"taskId": &task_id, "relates": &task.relates, "added": !already});
            if !dry_run(params) {
                cx.store.save_tasks(&doc)?;
            }
            Ok(HandlerOutcome::new(data).with_task(task_id.clone()))
        })
        .map_err(not_found_or)
}

fn start(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let task_id = req_str(params, "taskId")?.to_string();
    mutate_task(cx, &task_id, params, |task, _| {
        match task.status {
            TaskStatus::Pending | TaskStatus::Blocked | TaskStatus::Active => {
                task.status = TaskStatus::Active;
                Ok(json!({"status": task.status}))
            }
            other => Err(CleoError::new(
                ErrorCode::ValidationError,
                format!("Cannot start a {other} task"),
            )),
        }
    })
}

fn stop(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let task_id = req_str(params, "taskId")?.to_string();
    mutate_task(cx, &task_id, params, |task, _| {
        if task.status != TaskStatus::Active {
            return Err(CleoError::new(
                ErrorCode::ValidationError,
                format!("Task {} is not active", task.id),
            ));
        }
        task.status = TaskStatus::Pending;
        Ok(json!({"status": task.status}))
    })
}

fn workflow(cx: &HandlerCx<'_>, operation: &str, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let task_id = req_str(params, "taskId")?.to_string();
    let verb = operation.strip_prefix("workflow.").unwrap_or(operation).to_string();

    mutate_task(cx, &task_id, params, move |task, params| {
        let gate = cleo_verify::workflow::validate_gate_request(&verb, params, &task.verification)?;

        let mut tracker =
            cleo_verify::WorkflowGateTracker::from_record(task.verification.clone());
        match verb.as_str() {
            "pass" => tracker.pass(gate, opt_str(params, "agent"))?,
            "fail" => tracker.fail(gate, opt_str(params, "reason")),
            _ => unreachable!("screened by the registry"),
        }
        task.verification = tracker.into_record();

        Ok(json!({
            "gate": gate,
            "verification": task.verification.status_map(),
        }))
    })
}

// -- Shared mutation plumbing ---------------------------------------------

/// Load, find, mutate, bump `updated`, save. `created` is never touched.
fn mutate_task(
    cx: &HandlerCx<'_>,
    task_id: &str,
    params: &Value,
    mutator: impl FnOnce(&mut Task, &Value) -> Result<Value, CleoError>,
) -> Result<HandlerOutcome, CleoError> {
    cx.store
        .with_lock(DataFile::Todo, || {
            let mut doc = cx.store.load_tasks()?;
            let task = doc.find_mut(task_id).ok_or_else(|| {
                cleo_store::StoreError::validation(format!("Task {task_id} not found"))
            })?;

            let extra = mutator(task, params)
                .map_err(|e| cleo_store::StoreError::validation(handler_err_token(&e)))?;

            if dry_run(params) {
                return Ok(HandlerOutcome::new(json!({"dryRun": true, "would": extra})));
            }

            task.updated = Utc::now();
            let mut data = serde_json::to_value(&*task).unwrap_or(Value::Null);
            if let (Some(obj), Some(extra_obj)) = (data.as_object_mut(), extra.as_object()) {
                for (k, v) in extra_obj {
                    obj.entry(k.clone()).or_insert(v.clone());
                }
            }
            cx.store.save_tasks(&doc)?;
            Ok(HandlerOutcome::new(data).with_task(task_id))
        })
        .map_err(not_found_or)
}

/// Like [`mutate_task`], but for stage operations that can find the task
/// already in the desired state: those skip the save and report the
/// idempotent outcome.
pub(crate) fn mutate_task_for_pipeline(
    cx: &HandlerCx<'_>,
    task_id: &str,
    params: &Value,
    mutator: impl FnOnce(&mut Task, &Value) -> Result<super::pipeline_ops::StageOutcome, CleoError>,
) -> Result<HandlerOutcome, CleoError> {
    use super::pipeline_ops::StageOutcome;

    cx.store
        .with_lock(DataFile::Todo, || {
            let mut doc = cx.store.load_tasks()?;
            let task = doc.find_mut(task_id).ok_or_else(|| {
                cleo_store::StoreError::validation(format!("Task {task_id} not found"))
            })?;

            let outcome = mutator(task, params)
                .map_err(|e| cleo_store::StoreError::validation(handler_err_token(&e)))?;

            match outcome {
                StageOutcome::AlreadyDone(data) => {
                    Ok(HandlerOutcome::already_done(data).with_task(task_id))
                }
                StageOutcome::Changed(data) => {
                    if dry_run(params) {
                        return Ok(HandlerOutcome::new(json!({"dryRun": true, "would": data})));
                    }
                    task.updated = Utc::now();
                    cx.store.save_tasks(&doc)?;
                    Ok(HandlerOutcome::new(data).with_task(task_id))
                }
            }
        })
        .map_err(not_found_or)
}

// Handler errors tunnel through the store's validation kind inside the
// lock scope; unpack them on the way out so codes and messages survive.
fn handler_err_token(err: &CleoError) -> String {
    serde_json::to_string(err).unwrap_or_else(|_| err.message.clone())
}

fn not_found_or(err: cleo_store::StoreError) -> CleoError {
    if let cleo_store::StoreError::Validation { message } = &err {
        if let Ok(inner) = serde_json::from_str::<CleoError>(message) {
            return inner;
        }
        if message.contains("not found") {
            return CleoError::new(ErrorCode::NotFound, message.clone());
        }
    }
    err.into()
}

fn to_store_validation(err: CleoError) -> cleo_store::StoreError {
    cleo_store::StoreError::validation(handler_err_token(&err))
}

fn apply_fields(task: &mut Task, params: &Value) -> Result<(), CleoError> {
    if let Some(title) = opt_str(params, "title") {
        task.title = title.to_string();
    }
    if let Some(description) = opt_str(params, "description") {
        task.description = description.to_string();
    }
    if let Some(status) = opt_str(params, "status") {
        task.status = status
            .parse::<TaskStatus>()
            .map_err(|e| CleoError::new(ErrorCode::ValidationError, e))?;
    }
    match params.get("priority") {
        Some(Value::String(text)) => {
            task.priority = text
                .parse::<Priority>()
                .map_err(|e| CleoError::new(ErrorCode::ValidationError, e))?;
        }
        Some(Value::Number(n)) => {
            let n = n.as_i64().unwrap_or(-1);
            task.priority = Priority::from_numeric(n)
                .map_err(|e| CleoError::new(ErrorCode::ValidationError, e))?;
        }
        _ => {}
    }
    if let Some(task_type) = opt_str(params, "type") {
        task.task_type = task_type
            .parse::<TaskType>()
            .map_err(|e| CleoError::new(ErrorCode::ValidationError, e))?;
    }
    if let Some(size) = opt_str(params, "size") {
        task.size = Some(size.to_string());
    }
    if let Some(phase) = opt_str(params, "phase") {
        task.phase = Some(phase.to_string());
    }
    if let Some(labels) = opt_str_list(params, "labels") {
        task.labels = labels;
    }
    if let Some(depends) = opt_str_list(params, "depends") {
        task.depends = depends;
    }
    if let Some(files) = opt_str_list(params, "files") {
        task.files = files;
    }
    if let Some(parent) = params.get("parentId") {
        task.parent_id = parent.as_str().map(String::from);
    }
    Ok(())
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, CleoError> {
    serde_json::to_value(value).map_err(|e| CleoError::internal(format!("serialize: {e}")))
}
