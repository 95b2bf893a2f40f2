//! The `orchestrate` domain: skill selection and spawn-prompt assembly on
//! top of the session machinery.

use cleo_core::graph::TaskGraph;
use cleo_core::task::TaskStatus;
use cleo_core::{CleoError, ErrorCode};
use cleo_session::{dispatch_skill, prepare_spawn};
use cleo_store::DataFile;
use serde_json::{json, Value};

use super::{dry_run, req_str, unknown_operation, HandlerCx, HandlerOutcome};

pub fn handle(
    cx: &HandlerCx<'_>,
    operation: &str,
    params: &Value,
) -> Result<HandlerOutcome, CleoError> {
    match operation {
        "start" => start(cx, params),
        "spawn" => spawn(cx, params),
        "validate" => validate(cx, params),
        "parallel.start" => parallel_start(cx, params),
        "parallel.end" => parallel_end(cx, params),
        other => Err(unknown_operation("orchestrate", other)),
    }
}

/// Select the skill for a task and report the orchestration plan. No task
/// state changes; the session must already be active.
fn start(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let task_id = req_str(params, "taskId")?;
    let sessions = cx.store.load_sessions()?;
    let session = sessions.active().ok_or_else(|| {
        CleoError::validation("Orchestration requires an active session")
            .with_fix("cleo session start --scope <kind>:<subject>".to_string())
    })?;

    let tasks = cx.store.load_tasks()?;
    let task = tasks
        .find(task_id)
        .ok_or_else(|| CleoError::not_found(format!("Task {task_id}")))?;

    let skill = dispatch_skill(task);
    Ok(HandlerOutcome::new(json!({
        "taskId": task_id,
        "skill": skill.name,
        "category": skill.category,
        "sessionId": &session.id,
        "scope": &session.scope,
    }))
    .with_task(task_id)
    .with_session(session.id.clone()))
}

/// Assemble the spawn prompt for a task. The `prompt` field is the single
/// thing a caller must use; everything else is diagnostic.
fn spawn(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let task_id = req_str(params, "taskId")?;
    let tasks = cx.store.load_tasks()?;
    let task = tasks
        .find(task_id)
        .ok_or_else(|| CleoError::not_found(format!("Task {task_id}")))?;

    let sessions = cx.store.load_sessions()?;
    let session = sessions.active();

    let skill = dispatch_skill(task);
    let plan = prepare_spawn(skill, task, session);

    let mut outcome = HandlerOutcome::new(
        serde_json::to_value(&plan)
            .map_err(|e| CleoError::internal(format!("serialize spawn plan: {e}")))?,
    )
    .with_task(task_id);
    if let Some(session) = session {
        outcome = outcome.with_session(session.id.clone());
    }
    Ok(outcome)
}

/// Check a task is orchestratable: it exists, is open, and its
/// dependencies are complete.
fn validate(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let task_id = req_str(params, "taskId")?;
    let tasks = cx.store.load_tasks()?;
    let task = tasks
        .find(task_id)
        .ok_or_else(|| CleoError::not_found(format!("Task {task_id}")))?;

    let mut problems = Vec::new();
    if !task.status.is_open() {
        problems.push(format!("status is {}", task.status));
    }
    for dep in &task.depends {
        match tasks.find(dep) {
            Some(dep_task) if dep_task.status != TaskStatus::Done => {
                problems.push(format!("dependency {dep} is {}", dep_task.status));
            }
            Some(_) => {}
            None => problems.push(format!("dependency {dep} is missing")),
        }
    }

    Ok(HandlerOutcome::new(json!({
        "taskId": task_id,
        "ready": problems.is_empty(),
        "problems": problems,
        "skill": dispatch_skill(task).name,
    }))
    .with_task(task_id))
}

/// Start a parallel group: the tasks must exist and occupy disjoint
/// subtrees, then all become active.
fn parallel_start(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let ids = params
        .get("taskIds")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect::<Vec<_>>()
        })
        .filter(|ids| !ids.is_empty())
        .ok_or_else(|| {
            CleoError::new(
                ErrorCode::ValidationError,
                "Parameter 'taskIds' must be a non-empty array of task ids",
            )
        })?;

    cx.store
        .with_lock(DataFile::Todo, || {
            let mut doc = cx.store.load_tasks()?;
            for id in &ids {
                if doc.find(id).is_none() {
                    return Err(cleo_store::StoreError::validation(format!(
                        "Task {id} not found"
                    )));
                }
            }

            // Disjointness: no group member may sit in another member's
            // subtree, or the agents would race on the same work.
            let graph = TaskGraph::build(&doc.tasks);
            for a in &ids {
                for b in &ids {
                    if a != b && graph.path_exists(a, b) {
                        return Err(cleo_store::StoreError::validation(format!(
                            "Tasks {a} and {b} overlap; parallel groups need disjoint subtrees"
                        )));
                    }
                }
            }

            if dry_run(params) {
                return Ok(HandlerOutcome::new(json!({"dryRun": true, "group": ids})));
            }

            for id in &ids {
                if let Some(task) = doc.find_mut(id) {
                    task.status = TaskStatus::Active;
                    task.updated = chrono::Utc::now();
                }
            }
            cx.store.save_tasks(&doc)?;

            Ok(HandlerOutcome::new(json!({
                "groupId": ulid::Ulid::new().to_string(),
                "tasks": ids,
            })))
        })
        .map_err(map_not_found)
}

/// End a parallel group: active members return to pending unless they
/// were completed meanwhile.
fn parallel_end(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let ids = params
        .get("taskIds")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    cx.store
        .with_lock(DataFile::Todo, || {
            let mut doc = cx.store.load_tasks()?;

            if dry_run(params) {
                return Ok(HandlerOutcome::new(json!({"dryRun": true})));
            }

            let mut stopped = Vec::new();
            for id in &ids {
                if let Some(task) = doc.find_mut(id) {
                    if task.status == TaskStatus::Active {
                        task.status = TaskStatus::Pending;
                        task.updated = chrono::Utc::now();
                        stopped.push(id.clone());
                    }
                }
            }
            if !stopped.is_empty() {
                cx.store.save_tasks(&doc)?;
            }
            Ok(HandlerOutcome::new(json!({"stopped": stopped})))
        })
        .map_err(map_not_found)
}

fn map_not_found(err: cleo_store::StoreError) -> CleoError {
    if let cleo_store::StoreError::Validation { message } = &err {
        if message.contains("not found") {
            return CleoError::new(ErrorCode::NotFound, message.clone());
        }
    }
    err.into()
}
