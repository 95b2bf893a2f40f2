//! The `pipeline` domain: optional per-task lifecycle stages and the
//! project-level release sequence.

use chrono::{DateTime, Utc};
use cleo_core::task::{LifecycleStage, StageGate, StageStatus, Task, TaskStatus};
use cleo_core::{CleoError, ErrorCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::tasks::mutate_task_for_pipeline as mutate_task;
use super::{dry_run, opt_str, req_str, side, unknown_operation, HandlerCx, HandlerOutcome};

const RELEASE_FILE: &str = "release.json";

pub fn handle(
    cx: &HandlerCx<'_>,
    operation: &str,
    params: &Value,
) -> Result<HandlerOutcome, CleoError> {
    match operation {
        "stage.record" => stage_record(cx, params),
        "stage.skip" => stage_skip(cx, params),
        "stage.reset" => stage_reset(cx, params),
        "stage.gate.pass" => stage_gate(cx, params, true),
        "stage.gate.fail" => stage_gate(cx, params, false),
        "release.prepare" => release_prepare(cx, params),
        "release.changelog" => release_changelog(cx, params),
        "release.commit" => release_commit(cx, params),
        "release.tag" => release_tag(cx, params),
        "release.push" => release_push(cx, params),
        "release.gates.run" => release_gates_run(cx, params),
        "release.rollback" => release_rollback(cx, params),
        other => Err(unknown_operation("pipeline", other)),
    }
}

// -- Stages ----------------------------------------------------------------

fn stages_of(task: &mut Task) -> &mut Vec<LifecycleStage> {
    task.lifecycle.get_or_insert_with(Vec::new)
}

/// Every stage before `index` must be terminal (recorded or skipped)
/// before `index` may move.
fn check_stage_order(stages: &[LifecycleStage], index: usize) -> Result<(), CleoError> {
    if let Some(pending) = stages[..index]
        .iter()
        .find(|s| s.status == StageStatus::Pending)
    {
        return Err(CleoError::new(
            ErrorCode::LifecycleTransitionInvalid,
            format!("Stage '{}' is still pending", pending.name),
        ));
    }
    Ok(())
}

fn stage_record(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let task_id = req_str(params, "taskId")?.to_string();
    let stage_name = req_str(params, "stage")?.to_string();
    let evidence = opt_str(params, "evidence").map(String::from);

    mutate_task(cx, &task_id, params, move |task, _| {
        let stages = stages_of(task);
        let index = match stages.iter().position(|s| s.name == stage_name) {
            Some(index) => index,
            None => {
                stages.push(LifecycleStage::new(stage_name.clone()));
                stages.len() - 1
            }
        };

        if stages[index].status == StageStatus::Recorded {
            return Ok(StageOutcome::AlreadyDone(json!({
                "stage": stage_name,
                "status": "recorded",
            })));
        }
        check_stage_order(stages, index)?;

        stages[index].status = StageStatus::Recorded;
        if let Some(evidence) = &evidence {
            stages[index].evidence.push(evidence.clone());
        }
        Ok(StageOutcome::Changed(json!({
            "stage": stage_name,
            "status": "recorded",
        })))
    })
}

fn stage_skip(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let task_id = req_str(params, "taskId")?.to_string();
    let stage_name = req_str(params, "stage")?.to_string();
    let reason = opt_str(params, "reason").map(String::from);

    mutate_task(cx, &task_id, params, move |task, _| {
        let stages = stages_of(task);
        let index = match stages.iter().position(|s| s.name == stage_name) {
            Some(index) => index,
            None => {
                stages.push(LifecycleStage::new(stage_name.clone()));
                stages.len() - 1
            }
        };
        if stages[index].status == StageStatus::Recorded {
            return Err(CleoError::new(
                ErrorCode::LifecycleTransitionInvalid,
                format!("Stage '{stage_name}' is already recorded; reset it first"),
            ));
        }
        check_stage_order(stages, index)?;

        stages[index].status = StageStatus::Skipped;
        if let Some(reason) = &reason {
            stages[index].evidence.push(format!("skipped: {reason}"));
        }
        Ok(StageOutcome::Changed(json!({
            "stage": stage_name,
            "status": "skipped",
        })))
    })
}

fn stage_reset(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let task_id = req_str(params, "taskId")?.to_string();
    let stage_name = req_str(params, "stage")?.to_string();

    mutate_task(cx, &task_id, params, move |task, _| {
        let stages = stages_of(task);
        let stage = stages
            .iter_mut()
            .find(|s| s.name == stage_name)
            .ok_or_else(|| CleoError::not_found(format!("Stage '{stage_name}'")))?;
        stage.status = StageStatus::Pending;
        stage.gates.clear();
        stage.evidence.clear();
        Ok(StageOutcome::Changed(json!({
            "stage": stage_name,
            "status": "pending",
        })))
    })
}

fn stage_gate(cx: &HandlerCx<'_>, params: &Value, passed: bool) -> Result<HandlerOutcome, CleoError> {
    let task_id = req_str(params, "taskId")?.to_string();
    let stage_name = req_str(params, "stage")?.to_string();
    let gate = req_str(params, "gate")?.to_string();
    let reason = opt_str(params, "reason").map(String::from);

    mutate_task(cx, &task_id, params, move |task, _| {
        let stages = stages_of(task);
        let stage = stages
            .iter_mut()
            .find(|s| s.name == stage_name)
            .ok_or_else(|| CleoError::not_found(format!("Stage '{stage_name}'")))?;
        stage.gates.insert(
            gate.clone(),
            StageGate {
                passed,
                reason: reason.clone(),
            },
        );
        Ok(StageOutcome::Changed(json!({
            "stage": stage_name,
            "gate": gate,
            "passed": passed,
        })))
    })
}

/// Stage mutations distinguish "changed" from "already in the desired
/// state" so the pipeline can map the latter to an idempotent exit.
pub(crate) enum StageOutcome {
    Changed(Value),
    AlreadyDone(Value),
}

// -- Release ---------------------------------------------------------------

/// `.cleo/release.json`: the project-level release sequence. Each step
/// requires the previous one.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prepared_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    changelog_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    changelog: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    committed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tagged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pushed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gates_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    gates_passed: bool,
}

fn step_requires(
    previous: Option<DateTime<Utc>>,
    current: &str,
    needed: &str,
) -> Result<(), CleoError> {
    if previous.is_none() {
        return Err(CleoError::new(
            ErrorCode::LifecycleTransitionInvalid,
            format!("release.{current} requires release.{needed} first"),
        )
        .with_fix(format!("cleo pipeline release-{needed}")));
    }
    Ok(())
}

fn release_prepare(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let version = req_str(params, "version")?.to_string();
    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true, "version": version})));
    }

    let data = side::update(cx.store, RELEASE_FILE, |doc: &mut ReleaseDocument| {
        *doc = ReleaseDocument {
            version: Some(version.clone()),
            prepared_at: Some(Utc::now()),
            ..ReleaseDocument::default()
        };
        Ok(json!({"version": version, "prepared": true}))
    })?;
    Ok(HandlerOutcome::new(data))
}

fn release_changelog(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true})));
    }

    // Completed work becomes the changelog body.
    let tasks = cx.store.load_tasks()?;
    let lines: Vec<String> = tasks
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Done)
        .map(|t| format!("{}: {}", t.id, t.title))
        .collect();

    let data = side::update(cx.store, RELEASE_FILE, |doc: &mut ReleaseDocument| {
        step_requires(doc.prepared_at, "changelog", "prepare")?;
        doc.changelog = lines.clone();
        doc.changelog_at = Some(Utc::now());
        Ok(json!({"changelog": lines}))
    })?;
    Ok(HandlerOutcome::new(data))
}

fn release_commit(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true})));
    }
    let data = side::update(cx.store, RELEASE_FILE, |doc: &mut ReleaseDocument| {
        step_requires(doc.changelog_at, "commit", "changelog")?;
        doc.committed_at = Some(Utc::now());
        Ok(json!({"committed": true}))
    })?;
    Ok(HandlerOutcome::new(data))
}

fn release_tag(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true})));
    }

    enum Tagged {
        Already(String),
        Fresh(String),
    }

    let tagged = side::update(cx.store, RELEASE_FILE, |doc: &mut ReleaseDocument| {
        step_requires(doc.committed_at, "tag", "commit")?;
        if let Some(existing) = &doc.tag {
            return Ok(Tagged::Already(existing.clone()));
        }
        let tag = format!(
            "v{}",
            doc.version.as_deref().unwrap_or("0.0.0")
        );
        doc.tag = Some(tag.clone());
        doc.tagged_at = Some(Utc::now());
        Ok(Tagged::Fresh(tag))
    })?;

    Ok(match tagged {
        Tagged::Already(tag) => HandlerOutcome::already_done(json!({"tag": tag})),
        Tagged::Fresh(tag) => HandlerOutcome::new(json!({"tag": tag})),
    })
}

fn release_push(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true})));
    }
    let data = side::update(cx.store, RELEASE_FILE, |doc: &mut ReleaseDocument| {
        step_requires(doc.tagged_at, "push", "tag")?;
        doc.pushed_at = Some(Utc::now());
        Ok(json!({"pushed": true, "tag": &doc.tag}))
    })?;
    Ok(HandlerOutcome::new(data))
}

/// Run the release gates: every completed task must have its full workflow
/// chain passed.
fn release_gates_run(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true})));
    }

    let tasks = cx.store.load_tasks()?;
    let failing: Vec<String> = tasks
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Done)
        .filter(|t| {
            let tracker =
                cleo_verify::WorkflowGateTracker::from_record(t.verification.clone());
            !tracker.all_passed()
        })
        .map(|t| t.id.clone())
        .collect();

    let passed = failing.is_empty();
    side::update(cx.store, RELEASE_FILE, |doc: &mut ReleaseDocument| {
        doc.gates_run_at = Some(Utc::now());
        doc.gates_passed = passed;
        Ok(())
    })?;

    if passed {
        Ok(HandlerOutcome::new(json!({"gatesPassed": true})))
    } else {
        Err(CleoError::new(
            ErrorCode::LifecycleGateFailed,
            format!("Release gates failed for: {}", failing.join(", ")),
        )
        .with_details(json!({"failing": failing})))
    }
}

fn release_rollback(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true})));
    }
    let data = side::update(cx.store, RELEASE_FILE, |doc: &mut ReleaseDocument| {
        if doc.prepared_at.is_none() {
            return Err(CleoError::new(
                ErrorCode::LifecycleTransitionInvalid,
                "No release in progress to roll back",
            ));
        }
        let version = doc.version.take();
        *doc = ReleaseDocument::default();
        Ok(json!({"rolledBack": version}))
    })?;
    Ok(HandlerOutcome::new(data))
}
