//! The `tools` domain: skill installation state, issue intake, provider
//! context injection.

use chrono::{DateTime, Utc};
use cleo_core::task::Task;
use cleo_core::{CleoError, ErrorCode};
use cleo_session::dispatcher::{skill_by_name, SKILLS};
use cleo_store::DataFile;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use super::{dry_run, opt_str, req_str, side, unknown_operation, HandlerCx, HandlerOutcome};

const SKILLS_FILE: &str = "skills.json";

/// `.cleo/skills.json`: which built-in skills are installed and how they
/// are configured.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SkillsDocument {
    #[serde(default)]
    installed: BTreeMap<String, SkillState>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SkillState {
    enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    config: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    installed_at: Option<DateTime<Utc>>,
}

pub fn handle(
    cx: &HandlerCx<'_>,
    operation: &str,
    params: &Value,
) -> Result<HandlerOutcome, CleoError> {
    match operation {
        "skill.install" => skill_install(cx, params),
        "skill.uninstall" => skill_uninstall(cx, params),
        "skill.enable" => skill_set_enabled(cx, params, true),
        "skill.disable" => skill_set_enabled(cx, params, false),
        "skill.configure" => skill_configure(cx, params),
        "skill.refresh" => skill_refresh(cx, params),
        "issue.add.bug" => issue_add(cx, params, "bug"),
        "issue.add.feature" => issue_add(cx, params, "feature"),
        "issue.add.help" => issue_add(cx, params, "help-wanted"),
        "provider.inject" => provider_inject(cx, params),
        other => Err(unknown_operation("tools", other)),
    }
}

fn known_skill(name: &str) -> Result<(), CleoError> {
    if skill_by_name(name).is_none() {
        return Err(CleoError::not_found(format!("Skill '{name}'")).with_alternatives(
            SKILLS.iter().map(|s| s.name.to_string()).collect(),
        ));
    }
    Ok(())
}

fn skill_install(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let name = req_str(params, "name")?.to_string();
    known_skill(&name)?;

    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true, "wouldInstall": name})));
    }

    let already = side::update(cx.store, SKILLS_FILE, |doc: &mut SkillsDocument| {
        if doc.installed.contains_key(&name) {
            return Ok(true);
        }
        doc.installed.insert(
            name.clone(),
            SkillState {
                enabled: true,
                config: None,
                installed_at: Some(Utc::now()),
            },
        );
        Ok(false)
    })?;

    Ok(HandlerOutcome::new(json!({"installed": true, "alreadyInstalled": already})))
}

fn skill_uninstall(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let name = req_str(params, "name")?.to_string();

    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true, "wouldUninstall": name})));
    }

    side::update(cx.store, SKILLS_FILE, |doc: &mut SkillsDocument| {
        doc.installed
            .remove(&name)
            .map(|_| ())
            .ok_or_else(|| CleoError::not_found(format!("Skill '{name}' is not installed")))
    })?;

    Ok(HandlerOutcome::new(json!({"uninstalled": true})))
}

fn skill_set_enabled(
    cx: &HandlerCx<'_>,
    params: &Value,
    enabled: bool,
) -> Result<HandlerOutcome, CleoError> {
    let name = req_str(params, "name")?.to_string();
    known_skill(&name)?;

    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true})));
    }

    side::update(cx.store, SKILLS_FILE, |doc: &mut SkillsDocument| {
        let state = doc
            .installed
            .get_mut(&name)
            .ok_or_else(|| CleoError::not_found(format!("Skill '{name}' is not installed")))?;
        state.enabled = enabled;
        Ok(())
    })?;

    Ok(HandlerOutcome::new(json!({"name": name, "enabled": enabled})))
}

fn skill_configure(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let name = req_str(params, "name")?.to_string();
    let config = params
        .get("config")
        .cloned()
        .ok_or_else(|| CleoError::validation("Missing 'config' parameter"))?;
    if !config.is_object() {
        return Err(CleoError::new(
            ErrorCode::ValidationError,
            "Parameter 'config' must be an object",
        ));
    }

    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true})));
    }

    side::update(cx.store, SKILLS_FILE, |doc: &mut SkillsDocument| {
        let state = doc
            .installed
            .get_mut(&name)
            .ok_or_else(|| CleoError::not_found(format!("Skill '{name}' is not installed")))?;
        state.config = Some(config.clone());
        Ok(())
    })?;

    Ok(HandlerOutcome::new(json!({"name": name, "configured": true})))
}

/// Drop installed entries whose skill no longer exists in the registry.
fn skill_refresh(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true})));
    }

    let removed = side::update(cx.store, SKILLS_FILE, |doc: &mut SkillsDocument| {
        let before = doc.installed.len();
        doc.installed.retain(|name, _| skill_by_name(name).is_some());
        Ok(before - doc.installed.len())
    })?;

    Ok(HandlerOutcome::new(json!({
        "removed": removed,
        "available": SKILLS.iter().map(|s| s.name).collect::<Vec<_>>(),
    })))
}

/// Issues land as labeled tasks so they flow through the same pipeline as
/// every other unit of work.
fn issue_add(cx: &HandlerCx<'_>, params: &Value, label: &str) -> Result<HandlerOutcome, CleoError> {
    let title = req_str(params, "title")?.to_string();
    let description = req_str(params, "description")?.to_string();

    cx.store
        .with_lock(DataFile::Todo, || {
            let mut doc = cx.store.load_tasks()?;
            let archive = cx.store.load_archive()?;
            let id = cx.store.next_task_id(&doc, &archive);

            let mut task = Task::new(id.as_str(), title.as_str(), description.as_str());
            task.labels.push(label.to_string());

            if dry_run(params) {
                return Ok(HandlerOutcome::new(json!({
                    "dryRun": true,
                    "wouldCreate": serde_json::to_value(&task).unwrap_or(Value::Null),
                })));
            }

            doc.tasks.push(task.clone());
            cx.store.save_tasks(&doc)?;
            Ok(
                HandlerOutcome::new(serde_json::to_value(&task).unwrap_or(Value::Null))
                    .with_task(id),
            )
        })
        .map_err(CleoError::from)
}

fn provider_inject(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let provider = req_str(params, "provider")?.to_string();
    let content = opt_str(params, "content").map(String::from);

    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true})));
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct ProvidersDocument {
        #[serde(default)]
        providers: Map<String, Value>,
    }

    side::update(cx.store, "providers.json", |doc: &mut ProvidersDocument| {
        doc.providers.insert(
            provider.clone(),
            json!({"content": content, "ts": Utc::now()}),
        );
        Ok(())
    })?;

    Ok(HandlerOutcome::new(json!({"provider": provider, "injected": true})))
}
