//! The `memory` domain: project memory — context injections, task links,
//! manifest entries, reusable patterns and learnings.

use chrono::{DateTime, Utc};
use cleo_core::CleoError;
use cleo_verify::context::ProtocolType;
use cleo_verify::protocol::{ManifestEntry, ProtocolEnforcer};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{dry_run, opt_str, req_str, side, unknown_operation, HandlerCx, HandlerOutcome};

const MANIFEST_FILE: &str = "manifest.json";
const MEMORY_FILE: &str = "memory.json";

/// `.cleo/manifest.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ManifestDocument {
    #[serde(default)]
    entries: Vec<Value>,
    #[serde(default)]
    archived: Vec<Value>,
}

/// `.cleo/memory.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryDocument {
    #[serde(default)]
    injections: Vec<Injection>,
    #[serde(default)]
    links: Vec<Link>,
    #[serde(default)]
    patterns: serde_json::Map<String, Value>,
    #[serde(default)]
    learnings: Vec<Learning>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Injection {
    ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    content: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Link {
    ts: DateTime<Utc>,
    task_id: String,
    target: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Learning {
    ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    task_id: Option<String>,
    content: String,
}

pub fn handle(
    cx: &HandlerCx<'_>,
    operation: &str,
    params: &Value,
) -> Result<HandlerOutcome, CleoError> {
    match operation {
        "inject" => inject(cx, params),
        "link" => link(cx, params),
        "manifest.append" => manifest_append(cx, params),
        "manifest.archive" => manifest_archive(cx, params),
        "pattern.store" => pattern_store(cx, params),
        "learning.store" => learning_store(cx, params),
        other => Err(unknown_operation("memory", other)),
    }
}

fn inject(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let content = req_str(params, "content")?.to_string();
    let target = opt_str(params, "target").map(String::from);

    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true})));
    }

    let count = side::update(cx.store, MEMORY_FILE, |doc: &mut MemoryDocument| {
        doc.injections.push(Injection {
            ts: Utc::now(),
            target,
            content,
        });
        Ok(doc.injections.len())
    })?;

    Ok(HandlerOutcome::new(json!({"injections": count})))
}

fn link(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let task_id = req_str(params, "taskId")?.to_string();
    let target = req_str(params, "target")?.to_string();

    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true})));
    }

    let data_task = task_id.clone();
    side::update(cx.store, MEMORY_FILE, |doc: &mut MemoryDocument| {
        doc.links.push(Link {
            ts: Utc::now(),
            task_id,
            target: target.clone(),
        });
        Ok(())
    })?;

    Ok(HandlerOutcome::new(json!({"linked": true, "target": target})).with_task(data_task))
}

fn manifest_append(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let entry = params
        .get("manifest")
        .cloned()
        .ok_or_else(|| CleoError::validation("Missing 'manifest' parameter"))?;

    // The entry's own agent_type picks the contract to enforce.
    let protocol_type: ProtocolType = entry
        .get("agent_type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .parse()
        .map_err(|e: String| CleoError::validation(e))?;

    let enforcer = ProtocolEnforcer;
    let violations = enforcer.check_manifest(&entry, protocol_type);
    if let Some(violation) = violations.iter().find(|v| v.blocking) {
        return Err(CleoError::new(violation.code, violation.message.clone())
            .with_details(json!({"violations": violations})));
    }

    // The contract held, so this parse cannot reject it; going through the
    // typed entry drops unknown keys instead of persisting them.
    let typed: ManifestEntry = serde_json::from_value(entry.clone())
        .map_err(|e| CleoError::validation(format!("Malformed manifest entry: {e}")))?;
    let entry = serde_json::to_value(&typed)
        .map_err(|e| CleoError::internal(format!("serialize manifest entry: {e}")))?;

    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true, "wouldAppend": entry})));
    }

    let count = side::update(cx.store, MANIFEST_FILE, |doc: &mut ManifestDocument| {
        doc.entries.push(entry.clone());
        Ok(doc.entries.len())
    })?;

    Ok(HandlerOutcome::new(json!({"entries": count})))
}

fn manifest_archive(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let id = req_str(params, "id")?.to_string();

    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true, "wouldArchive": id})));
    }

    side::update(cx.store, MANIFEST_FILE, |doc: &mut ManifestDocument| {
        let index = doc
            .entries
            .iter()
            .position(|e| e.get("id").and_then(Value::as_str) == Some(id.as_str()))
            .ok_or_else(|| CleoError::not_found(format!("Manifest entry {id}")))?;
        let entry = doc.entries.remove(index);
        doc.archived.push(entry);
        Ok(())
    })?;

    Ok(HandlerOutcome::new(json!({"archived": id})))
}

fn pattern_store(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let name = req_str(params, "name")?.to_string();
    let content = req_str(params, "content")?.to_string();

    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true})));
    }

    let replaced = side::update(cx.store, MEMORY_FILE, |doc: &mut MemoryDocument| {
        let previous = doc.patterns.insert(
            name.clone(),
            json!({"content": content, "ts": Utc::now()}),
        );
        Ok(previous.is_some())
    })?;

    Ok(HandlerOutcome::new(json!({"stored": true, "replaced": replaced})))
}

fn learning_store(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let content = req_str(params, "content")?.to_string();
    let task_id = opt_str(params, "taskId").map(String::from);

    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true})));
    }

    let count = side::update(cx.store, MEMORY_FILE, |doc: &mut MemoryDocument| {
        doc.learnings.push(Learning {
            ts: Utc::now(),
            task_id: task_id.clone(),
            content,
        });
        Ok(doc.learnings.len())
    })?;

    let mut outcome = HandlerOutcome::new(json!({"learnings": count}));
    if let Some(id) = task_id {
        outcome = outcome.with_task(id);
    }
    Ok(outcome)
}
