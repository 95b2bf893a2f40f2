//! The `session` domain: the time-bounded work context.

use chrono::Utc;
use cleo_core::session::{SessionEntry, SessionStatus};
use cleo_core::{CleoError, ErrorCode};
use cleo_session::lifecycle;
use cleo_store::DataFile;
use serde_json::{json, Value};

use super::{dry_run, opt_str, req_str, unknown_operation, HandlerCx, HandlerOutcome};

/// Default staleness threshold for `session.gc`.
const GC_MAX_AGE_HOURS: i64 = 72;

pub fn handle(
    cx: &HandlerCx<'_>,
    operation: &str,
    params: &Value,
) -> Result<HandlerOutcome, CleoError> {
    match operation {
        "show" => show(cx, params),
        "list" => list(cx),
        "status" => status(cx),
        "start" => start(cx, params),
        "end" => end(cx, params),
        "resume" => resume(cx, params),
        "suspend" => suspend(cx, params),
        "gc" => gc(cx, params),
        "record.decision" => record(cx, params, Record::Decision),
        "record.assumption" => record(cx, params, Record::Assumption),
        other => Err(unknown_operation("session", other)),
    }
}

fn show(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let doc = cx.store.load_sessions()?;
    let session = match opt_str(params, "sessionId") {
        Some(id) => doc
            .sessions
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| CleoError::not_found(format!("Session {id}")))?,
        None => doc
            .active()
            .ok_or_else(|| CleoError::not_found("Active session").with_fix("cleo session start --scope <kind>:<subject>".to_string()))?,
    };
    let id = session.id.clone();
    Ok(HandlerOutcome::new(to_value(session)?).with_session(id))
}

fn list(cx: &HandlerCx<'_>) -> Result<HandlerOutcome, CleoError> {
    let doc = cx.store.load_sessions()?;
    let count = doc.sessions.len();
    Ok(HandlerOutcome::new(json!({
        "sessions": doc.sessions,
        "count": count,
    })))
}

fn status(cx: &HandlerCx<'_>) -> Result<HandlerOutcome, CleoError> {
    let doc = cx.store.load_sessions()?;
    match doc.active() {
        Some(active) => Ok(HandlerOutcome::new(json!({
            "active": true,
            "sessionId": &active.id,
            "scope": &active.scope,
            "startedAt": active.started_at,
        }))
        .with_session(active.id.clone())),
        None => Ok(HandlerOutcome::new(json!({"active": false}))),
    }
}

fn start(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let scope = req_str(params, "scope")?;
    cx.store
        .with_lock(DataFile::Sessions, || {
            let mut doc = cx.store.load_sessions()?;
            let session = lifecycle::start(&doc.sessions, scope).map_err(tunnel)?;

            if dry_run(params) {
                return Ok(HandlerOutcome::new(json!({"dryRun": true, "scope": scope})));
            }

            let data = serde_json::to_value(&session).unwrap_or(Value::Null);
            let id = session.id.clone();
            doc.sessions.push(session);
            cx.store.save_sessions(&doc)?;
            Ok(HandlerOutcome::new(data).with_session(id))
        })
        .map_err(untunnel)
}

fn end(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    cx.store
        .with_lock(DataFile::Sessions, || {
            let mut doc = cx.store.load_sessions()?;
            let Some(active_id) = doc.active().map(|s| s.id.clone()) else {
                // Nothing to end: the desired state already holds.
                return Ok(HandlerOutcome::already_done(json!({"active": false})));
            };

            if dry_run(params) {
                return Ok(HandlerOutcome::new(json!({"dryRun": true, "wouldEnd": active_id})));
            }

            let Some(session) = doc.find_mut(&active_id) else {
                return Err(tunnel(CleoError::internal("active session disappeared")));
            };
            session.status = SessionStatus::Ended;
            session.ended_at = Some(Utc::now());
            if let Some(notes) = opt_str(params, "notes") {
                session.notes = Some(notes.to_string());
            }
            let data = serde_json::to_value(&*session).unwrap_or(Value::Null);

            cx.store.save_sessions(&doc)?;
            Ok(HandlerOutcome::new(data).with_session(active_id))
        })
        .map_err(untunnel)
}

fn resume(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let session_id = req_str(params, "sessionId")?.to_string();
    cx.store
        .with_lock(DataFile::Sessions, || {
            let mut doc = cx.store.load_sessions()?;

            if dry_run(params) {
                return Ok(HandlerOutcome::new(json!({"dryRun": true, "wouldResume": session_id})));
            }

            lifecycle::resume(&mut doc.sessions, &session_id).map_err(tunnel)?;
            let data = serde_json::to_value(doc.find_mut(&session_id).map(|s| &*s))
                .unwrap_or(Value::Null);
            cx.store.save_sessions(&doc)?;
            Ok(HandlerOutcome::new(data).with_session(session_id.clone()))
        })
        .map_err(untunnel)
}

fn suspend(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    cx.store
        .with_lock(DataFile::Sessions, || {
            let mut doc = cx.store.load_sessions()?;
            let Some(active_id) = doc.active().map(|s| s.id.clone()) else {
                return Err(tunnel(
                    CleoError::not_found("Active session")
                        .with_fix("cleo session start --scope <kind>:<subject>".to_string()),
                ));
            };

            if dry_run(params) {
                return Ok(HandlerOutcome::new(json!({"dryRun": true, "wouldSuspend": active_id})));
            }

            let Some(session) = doc.find_mut(&active_id) else {
                return Err(tunnel(CleoError::internal("active session disappeared")));
            };
            session.status =
                lifecycle::transition(session.status, lifecycle::SessionEvent::Suspend)
                    .map_err(tunnel)?;
            let data = serde_json::to_value(&*session).unwrap_or(Value::Null);

            cx.store.save_sessions(&doc)?;
            Ok(HandlerOutcome::new(data).with_session(active_id))
        })
        .map_err(untunnel)
}

fn gc(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let max_age_hours = params
        .get("maxAgeHours")
        .and_then(Value::as_i64)
        .unwrap_or(GC_MAX_AGE_HOURS);

    cx.store
        .with_lock(DataFile::Sessions, || {
            let mut doc = cx.store.load_sessions()?;

            if dry_run(params) {
                let cutoff = Utc::now() - chrono::Duration::hours(max_age_hours);
                let stale: Vec<&str> = doc
                    .sessions
                    .iter()
                    .filter(|s| s.status != SessionStatus::Ended && s.started_at < cutoff)
                    .map(|s| s.id.as_str())
                    .collect();
                return Ok(HandlerOutcome::new(json!({"dryRun": true, "wouldEnd": stale})));
            }

            let ended = lifecycle::gc(&mut doc.sessions, max_age_hours);
            if !ended.is_empty() {
                cx.store.save_sessions(&doc)?;
            }
            Ok(HandlerOutcome::new(json!({"ended": ended})))
        })
        .map_err(untunnel)
}

enum Record {
    Decision,
    Assumption,
}

fn record(cx: &HandlerCx<'_>, params: &Value, kind: Record) -> Result<HandlerOutcome, CleoError> {
    let text = req_str(params, "text")?.to_string();
    cx.store
        .with_lock(DataFile::Sessions, || {
            let mut doc = cx.store.load_sessions()?;
            let Some(active_id) = doc.active().map(|s| s.id.clone()) else {
                return Err(tunnel(
                    CleoError::validation("Recording requires an active session")
                        .with_fix("cleo session start --scope <kind>:<subject>".to_string()),
                ));
            };

            if dry_run(params) {
                return Ok(HandlerOutcome::new(json!({"dryRun": true})));
            }

            let Some(session) = doc.find_mut(&active_id) else {
                return Err(tunnel(CleoError::internal("active session disappeared")));
            };
            let entry = SessionEntry {
                ts: Utc::now(),
                text: text.clone(),
            };
            match kind {
                Record::Decision => session.decisions.push(entry),
                Record::Assumption => session.assumptions.push(entry),
            }
            let data = serde_json::to_value(&*session).unwrap_or(Value::Null);

            cx.store.save_sessions(&doc)?;
            Ok(HandlerOutcome::new(data).with_session(active_id))
        })
        .map_err(untunnel)
}

// Handler errors tunnel through the store error type inside lock scopes.

fn tunnel(err: CleoError) -> cleo_store::StoreError {
    cleo_store::StoreError::validation(serde_json::to_string(&err).unwrap_or(err.message))
}

fn untunnel(err: cleo_store::StoreError) -> CleoError {
    if let cleo_store::StoreError::Validation { message } = &err {
        if let Ok(inner) = serde_json::from_str::<CleoError>(message) {
            return inner;
        }
    }
    err.into()
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, CleoError> {
    serde_json::to_value(value).map_err(|e| CleoError::internal(format!("serialize: {e}")))
}
