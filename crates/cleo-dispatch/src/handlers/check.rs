//! The `check` domain: compliance records and test-run bookkeeping.

use chrono::{DateTime, Utc};
use cleo_core::{CleoError, ErrorCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{dry_run, opt_str, req_str, side, unknown_operation, HandlerCx, HandlerOutcome};

const CHECKS_FILE: &str = "checks.json";

/// `.cleo/checks.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChecksDocument {
    #[serde(default)]
    compliance: Vec<ComplianceRecord>,
    #[serde(default)]
    test_runs: Vec<TestRun>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComplianceRecord {
    ts: DateTime<Utc>,
    rule: String,
    status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestRun {
    ts: DateTime<Utc>,
    job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    suite: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    task_id: Option<String>,
}

pub fn handle(
    cx: &HandlerCx<'_>,
    operation: &str,
    params: &Value,
) -> Result<HandlerOutcome, CleoError> {
    match operation {
        "compliance.record" => compliance_record(cx, params),
        "test.run" => test_run(cx, params),
        other => Err(unknown_operation("check", other)),
    }
}

fn compliance_record(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let rule = req_str(params, "rule")?.to_string();
    let status = req_str(params, "status")?;
    if !matches!(status, "pass" | "fail" | "waived") {
        return Err(CleoError::new(
            ErrorCode::ValidationError,
            format!("Invalid compliance status: '{status}'. Valid: pass, fail, waived"),
        ));
    }
    let task_id = opt_str(params, "taskId").map(String::from);

    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true})));
    }

    let status = status.to_string();
    let record_task = task_id.clone();
    let count = side::update(cx.store, CHECKS_FILE, |doc: &mut ChecksDocument| {
        doc.compliance.push(ComplianceRecord {
            ts: Utc::now(),
            rule,
            status,
            task_id,
            details: params.get("details").cloned(),
        });
        Ok(doc.compliance.len())
    })?;

    let mut outcome = HandlerOutcome::new(json!({"recorded": true, "compliance": count}));
    if let Some(id) = record_task {
        outcome = outcome.with_task(id);
    }
    Ok(outcome)
}

/// Register a test run with the background job registry and record it.
/// Actually executing a suite belongs to the caller; the core only tracks
/// the run.
fn test_run(cx: &HandlerCx<'_>, params: &Value) -> Result<HandlerOutcome, CleoError> {
    let suite = opt_str(params, "suite").map(String::from);
    let task_id = opt_str(params, "taskId").map(String::from);

    if dry_run(params) {
        return Ok(HandlerOutcome::new(json!({"dryRun": true})));
    }

    let job_id = cx.jobs.submit().ok_or_else(|| {
        CleoError::validation("Background job limit reached; cancel or wait for a running job")
            .with_fix("cleo admin job-cancel --job <id>".to_string())
    })?;

    let record_task = task_id.clone();
    side::update(cx.store, CHECKS_FILE, |doc: &mut ChecksDocument| {
        doc.test_runs.push(TestRun {
            ts: Utc::now(),
            job_id: job_id.clone(),
            suite: suite.clone(),
            task_id,
        });
        Ok(())
    })?;

    let mut outcome = HandlerOutcome::new(json!({"jobId": job_id, "status": "running"}));
    if let Some(id) = record_task {
        outcome = outcome.with_task(id);
    }
    Ok(outcome)
}
