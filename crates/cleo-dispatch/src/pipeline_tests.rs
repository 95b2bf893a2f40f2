//! End-to-end tests through `dispatch()`: the full middleware chain, the
//! handlers, and the store on a temp project.

use cleo_config::config::{Config, StorageEngine};
use cleo_config::paths::ProjectPaths;
use cleo_core::envelope::{DispatchRequest, DispatchResponse, Gateway, Source};
use cleo_core::ErrorCode;
use cleo_store::Store;
use serde_json::{json, Value};
use tempfile::tempdir;

use crate::pipeline::Dispatcher;

fn dispatcher(dir: &std::path::Path) -> Dispatcher {
    let paths = ProjectPaths::with_data_dir(dir.to_path_buf(), dir.join(".cleo"));
    let store = Store::open(paths, StorageEngine::Json);
    store.init().unwrap();
    Dispatcher::from_parts(store, Config::default())
}

async fn call(
    dispatcher: &Dispatcher,
    gateway: Gateway,
    domain: &str,
    operation: &str,
    params: Value,
) -> DispatchResponse {
    dispatcher
        .dispatch(DispatchRequest::new(gateway, domain, operation, params, Source::Cli))
        .await
}

async fn mcp_call(
    dispatcher: &Dispatcher,
    gateway: Gateway,
    domain: &str,
    operation: &str,
    params: Value,
) -> DispatchResponse {
    dispatcher
        .dispatch(DispatchRequest::new(gateway, domain, operation, params, Source::Mcp))
        .await
}

async fn add_task(dispatcher: &Dispatcher, title: &str, description: &str) -> String {
    let resp = call(
        dispatcher,
        Gateway::Mutate,
        "tasks",
        "add",
        json!({"title": title, "description": description}),
    )
    .await;
    assert!(resp.success, "add failed: {:?}", resp.error);
    resp.data.unwrap()["id"].as_str().unwrap().to_string()
}

// ── Fresh project ───────────────────────────────────────────────────

#[tokio::test]
async fn test_fresh_project_add_and_show() {
    let dir = tempdir().unwrap();
    let d = dispatcher(dir.path());

    let resp = call(&d, Gateway::Mutate, "admin", "init", json!({"name": "proj"})).await;
    // The store was initialized when the dispatcher opened; init reports
    // the idempotent outcome.
    assert!(resp.success);

    let resp = call(
        &d,
        Gateway::Mutate,
        "tasks",
        "add",
        json!({"title": "Design API", "description": "Write initial REST API specification"}),
    )
    .await;
    assert!(resp.success);
    let data = resp.data.unwrap();
    assert_eq!(data["id"], "T1");
    assert_eq!(data["status"], "pending");

    let resp = call(&d, Gateway::Query, "tasks", "show", json!({"taskId": "T1"})).await;
    assert!(resp.success);
    assert_eq!(resp.data.unwrap()["title"], "Design API");
}

// ── Cycle rejection ─────────────────────────────────────────────────

#[tokio::test]
async fn test_cycle_rejected_without_mutation() {
    let dir = tempdir().unwrap();
    let d = dispatcher(dir.path());

    let t1 = add_task(&d, "First task title", "A perfectly valid description").await;
    let resp = call(
        &d,
        Gateway::Mutate,
        "tasks",
        "add",
        json!({
            "title": "Second task title",
            "description": "Another perfectly valid description",
            "depends": [t1],
        }),
    )
    .await;
    let t2 = resp.data.unwrap()["id"].as_str().unwrap().to_string();

    let resp = call(
        &d,
        Gateway::Mutate,
        "tasks",
        "update",
        json!({"taskId": t1, "depends": [t2]}),
    )
    .await;
    assert!(!resp.success);
    assert_eq!(resp.error.unwrap().code, ErrorCode::CircularReference);

    // The store did not change.
    let resp = call(&d, Gateway::Query, "tasks", "show", json!({"taskId": t1})).await;
    let data = resp.data.unwrap();
    assert!(data.get("depends").is_none(), "T1 must have no dependencies");
}

// ── Workflow cascade ────────────────────────────────────────────────

#[tokio::test]
async fn test_workflow_cascade_through_dispatch() {
    let dir = tempdir().unwrap();
    let d = dispatcher(dir.path());
    let t1 = add_task(&d, "Gated task title", "A task that walks the gate chain").await;

    for gate in ["implemented", "testsPassed", "qaPassed", "cleanupDone", "securityPassed"] {
        let resp = call(
            &d,
            Gateway::Mutate,
            "tasks",
            "workflow.pass",
            json!({"taskId": t1, "gate": gate}),
        )
        .await;
        assert!(resp.success, "pass {gate} failed: {:?}", resp.error);
    }

    let resp = call(
        &d,
        Gateway::Mutate,
        "tasks",
        "workflow.fail",
        json!({"taskId": t1, "gate": "testsPassed", "reason": "flaky suite"}),
    )
    .await;
    assert!(resp.success);

    let resp = call(&d, Gateway::Query, "tasks", "show", json!({"taskId": t1})).await;
    let verification = &resp.data.unwrap()["verification"];
    assert_eq!(verification["implemented"]["status"], "passed");
    assert_eq!(verification["testsPassed"]["status"], "failed");
    for gate in ["qaPassed", "cleanupDone", "securityPassed", "documented"] {
        assert!(
            verification[gate]["status"].is_null(),
            "{gate} must be reset to null, got {}",
            verification[gate]["status"]
        );
    }
}

#[tokio::test]
async fn test_workflow_pass_out_of_order_is_locked() {
    let dir = tempdir().unwrap();
    let d = dispatcher(dir.path());
    let t1 = add_task(&d, "Gated task title", "A task that walks the gate chain").await;

    let resp = call(
        &d,
        Gateway::Mutate,
        "tasks",
        "workflow.pass",
        json!({"taskId": t1, "gate": "qaPassed"}),
    )
    .await;
    assert!(!resp.success);
    assert_eq!(resp.error.unwrap().code, ErrorCode::VerificationLocked);
}

// ── Idempotency ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_complete_twice_idempotent_exit() {
    let dir = tempdir().unwrap();
    let d = dispatcher(dir.path());
    let t1 = add_task(&d, "Completable title", "Something that will be completed").await;

    let first = call(
        &d,
        Gateway::Mutate,
        "tasks",
        "complete",
        json!({"taskId": t1, "notes": "done and dusted"}),
    )
    .await;
    assert!(first.success);
    assert_eq!(first.exit_code, 0);
    let completed_at = first.data.unwrap()["completedAt"].clone();
    assert!(!completed_at.is_null());

    let second = call(
        &d,
        Gateway::Mutate,
        "tasks",
        "complete",
        json!({"taskId": t1, "notes": "again"}),
    )
    .await;
    assert!(second.success);
    assert_eq!(second.exit_code, 100);
    assert_eq!(second.data.unwrap()["completedAt"], completed_at);
}

#[tokio::test]
async fn test_session_end_idempotent() {
    let dir = tempdir().unwrap();
    let d = dispatcher(dir.path());

    let resp = call(
        &d,
        Gateway::Mutate,
        "session",
        "start",
        json!({"scope": "epic:T1"}),
    )
    .await;
    assert!(resp.success, "{:?}", resp.error);

    let first = call(&d, Gateway::Mutate, "session", "end", json!({})).await;
    assert!(first.success);
    assert_eq!(first.exit_code, 0);

    let second = call(&d, Gateway::Mutate, "session", "end", json!({})).await;
    assert!(second.success);
    assert_eq!(second.exit_code, 102);
}

// ── Archive / restore round trip ────────────────────────────────────

#[tokio::test]
async fn test_archive_restore_preserves_fields() {
    let dir = tempdir().unwrap();
    let d = dispatcher(dir.path());
    let t1 = add_task(&d, "Archivable title", "A task that takes a round trip").await;
    call(
        &d,
        Gateway::Mutate,
        "tasks",
        "update",
        json!({"taskId": t1, "priority": "high", "labels": ["keeper"]}),
    )
    .await;

    let before = call(&d, Gateway::Query, "tasks", "show", json!({"taskId": t1}))
        .await
        .data
        .unwrap();

    let resp = call(
        &d,
        Gateway::Mutate,
        "tasks",
        "archive",
        json!({"taskId": t1, "reason": "cleanup"}),
    )
    .await;
    assert!(resp.success, "{:?}", resp.error);

    // Archiving twice is the idempotent outcome.
    let again = call(&d, Gateway::Mutate, "tasks", "archive", json!({"taskId": t1})).await;
    assert!(again.success);
    assert_eq!(again.exit_code, 101);

    let resp = call(&d, Gateway::Mutate, "tasks", "restore", json!({"taskId": t1})).await;
    assert!(resp.success, "{:?}", resp.error);

    let mut after = call(&d, Gateway::Query, "tasks", "show", json!({"taskId": t1}))
        .await
        .data
        .unwrap();
    let mut expected = before.clone();
    // Everything except `updated` must be byte-equal.
    after.as_object_mut().unwrap().remove("updated");
    expected.as_object_mut().unwrap().remove("updated");
    assert_eq!(after, expected);
}

// ── Alias fidelity ──────────────────────────────────────────────────

#[tokio::test]
async fn test_reopen_and_restore_stay_distinct() {
    let dir = tempdir().unwrap();
    let d = dispatcher(dir.path());
    let t1 = add_task(&d, "Reopenable title", "A task that will be reopened").await;
    call(&d, Gateway::Mutate, "tasks", "complete", json!({"taskId": t1})).await;

    let resp = mcp_call(&d, Gateway::Mutate, "tasks", "reopen", json!({"taskId": t1})).await;
    assert!(resp.success, "{:?}", resp.error);
    assert_eq!(resp.meta.operation, "reopen");
    let data = resp.data.unwrap();
    assert_eq!(data["status"], "pending");
    assert!(data.get("completedAt").is_none());

    // restore is a different operation end to end.
    let t2 = add_task(&d, "Archive me title", "A task destined for the archive").await;
    call(&d, Gateway::Mutate, "tasks", "archive", json!({"taskId": t2})).await;
    let resp = mcp_call(&d, Gateway::Mutate, "tasks", "restore", json!({"taskId": t2})).await;
    assert!(resp.success);
    assert_eq!(resp.meta.operation, "restore");
}

#[tokio::test]
async fn test_legacy_domain_normalized_in_meta() {
    let dir = tempdir().unwrap();
    let d = dispatcher(dir.path());

    let resp = mcp_call(
        &d,
        Gateway::Mutate,
        "research",
        "inject",
        json!({"content": "observed flaky behavior in CI"}),
    )
    .await;
    assert!(resp.success, "{:?}", resp.error);
    assert_eq!(resp.meta.domain, "memory");
    assert_eq!(resp.meta.operation, "inject");

    let resp = mcp_call(
        &d,
        Gateway::Mutate,
        "system",
        "config.set",
        json!({"key": "logging.level", "value": "debug"}),
    )
    .await;
    assert!(resp.success, "{:?}", resp.error);
    assert_eq!(resp.meta.domain, "admin");
}

// ── Tier projection ─────────────────────────────────────────────────

#[tokio::test]
async fn test_mcp_list_defaults_to_compact() {
    let dir = tempdir().unwrap();
    let d = dispatcher(dir.path());
    add_task(&d, "Compact list title", "The listing should compact this").await;

    let resp = mcp_call(&d, Gateway::Query, "tasks", "list", json!({})).await;
    let data = resp.data.unwrap();
    assert_eq!(data["compact"], true);
    // Compact rows carry only the projection fields.
    assert!(data["tasks"][0].get("description").is_none());

    let resp = call(&d, Gateway::Query, "tasks", "list", json!({})).await;
    let data = resp.data.unwrap();
    assert_eq!(data["compact"], false);
    assert!(data["tasks"][0].get("description").is_some());
}

#[tokio::test]
async fn test_minimal_tier_blocks_orchestrate() {
    let dir = tempdir().unwrap();
    let d = dispatcher(dir.path());

    let resp = mcp_call(
        &d,
        Gateway::Mutate,
        "orchestrate",
        "start",
        json!({"taskId": "T1", "_mviTier": "minimal"}),
    )
    .await;
    assert!(!resp.success);
    assert_eq!(resp.error.unwrap().code, ErrorCode::InvalidOperation);
}

#[tokio::test]
async fn test_standard_tier_blocks_nexus() {
    let dir = tempdir().unwrap();
    let d = dispatcher(dir.path());

    let resp = mcp_call(&d, Gateway::Query, "nexus", "anything", json!({})).await;
    assert!(!resp.success);
    assert_eq!(resp.error.unwrap().code, ErrorCode::InvalidOperation);

    // At the orchestrator tier the domain resolves, and reports itself as
    // a placeholder.
    let resp = mcp_call(
        &d,
        Gateway::Query,
        "nexus",
        "anything",
        json!({"_mviTier": "orchestrator"}),
    )
    .await;
    assert!(!resp.success);
    assert_eq!(resp.error.unwrap().code, ErrorCode::NotImplemented);
}

// ── Validation / routing errors ─────────────────────────────────────

#[tokio::test]
async fn test_unknown_domain_with_alternatives() {
    let dir = tempdir().unwrap();
    let d = dispatcher(dir.path());

    let resp = call(&d, Gateway::Query, "taks", "list", json!({})).await;
    assert!(!resp.success);
    let error = resp.error.unwrap();
    assert_eq!(error.code, ErrorCode::InvalidDomain);
    assert_eq!(error.exit_code, 2);
    assert!(error.alternatives.unwrap().contains(&"tasks".to_string()));
}

#[tokio::test]
async fn test_unknown_operation_with_alternatives() {
    let dir = tempdir().unwrap();
    let d = dispatcher(dir.path());

    let resp = call(&d, Gateway::Query, "tasks", "explode", json!({})).await;
    assert!(!resp.success);
    let error = resp.error.unwrap();
    assert_eq!(error.code, ErrorCode::InvalidOperation);
    assert!(error.alternatives.unwrap().contains(&"list".to_string()));
}

#[tokio::test]
async fn test_missing_required_param_gets_fix() {
    let dir = tempdir().unwrap();
    let d = dispatcher(dir.path());

    let resp = call(&d, Gateway::Mutate, "tasks", "add", json!({"title": "Only a title"})).await;
    assert!(!resp.success);
    let error = resp.error.unwrap();
    assert_eq!(error.code, ErrorCode::ValidationFailed);
    assert!(error.message.contains("description"));
    assert!(error.fix.is_some());
}

#[tokio::test]
async fn test_gateway_mismatch_rejected() {
    let dir = tempdir().unwrap();
    let d = dispatcher(dir.path());

    let resp = call(
        &d,
        Gateway::Query,
        "tasks",
        "add",
        json!({"title": "Valid title here", "description": "Valid description here"}),
    )
    .await;
    assert!(!resp.success);
    assert_eq!(resp.error.unwrap().code, ErrorCode::InvalidOperation);
}

#[tokio::test]
async fn test_description_over_limit_blocked_by_gate() {
    let dir = tempdir().unwrap();
    let d = dispatcher(dir.path());

    let resp = call(
        &d,
        Gateway::Mutate,
        "tasks",
        "add",
        json!({"title": "Boundary title", "description": "d".repeat(1001)}),
    )
    .await;
    assert!(!resp.success);
    let error = resp.error.unwrap();
    assert_eq!(error.code, ErrorCode::ValidationError);
    assert_eq!(error.exit_code, 6);
}

// ── Audit trail ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_audit_records_start_and_finish_in_order() {
    let dir = tempdir().unwrap();
    let d = dispatcher(dir.path());
    let t1 = add_task(&d, "Audited task title", "A task whose trail we inspect").await;
    call(&d, Gateway::Mutate, "tasks", "complete", json!({"taskId": t1})).await;

    let audit = d.store().load_audit().unwrap();
    assert!(audit.entries.len() >= 4, "start+finish per dispatch");

    for pair in audit.entries.windows(2) {
        assert!(pair[0].ts <= pair[1].ts, "audit timestamps must not decrease");
    }

    let finish = audit
        .entries
        .iter()
        .rfind(|e| e.action == "dispatch.finish" && e.operation == "complete")
        .unwrap();
    assert_eq!(finish.task_id.as_deref(), Some(t1.as_str()));
    assert_eq!(finish.exit_code, 0);
}

// ── Migration data-loss guard through admin ─────────────────────────

#[tokio::test]
async fn test_admin_migrate_data_loss_guard() {
    let dir = tempdir().unwrap();
    let d = dispatcher(dir.path());
    add_task(&d, "Persisted task title", "This task reaches the database").await;

    // Build a populated database out of the current JSON state.
    cleo_store::migrate::json_to_sqlite(d.store().paths()).unwrap();

    // Wipe the JSON source, then ask for the same migration again.
    cleo_store::atomic::write_json(
        &d.store().paths().todo(),
        &cleo_store::TasksDocument::default(),
    )
    .unwrap();

    let resp = call(&d, Gateway::Mutate, "admin", "migrate", json!({"to": "sqlite"})).await;
    assert!(!resp.success);
    let error = resp.error.unwrap();
    assert_eq!(error.code, ErrorCode::ValidationError);
    assert!(error.message.contains("data loss"));

    // The database still holds the task.
    let paths = d.store().paths().clone();
    let sqlite_store = Store::open(paths, StorageEngine::Sqlite);
    assert_eq!(sqlite_store.load_tasks().unwrap().tasks.len(), 1);
}

// ── Sessions through dispatch ───────────────────────────────────────

#[tokio::test]
async fn test_second_session_start_rejected() {
    let dir = tempdir().unwrap();
    let d = dispatcher(dir.path());

    let resp = call(&d, Gateway::Mutate, "session", "start", json!({"scope": "epic:T1"})).await;
    assert!(resp.success);

    let resp = call(&d, Gateway::Mutate, "session", "start", json!({"scope": "epic:T2"})).await;
    assert!(!resp.success);
    let error = resp.error.unwrap();
    assert_eq!(error.code, ErrorCode::ValidationError);
    assert!(error.fix.is_some());
}

#[tokio::test]
async fn test_bad_scope_blocked_by_semantic_layer() {
    let dir = tempdir().unwrap();
    let d = dispatcher(dir.path());

    let resp = call(&d, Gateway::Mutate, "session", "start", json!({"scope": "Epic-T1"})).await;
    assert!(!resp.success);
    assert_eq!(resp.error.unwrap().code, ErrorCode::ValidationError);
}

// ── Orchestration spawn ─────────────────────────────────────────────

#[tokio::test]
async fn test_spawn_produces_resolved_prompt() {
    let dir = tempdir().unwrap();
    let d = dispatcher(dir.path());
    let t1 = add_task(
        &d,
        "Investigate cache misses",
        "Track down why the hot path misses its cache",
    )
    .await;
    call(&d, Gateway::Mutate, "session", "start", json!({"scope": "task:T1"})).await;

    let resp = call(&d, Gateway::Mutate, "orchestrate", "spawn", json!({"taskId": t1})).await;
    assert!(resp.success, "{:?}", resp.error);
    let data = resp.data.unwrap();

    // "investigate" routes to the research skill.
    assert_eq!(data["skill"], "ct-researcher");
    assert_eq!(data["tokenResolution"]["fullyResolved"], true);
    let prompt = data["prompt"].as_str().unwrap();
    assert!(prompt.contains("Investigate cache misses"));
    assert!(prompt.starts_with("# Subagent protocol"));
}

// ── Policy knobs ────────────────────────────────────────────────────

#[tokio::test]
async fn test_strict_session_enforcement_blocks_task_mutations() {
    let dir = tempdir().unwrap();
    let paths = ProjectPaths::with_data_dir(dir.path().to_path_buf(), dir.path().join(".cleo"));
    let store = Store::open(paths, StorageEngine::Json);
    store.init().unwrap();
    let mut config = Config::default();
    config.set("session.enforcement", "strict").unwrap();
    let d = Dispatcher::from_parts(store, config);

    let resp = call(
        &d,
        Gateway::Mutate,
        "tasks",
        "add",
        json!({"title": "Needs a session", "description": "Strict mode wants a session first"}),
    )
    .await;
    assert!(!resp.success);
    let error = resp.error.unwrap();
    assert_eq!(error.code, ErrorCode::ValidationError);
    assert!(error.message.contains("session"));

    // With a session active the same mutation goes through.
    call(&d, Gateway::Mutate, "session", "start", json!({"scope": "epic:T1"})).await;
    let resp = call(
        &d,
        Gateway::Mutate,
        "tasks",
        "add",
        json!({"title": "Needs a session", "description": "Strict mode wants a session first"}),
    )
    .await;
    assert!(resp.success, "{:?}", resp.error);
}

#[tokio::test]
async fn test_require_notes_on_complete() {
    let dir = tempdir().unwrap();
    let paths = ProjectPaths::with_data_dir(dir.path().to_path_buf(), dir.path().join(".cleo"));
    let store = Store::open(paths, StorageEngine::Json);
    store.init().unwrap();
    let mut config = Config::default();
    config.set("session.requireNotesOnComplete", "true").unwrap();
    let d = Dispatcher::from_parts(store, config);

    let t1 = add_task(&d, "Noteworthy task", "Completion must carry a note here").await;

    let resp = call(&d, Gateway::Mutate, "tasks", "complete", json!({"taskId": t1})).await;
    assert!(!resp.success);
    assert!(resp.error.unwrap().message.contains("notes"));

    let resp = call(
        &d,
        Gateway::Mutate,
        "tasks",
        "complete",
        json!({"taskId": t1, "notes": "wired and verified"}),
    )
    .await;
    assert!(resp.success, "{:?}", resp.error);
}

#[tokio::test]
async fn test_cancellation_requires_reason_when_configured() {
    let dir = tempdir().unwrap();
    let paths = ProjectPaths::with_data_dir(dir.path().to_path_buf(), dir.path().join(".cleo"));
    let store = Store::open(paths, StorageEngine::Json);
    store.init().unwrap();
    let mut config = Config::default();
    config.set("cancellation.requireReason", "true").unwrap();
    let d = Dispatcher::from_parts(store, config);

    let t1 = add_task(&d, "Cancellable task", "This one will be cancelled with cause").await;

    let resp = call(
        &d,
        Gateway::Mutate,
        "tasks",
        "update",
        json!({"taskId": t1, "status": "cancelled"}),
    )
    .await;
    assert!(!resp.success);

    let resp = call(
        &d,
        Gateway::Mutate,
        "tasks",
        "update",
        json!({"taskId": t1, "status": "cancelled", "reason": "superseded by T9"}),
    )
    .await;
    assert!(resp.success, "{:?}", resp.error);
}

// ── Dry run ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_dry_run_does_not_mutate() {
    let dir = tempdir().unwrap();
    let d = dispatcher(dir.path());

    let resp = call(
        &d,
        Gateway::Mutate,
        "tasks",
        "add",
        json!({
            "title": "Dry run title",
            "description": "This one must not be written",
            "dryRun": true,
        }),
    )
    .await;
    assert!(resp.success);
    assert_eq!(resp.data.unwrap()["dryRun"], true);

    let resp = call(&d, Gateway::Query, "tasks", "list", json!({})).await;
    assert_eq!(resp.data.unwrap()["count"], 0);
}
