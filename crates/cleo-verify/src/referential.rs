//! Layer 3: references. Everything that needs the current task set.

use cleo_core::graph::TaskGraph;
use cleo_core::ErrorCode;
use serde_json::Value;

use crate::context::{OperationContext, SnapshotView};
use crate::report::{LayerName, Violation};

/// Operations that cannot proceed without a `taskId` parameter.
const REQUIRE_TASK_ID: [&str; 3] = ["update", "complete", "delete"];

/// Operations whose target legitimately lives outside the live set:
/// `archive` must see an already-archived id (idempotent success) and
/// `restore` targets the archive. Their handlers resolve the id.
const LIVE_TARGET_EXEMPT: [&str; 2] = ["archive", "restore"];

pub(crate) fn check(ctx: &OperationContext<'_>, view: &SnapshotView<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();
    let params = ctx.params;

    let task_id = params.get("taskId").and_then(Value::as_str);

    if REQUIRE_TASK_ID.contains(&ctx.operation) && task_id.is_none() {
        violations.push(Violation::blocking(
            LayerName::Referential,
            Some("taskId"),
            ErrorCode::ValidationError,
            format!("Operation '{}' requires a taskId", ctx.operation),
        ));
    }

    if let Some(id) = task_id {
        if !LIVE_TARGET_EXEMPT.contains(&ctx.operation) && view.find(id).is_none() {
            violations.push(Violation::blocking(
                LayerName::Referential,
                Some("taskId"),
                ErrorCode::NotFound,
                format!("Task {id} not found"),
            ));
        }
    }

    let parent_id = params.get("parentId").and_then(Value::as_str);
    if let Some(pid) = parent_id {
        if view.find(pid).is_none() {
            violations.push(Violation::blocking(
                LayerName::Referential,
                Some("parentId"),
                ErrorCode::NotFound,
                format!("Parent task {pid} not found"),
            ));
        }
    }

    let depends: Vec<&str> = params
        .get("depends")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    for dep in &depends {
        if view.find(dep).is_none() {
            violations.push(Violation::blocking(
                LayerName::Referential,
                Some("depends"),
                ErrorCode::NotFound,
                format!("Dependency {dep} not found"),
            ));
        }
    }

    // Graph checks only make sense once the references themselves resolve.
    if !violations.is_empty() {
        return violations;
    }

    let graph = TaskGraph::build(view.tasks);

    // New edges must not close a cycle: an edge from x to t is cyclic iff
    // x is already reachable from t.
    if let Some(id) = task_id {
        for source in depends.iter().copied().chain(parent_id) {
            if graph.path_exists(id, source) {
                violations.push(Violation::blocking(
                    LayerName::Referential,
                    None,
                    ErrorCode::CircularReference,
                    format!("Linking {source} -> {id} would create a dependency cycle"),
                ));
            }
        }
    }

    // Hierarchy depth: the new child sits one below its parent.
    if let Some(pid) = parent_id {
        if let Some(parent_depth) = graph.depth_of(pid) {
            if parent_depth + 1 > view.max_depth as usize {
                violations.push(Violation::blocking(
                    LayerName::Referential,
                    Some("parentId"),
                    ErrorCode::ValidationError,
                    format!(
                        "Hierarchy depth limit is {} (epic > task > subtask); {pid} is already at depth {parent_depth}",
                        view.max_depth
                    ),
                ));
            }
        }

        // Sibling limit, only when configured.
        if view.max_siblings > 0 {
            let siblings = graph.children_of(pid).len();
            let moving_existing_child = task_id
                .map(|id| view.find(id).and_then(|t| t.parent_id.as_deref()) == Some(pid))
                .unwrap_or(false);
            if !moving_existing_child && siblings >= view.max_siblings as usize {
                violations.push(Violation::blocking(
                    LayerName::Referential,
                    Some("parentId"),
                    ErrorCode::ValidationError,
                    format!(
                        "Task {pid} already has {siblings} children (limit {})",
                        view.max_siblings
                    ),
                ));
            }
        }
    }

    violations
}
