//! The four-layer verification gate.

use std::time::Instant;

use crate::context::{OperationContext, SnapshotView};
use crate::report::{GateReport, LayerName, LayerResult};
use crate::{protocol, referential, schema, semantic};

/// Runs schema, semantic, referential, then protocol — always in that
/// order. Strict mode (the only mode) stops at the first failed layer:
/// later layers are not run and are not reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerificationGate;

impl VerificationGate {
    pub fn new() -> Self {
        Self
    }

    pub fn run(&self, ctx: &OperationContext<'_>, view: &SnapshotView<'_>) -> GateReport {
        let mut layers = Vec::with_capacity(LayerName::ALL.len());
        let mut blocked_at = None;

        for layer in LayerName::ALL {
            let start = Instant::now();
            let result = match layer {
                LayerName::Schema => {
                    let violations = schema::check(ctx);
                    LayerResult::from_violations(layer, violations, ms_since(start))
                }
                LayerName::Semantic => {
                    let violations = semantic::check(ctx);
                    LayerResult::from_violations(layer, violations, ms_since(start))
                }
                LayerName::Referential => {
                    let violations = referential::check(ctx, view);
                    LayerResult::from_violations(layer, violations, ms_since(start))
                }
                LayerName::Protocol => match protocol::check(ctx) {
                    Some(violations) => {
                        LayerResult::from_violations(layer, violations, ms_since(start))
                    }
                    None => LayerResult::skipped(layer),
                },
            };

            let failed = result.status == crate::report::LayerStatus::Failed;
            layers.push(result);
            if failed {
                blocked_at = Some(layer);
                tracing::debug!(layer = %layer, "verification gate blocked");
                break;
            }
        }

        GateReport { layers, blocked_at }
    }
}

fn ms_since(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProtocolType;
    use crate::report::LayerStatus;
    use cleo_core::envelope::Gateway;
    use cleo_core::task::Task;
    use cleo_core::ErrorCode;
    use serde_json::{json, Value};

    fn ctx<'a>(operation: &'a str, params: &'a Value) -> OperationContext<'a> {
        OperationContext {
            domain: "tasks",
            operation,
            gateway: Gateway::Mutate,
            params,
            protocol_type: None,
        }
    }

    fn tasks() -> Vec<Task> {
        vec![Task::new(
            "T1",
            "Some valid title",
            "Some valid longer description",
        )]
    }

    #[test]
    fn test_all_layers_pass() {
        let tasks = tasks();
        let view = SnapshotView::new(&tasks);
        let params = json!({
            "title": "Design API",
            "description": "Write initial REST API specification",
        });
        let report = VerificationGate::new().run(&ctx("add", &params), &view);

        assert!(report.passed());
        assert_eq!(report.layers.len(), 4);
        assert_eq!(report.layers[3].status, LayerStatus::Skipped);
    }

    #[test]
    fn test_stops_at_first_failed_layer() {
        let tasks = tasks();
        let view = SnapshotView::new(&tasks);
        // Schema failure (bad id) AND a would-be referential failure; only
        // schema may be reported.
        let params = json!({"taskId": "bogus", "depends": ["T99"]});
        let report = VerificationGate::new().run(&ctx("update", &params), &view);

        assert_eq!(report.blocked_at, Some(LayerName::Schema));
        assert_eq!(report.layers.len(), 1);
    }

    #[test]
    fn test_semantic_failure_reports_schema_passed() {
        let tasks = tasks();
        let view = SnapshotView::new(&tasks);
        let params = json!({
            "title": "Exactly the same",
            "description": "Exactly the same",
        });
        let report = VerificationGate::new().run(&ctx("add", &params), &view);

        assert_eq!(report.blocked_at, Some(LayerName::Semantic));
        assert_eq!(report.layers.len(), 2);
        assert_eq!(report.layers[0].status, LayerStatus::Passed);
        // Title of 16 chars and description of 16 chars both pass schema,
        // so the equality check is what blocked.
        let err = report.into_error().unwrap();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[test]
    fn test_referential_not_found_exit_code() {
        let tasks = tasks();
        let view = SnapshotView::new(&tasks);
        let params = json!({"taskId": "T42"});
        let report = VerificationGate::new().run(&ctx("complete", &params), &view);

        assert_eq!(report.blocked_at, Some(LayerName::Referential));
        let err = report.into_error().unwrap();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_protocol_layer_runs_when_typed() {
        let tasks = tasks();
        let view = SnapshotView::new(&tasks);
        // The id is well-formed (so schema passes); the rest of the
        // contract is missing, which is the protocol layer's to report.
        let params = json!({"manifest": {"id": "T123-api-design"}});
        let ctx = OperationContext {
            domain: "memory",
            operation: "manifest.append",
            gateway: Gateway::Mutate,
            params: &params,
            protocol_type: Some(ProtocolType::Research),
        };
        let report = VerificationGate::new().run(&ctx, &view);

        assert_eq!(report.blocked_at, Some(LayerName::Protocol));
        let err = report.into_error().unwrap();
        assert_eq!(err.code, ErrorCode::ProtocolResearch);
        assert_eq!(err.exit_code(), 60);
    }

    #[test]
    fn test_warnings_survive_a_passing_run() {
        let tasks = tasks();
        let view = SnapshotView::new(&tasks);
        let params = json!({"taskId": "T1"});
        let report = VerificationGate::new().run(&ctx("complete", &params), &view);

        assert!(report.passed());
        assert_eq!(report.warnings().len(), 1);
    }
}
