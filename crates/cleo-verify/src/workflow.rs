//! The six-gate quality chain attached to every task.
//!
//! Gates run `implemented -> testsPassed -> qaPassed -> cleanupDone ->
//! securityPassed -> documented`; each depends on its predecessor. Failing
//! a gate resets everything downstream.

use chrono::Utc;
use cleo_core::task::{GateOutcome, GateSlot, VerificationRecord, WorkflowGateName};
use cleo_core::{CleoError, ErrorCode};
use serde_json::Value;

/// Tracker over a task's verification record. Wraps the persisted record;
/// converting to and from it is lossless.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowGateTracker {
    record: VerificationRecord,
}

impl WorkflowGateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deserialization tolerates missing keys: absent gates come back
    /// untouched (see the record's serde defaults).
    pub fn from_record(record: VerificationRecord) -> Self {
        Self { record }
    }

    pub fn to_record(&self) -> VerificationRecord {
        self.record.clone()
    }

    pub fn into_record(self) -> VerificationRecord {
        self.record
    }

    pub fn status(&self, gate: WorkflowGateName) -> Option<GateOutcome> {
        self.record.slot(gate).status
    }

    /// Pass a gate. Requires every predecessor to be `passed` and, when an
    /// agent is supplied, that it matches the gate's assigned role.
    pub fn pass(
        &mut self,
        gate: WorkflowGateName,
        agent: Option<&str>,
    ) -> Result<(), CleoError> {
        if let Some(agent) = agent {
            let assigned = gate.assigned_agent();
            if agent != assigned {
                return Err(CleoError::new(
                    ErrorCode::ValidationError,
                    format!(
                        "Gate '{gate}' is assigned to agent '{assigned}', not '{agent}'"
                    ),
                ));
            }
        }

        if let Some(unmet) = self.first_unmet_predecessor(gate) {
            return Err(CleoError::new(
                ErrorCode::VerificationLocked,
                format!("Gate '{gate}' is locked: predecessor '{unmet}' has not passed"),
            )
            .with_fix(format!("Pass gate '{unmet}' first")));
        }

        let slot = self.record.slot_mut(gate);
        slot.status = Some(GateOutcome::Passed);
        slot.failure_reason = None;
        slot.updated_at = Some(Utc::now());
        Ok(())
    }

    /// Fail a gate. Always allowed; every downstream gate is reset to its
    /// untouched state.
    pub fn fail(&mut self, gate: WorkflowGateName, reason: Option<&str>) {
        let slot = self.record.slot_mut(gate);
        slot.status = Some(GateOutcome::Failed);
        slot.failure_reason = reason.map(String::from);
        slot.updated_at = Some(Utc::now());

        for downstream in WorkflowGateName::ALL.iter().skip(gate.index() + 1) {
            *self.record.slot_mut(*downstream) = GateSlot::default();
        }
    }

    /// Recompute the `blocked` markers. A gate becomes `blocked` when its
    /// predecessor chain is not fully passed and it is not itself terminal;
    /// a previously blocked gate whose chain clears goes back to untouched.
    pub fn update_blocked(&mut self) {
        for gate in WorkflowGateName::ALL {
            let unmet = self.first_unmet_predecessor(gate).is_some();
            let slot = self.record.slot_mut(gate);
            match slot.status {
                Some(GateOutcome::Passed) | Some(GateOutcome::Failed) => {}
                _ => {
                    slot.status = if unmet { Some(GateOutcome::Blocked) } else { None };
                }
            }
        }
    }

    pub fn all_passed(&self) -> bool {
        WorkflowGateName::ALL
            .iter()
            .all(|g| self.record.slot(*g).status == Some(GateOutcome::Passed))
    }

    /// The first gate that is untouched and whose predecessors have all
    /// passed.
    pub fn next_attemptable(&self) -> Option<WorkflowGateName> {
        WorkflowGateName::ALL.iter().copied().find(|g| {
            self.record.slot(*g).status.is_none() && self.first_unmet_predecessor(*g).is_none()
        })
    }

    fn first_unmet_predecessor(&self, gate: WorkflowGateName) -> Option<WorkflowGateName> {
        WorkflowGateName::ALL
            .iter()
            .take(gate.index())
            .copied()
            .find(|g| self.record.slot(*g).status != Some(GateOutcome::Passed))
    }
}

/// Validate a `workflow.pass` / `workflow.fail` request against a task's
/// current record before it is applied.
pub fn validate_gate_request(
    operation: &str,
    params: &Value,
    record: &VerificationRecord,
) -> Result<WorkflowGateName, CleoError> {
    let gate_name = params
        .get("gate")
        .and_then(Value::as_str)
        .ok_or_else(|| CleoError::new(ErrorCode::ValidationError, "Missing 'gate' parameter"))?;

    let gate: WorkflowGateName = gate_name
        .parse()
        .map_err(|e: String| CleoError::new(ErrorCode::ValidationError, e))?;

    if let Some(status) = params.get("status").and_then(Value::as_str) {
        let valid = matches!(status, "null" | "passed" | "failed" | "blocked");
        if !valid {
            return Err(CleoError::new(
                ErrorCode::ValidationError,
                format!("Invalid gate status: '{status}'. Valid: null, passed, failed, blocked"),
            ));
        }
        if status == "blocked" {
            return Err(CleoError::new(
                ErrorCode::ValidationError,
                "Gate status 'blocked' is computed and cannot be written directly",
            ));
        }
    }

    if operation == "pass" {
        if let Some(agent) = params.get("agent").and_then(Value::as_str) {
            if agent != gate.assigned_agent() {
                return Err(CleoError::new(
                    ErrorCode::ValidationError,
                    format!(
                        "Gate '{gate}' is assigned to agent '{}', not '{agent}'",
                        gate.assigned_agent()
                    ),
                ));
            }
        }
        let tracker = WorkflowGateTracker::from_record(record.clone());
        if let Some(unmet) = tracker.first_unmet_predecessor(gate) {
            return Err(CleoError::new(
                ErrorCode::VerificationLocked,
                format!("Gate '{gate}' is locked: predecessor '{unmet}' has not passed"),
            ));
        }
    }

    Ok(gate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use WorkflowGateName::*;

    #[test]
    fn test_pass_in_order() {
        let mut tracker = WorkflowGateTracker::new();
        for gate in WorkflowGateName::ALL {
            tracker.pass(gate, None).unwrap();
        }
        assert!(tracker.all_passed());
        assert_eq!(tracker.next_attemptable(), None);
    }

    #[test]
    fn test_pass_with_unmet_predecessor_fails() {
        let mut tracker = WorkflowGateTracker::new();
        let err = tracker.pass(TestsPassed, None).unwrap_err();
        assert_eq!(err.code, ErrorCode::VerificationLocked);
        assert!(err.message.contains("implemented"));
        assert_eq!(tracker.status(TestsPassed), None);
    }

    #[test]
    fn test_pass_after_predecessor_succeeds() {
        let mut tracker = WorkflowGateTracker::new();
        tracker.pass(Implemented, None).unwrap();
        tracker.pass(TestsPassed, None).unwrap();
        assert_eq!(tracker.status(TestsPassed), Some(GateOutcome::Passed));
    }

    #[test]
    fn test_agent_role_checked() {
        let mut tracker = WorkflowGateTracker::new();
        let err = tracker.pass(Implemented, Some("qa")).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert!(tracker.pass(Implemented, Some("coder")).is_ok());
    }

    #[test]
    fn test_fail_cascade_resets_downstream() {
        let mut tracker = WorkflowGateTracker::new();
        // Pass the first five gates.
        for gate in [Implemented, TestsPassed, QaPassed, CleanupDone, SecurityPassed] {
            tracker.pass(gate, None).unwrap();
        }

        tracker.fail(TestsPassed, Some("flaky suite"));

        assert_eq!(tracker.status(Implemented), Some(GateOutcome::Passed));
        assert_eq!(tracker.status(TestsPassed), Some(GateOutcome::Failed));
        let record = tracker.to_record();
        assert_eq!(record.tests_passed.failure_reason.as_deref(), Some("flaky suite"));

        // Everything downstream is reset to untouched: no status, no
        // reason, no timestamp.
        for gate in [QaPassed, CleanupDone, SecurityPassed, Documented] {
            let slot = record.slot(gate);
            assert_eq!(slot.status, None, "{gate} after cascade");
            assert!(slot.failure_reason.is_none());
            assert!(slot.updated_at.is_none());
        }
    }

    #[test]
    fn test_fail_is_always_allowed() {
        let mut tracker = WorkflowGateTracker::new();
        tracker.fail(Documented, None);
        assert_eq!(tracker.status(Documented), Some(GateOutcome::Failed));
    }

    #[test]
    fn test_update_blocked_marks_and_clears() {
        let mut tracker = WorkflowGateTracker::new();
        tracker.fail(Implemented, Some("broken build"));

        // Blocked is computed, never written by the cascade itself.
        assert_eq!(tracker.status(TestsPassed), None);
        tracker.update_blocked();
        assert_eq!(tracker.status(TestsPassed), Some(GateOutcome::Blocked));
        assert_eq!(tracker.status(Documented), Some(GateOutcome::Blocked));

        // Re-pass the failed gate and recompute; downstream unblocks.
        tracker.pass(Implemented, None).unwrap();
        tracker.update_blocked();
        assert_eq!(tracker.status(TestsPassed), None);
        assert_eq!(tracker.next_attemptable(), Some(TestsPassed));
    }

    #[test]
    fn test_next_attemptable_walks_the_chain() {
        let mut tracker = WorkflowGateTracker::new();
        assert_eq!(tracker.next_attemptable(), Some(Implemented));
        tracker.pass(Implemented, None).unwrap();
        assert_eq!(tracker.next_attemptable(), Some(TestsPassed));
    }

    #[test]
    fn test_record_roundtrip_preserves_tracker() {
        let mut tracker = WorkflowGateTracker::new();
        tracker.pass(Implemented, None).unwrap();
        tracker.fail(TestsPassed, Some("regression"));

        let record = tracker.to_record();
        let text = serde_json::to_string(&record).unwrap();
        let back: VerificationRecord = serde_json::from_str(&text).unwrap();
        let restored = WorkflowGateTracker::from_record(back);
        assert_eq!(restored, tracker);
    }

    #[test]
    fn test_from_partial_record_tolerates_missing_keys() {
        let record: VerificationRecord =
            serde_json::from_str(r#"{"implemented": {"status": "passed"}}"#).unwrap();
        let tracker = WorkflowGateTracker::from_record(record);
        assert_eq!(tracker.status(Implemented), Some(GateOutcome::Passed));
        assert_eq!(tracker.status(Documented), None);
        assert_eq!(tracker.next_attemptable(), Some(TestsPassed));
    }

    #[test]
    fn test_validate_gate_request_pass() {
        let mut tracker = WorkflowGateTracker::new();
        tracker.pass(Implemented, None).unwrap();
        let record = tracker.to_record();

        let gate = validate_gate_request(
            "pass",
            &json!({"gate": "testsPassed", "agent": "testing"}),
            &record,
        )
        .unwrap();
        assert_eq!(gate, TestsPassed);
    }

    #[test]
    fn test_validate_gate_request_rejects_unknown_gate() {
        let record = VerificationRecord::default();
        let err = validate_gate_request("pass", &json!({"gate": "shipped"}), &record).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[test]
    fn test_validate_gate_request_rejects_wrong_agent() {
        let record = VerificationRecord::default();
        let err = validate_gate_request(
            "pass",
            &json!({"gate": "implemented", "agent": "docs"}),
            &record,
        )
        .unwrap_err();
        assert!(err.message.contains("coder"));
    }

    #[test]
    fn test_validate_gate_request_rejects_locked_gate() {
        let record = VerificationRecord::default();
        let err = validate_gate_request("pass", &json!({"gate": "qaPassed"}), &record).unwrap_err();
        assert_eq!(err.code, ErrorCode::VerificationLocked);
    }

    #[test]
    fn test_validate_gate_request_blocked_status_rejected() {
        let record = VerificationRecord::default();
        let err = validate_gate_request(
            "fail",
            &json!({"gate": "implemented", "status": "blocked"}),
            &record,
        )
        .unwrap_err();
        assert!(err.message.contains("computed"));
    }
}
