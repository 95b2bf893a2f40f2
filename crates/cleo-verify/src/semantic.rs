//! Layer 2: meaning. Cross-field rules that are still local to the request.

use cleo_core::ErrorCode;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::context::OperationContext;
use crate::report::{LayerName, Violation};

pub(crate) fn scope_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z]+:.+$").expect("valid pattern"))
}

pub(crate) fn check(ctx: &OperationContext<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();
    let params = ctx.params;

    // Title and description must differ character-for-character after trim.
    if let (Some(title), Some(description)) = (
        params.get("title").and_then(Value::as_str),
        params.get("description").and_then(Value::as_str),
    ) {
        if title.trim() == description.trim() {
            violations.push(Violation::blocking(
                LayerName::Semantic,
                Some("description"),
                ErrorCode::ValidationError,
                "Description must differ from title",
            ));
        }
    }

    // No self-dependency.
    if let (Some(task_id), Some(depends)) = (
        params.get("taskId").and_then(Value::as_str),
        params.get("depends").and_then(Value::as_array),
    ) {
        if depends.iter().any(|d| d.as_str() == Some(task_id)) {
            violations.push(Violation::blocking(
                LayerName::Semantic,
                Some("depends"),
                ErrorCode::ValidationError,
                format!("Task {task_id} cannot depend on itself"),
            ));
        }
    }

    // Session scope shape.
    if let Some(scope) = params.get("scope") {
        let ok = scope
            .as_str()
            .map(|s| scope_re().is_match(s))
            .unwrap_or(false);
        if !ok {
            violations.push(Violation::blocking(
                LayerName::Semantic,
                Some("scope"),
                ErrorCode::ValidationError,
                format!("Invalid scope: {scope}. Expected: <kind>:<subject>, e.g. epic:T12"),
            ));
        }
    }

    // No future timestamps.
    let now = chrono::Utc::now();
    for field in ["created", "updated", "date"] {
        if let Some(text) = params.get(field).and_then(Value::as_str) {
            if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(text) {
                if ts.with_timezone(&chrono::Utc) > now {
                    violations.push(Violation::blocking(
                        LayerName::Semantic,
                        Some(field),
                        ErrorCode::ValidationError,
                        format!("Field '{field}' must not be in the future"),
                    ));
                }
            }
        }
    }

    // Completing without leaving a note is legal but worth flagging.
    if ctx.operation == "complete" {
        let has_notes = params
            .get("notes")
            .and_then(Value::as_str)
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false);
        if !has_notes {
            violations.push(Violation::warning(
                LayerName::Semantic,
                Some("notes"),
                "Completing without notes; consider recording what was done",
            ));
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use cleo_core::envelope::Gateway;
    use serde_json::json;

    fn ctx<'a>(operation: &'a str, params: &'a Value) -> OperationContext<'a> {
        OperationContext {
            domain: "tasks",
            operation,
            gateway: Gateway::Mutate,
            params,
            protocol_type: None,
        }
    }

    #[test]
    fn test_title_equal_description_blocked() {
        let params = json!({
            "title": "Design the API",
            "description": "  Design the API  ",
        });
        let violations = check(&ctx("add", &params));
        assert_eq!(violations.len(), 1);
        assert!(violations[0].blocking);
    }

    #[test]
    fn test_distinct_title_description_pass() {
        let params = json!({
            "title": "Design the API",
            "description": "Write the REST API specification document",
        });
        assert!(check(&ctx("add", &params)).is_empty());
    }

    #[test]
    fn test_self_dependency_blocked() {
        let params = json!({"taskId": "T3", "depends": ["T1", "T3"]});
        let violations = check(&ctx("update", &params));
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("T3"));
    }

    #[test]
    fn test_scope_pattern() {
        assert!(check(&ctx("start", &json!({"scope": "epic:T1234"}))).is_empty());
        assert!(check(&ctx("start", &json!({"scope": "feature:auth flow"}))).is_empty());
        assert_eq!(check(&ctx("start", &json!({"scope": "Epic:T1"}))).len(), 1);
        assert_eq!(check(&ctx("start", &json!({"scope": "epic"}))).len(), 1);
        assert_eq!(check(&ctx("start", &json!({"scope": ":T1"}))).len(), 1);
    }

    #[test]
    fn test_future_timestamp_blocked() {
        let future = (chrono::Utc::now() + chrono::Duration::hours(2)).to_rfc3339();
        let violations = check(&ctx("update", &json!({"updated": future})));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field.as_deref(), Some("updated"));
    }

    #[test]
    fn test_past_timestamp_passes() {
        let past = (chrono::Utc::now() - chrono::Duration::hours(2)).to_rfc3339();
        assert!(check(&ctx("update", &json!({"created": past}))).is_empty());
    }

    #[test]
    fn test_complete_without_notes_warns_only() {
        let violations = check(&ctx("complete", &json!({"taskId": "T1"})));
        assert_eq!(violations.len(), 1);
        assert!(!violations[0].blocking);
    }

    #[test]
    fn test_complete_with_notes_no_warning() {
        let params = json!({"taskId": "T1", "notes": "wired up and tested"});
        assert!(check(&ctx("complete", &params)).is_empty());
    }
}
