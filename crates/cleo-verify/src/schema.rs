//! Layer 1: shapes. Types, enums, patterns, lengths, ranges.

use cleo_core::task::{
    Priority, TaskStatus, TaskType, DESCRIPTION_MAX, DESCRIPTION_MIN, TITLE_MAX, TITLE_MIN,
};
use cleo_core::ErrorCode;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::context::OperationContext;
use crate::report::{LayerName, Violation};

pub(crate) fn task_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^T[0-9]+$").expect("valid pattern"))
}

pub(crate) fn manifest_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^T\d{3,}-[a-z0-9-]+$").expect("valid pattern"))
}

const AGENT_TYPES: [&str; 4] = ["research", "implementation", "testing", "validation"];

pub(crate) fn check(ctx: &OperationContext<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();
    let params = ctx.params;

    for field in ["taskId", "parentId"] {
        if let Some(value) = params.get(field) {
            check_task_id(field, value, &mut violations);
        }
    }

    if let Some(depends) = params.get("depends") {
        match depends.as_array() {
            Some(items) => {
                for (i, item) in items.iter().enumerate() {
                    check_task_id(&format!("depends[{i}]"), item, &mut violations);
                }
            }
            None => violations.push(bad_type("depends", "an array of task ids")),
        }
    }

    if let Some(title) = params.get("title") {
        match title.as_str() {
            Some(text) => {
                let len = text.trim().chars().count();
                if !(TITLE_MIN..=TITLE_MAX).contains(&len) {
                    violations.push(Violation::blocking(
                        LayerName::Schema,
                        Some("title"),
                        ErrorCode::ValidationError,
                        format!(
                            "Title must be {TITLE_MIN}-{TITLE_MAX} characters, got {len}"
                        ),
                    ));
                }
            }
            None => violations.push(bad_type("title", "a string")),
        }
    }

    if let Some(description) = params.get("description") {
        match description.as_str() {
            Some(text) => {
                let len = text.trim().chars().count();
                if !(DESCRIPTION_MIN..=DESCRIPTION_MAX).contains(&len) {
                    violations.push(Violation::blocking(
                        LayerName::Schema,
                        Some("description"),
                        ErrorCode::ValidationError,
                        format!(
                            "Description must be {DESCRIPTION_MIN}-{DESCRIPTION_MAX} characters, got {len}"
                        ),
                    ));
                }
            }
            None => violations.push(bad_type("description", "a string")),
        }
    }

    if let Some(status) = params.get("status") {
        match status.as_str() {
            Some(text) if text.parse::<TaskStatus>().is_ok() => {}
            _ => violations.push(Violation::blocking(
                LayerName::Schema,
                Some("status"),
                ErrorCode::ValidationError,
                format!("Invalid status: {status}"),
            )),
        }
    }

    if let Some(priority) = params.get("priority") {
        let ok = match priority {
            Value::String(text) => text.parse::<Priority>().is_ok(),
            Value::Number(n) => n
                .as_i64()
                .map(|n| Priority::from_numeric(n).is_ok())
                .unwrap_or(false),
            _ => false,
        };
        if !ok {
            violations.push(Violation::blocking(
                LayerName::Schema,
                Some("priority"),
                ErrorCode::ValidationError,
                format!("Invalid priority: {priority}. Valid: critical, high, medium, low, or 1-9"),
            ));
        }
    }

    if let Some(task_type) = params.get("type") {
        match task_type.as_str() {
            Some(text) if text.parse::<TaskType>().is_ok() => {}
            _ => violations.push(Violation::blocking(
                LayerName::Schema,
                Some("type"),
                ErrorCode::ValidationError,
                format!("Invalid type: {task_type}. Valid: epic, task, subtask"),
            )),
        }
    }

    for field in ["created", "updated", "date"] {
        if let Some(value) = params.get(field) {
            let ok = value
                .as_str()
                .map(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
                .unwrap_or(false);
            if !ok {
                violations.push(Violation::blocking(
                    LayerName::Schema,
                    Some(field),
                    ErrorCode::ValidationError,
                    format!("Field '{field}' must be an ISO-8601 timestamp"),
                ));
            }
        }
    }

    if let Some(agent_type) = params.get("agent_type") {
        let ok = agent_type
            .as_str()
            .map(|s| AGENT_TYPES.contains(&s))
            .unwrap_or(false);
        if !ok {
            violations.push(Violation::blocking(
                LayerName::Schema,
                Some("agent_type"),
                ErrorCode::ValidationError,
                format!(
                    "Invalid agent_type: {agent_type}. Valid: research, implementation, testing, validation"
                ),
            ));
        }
    }

    if let Some(id) = params.pointer("/manifest/id") {
        let ok = id
            .as_str()
            .map(|s| manifest_id_re().is_match(s))
            .unwrap_or(false);
        if !ok {
            violations.push(Violation::blocking(
                LayerName::Schema,
                Some("manifest.id"),
                ErrorCode::ValidationError,
                format!("Invalid manifest id: {id}. Expected: T<nnn>-<slug>"),
            ));
        }
    }

    violations
}

fn check_task_id(field: &str, value: &Value, violations: &mut Vec<Violation>) {
    let ok = value
        .as_str()
        .map(|s| task_id_re().is_match(s))
        .unwrap_or(false);
    if !ok {
        violations.push(Violation::blocking(
            LayerName::Schema,
            Some(field),
            ErrorCode::ValidationError,
            format!("Field '{field}' must be a task id matching T<n>, got {value}"),
        ));
    }
}

fn bad_type(field: &str, expected: &str) -> Violation {
    Violation::blocking(
        LayerName::Schema,
        Some(field),
        ErrorCode::ValidationError,
        format!("Field '{field}' must be {expected}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use cleo_core::envelope::Gateway;
    use serde_json::json;

    fn ctx(params: &Value) -> OperationContext<'_> {
        OperationContext {
            domain: "tasks",
            operation: "add",
            gateway: Gateway::Mutate,
            params,
            protocol_type: None,
        }
    }

    #[test]
    fn test_valid_params_pass() {
        let params = json!({
            "title": "Design API",
            "description": "Write initial REST API specification",
            "priority": "high",
            "type": "task",
            "depends": ["T1", "T2"],
        });
        assert!(check(&ctx(&params)).is_empty());
    }

    #[test]
    fn test_empty_params_pass() {
        let params = json!({});
        assert!(check(&ctx(&params)).is_empty());
    }

    #[test]
    fn test_bad_task_id_pattern() {
        let params = json!({"taskId": "42"});
        let violations = check(&ctx(&params));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field.as_deref(), Some("taskId"));
    }

    #[test]
    fn test_depends_element_pattern() {
        let params = json!({"depends": ["T1", "nope"]});
        let violations = check(&ctx(&params));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field.as_deref(), Some("depends[1]"));
    }

    #[test]
    fn test_title_length_bounds() {
        let short = json!({"title": "Hey"});
        assert_eq!(check(&ctx(&short)).len(), 1);

        let exact = json!({"title": "a".repeat(100)});
        assert!(check(&ctx(&exact)).is_empty());

        let long = json!({"title": "a".repeat(101)});
        assert_eq!(check(&ctx(&long)).len(), 1);
    }

    #[test]
    fn test_description_boundary() {
        let exactly_max = json!({"description": "d".repeat(1000)});
        assert!(check(&ctx(&exactly_max)).is_empty());

        let over = json!({"description": "d".repeat(1001)});
        let violations = check(&ctx(&over));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].code, ErrorCode::ValidationError);
    }

    #[test]
    fn test_numeric_priority_accepted_in_range() {
        assert!(check(&ctx(&json!({"priority": 3}))).is_empty());
        assert_eq!(check(&ctx(&json!({"priority": 0}))).len(), 1);
        assert_eq!(check(&ctx(&json!({"priority": 10}))).len(), 1);
        assert_eq!(check(&ctx(&json!({"priority": true}))).len(), 1);
    }

    #[test]
    fn test_invalid_status_and_type() {
        assert_eq!(check(&ctx(&json!({"status": "open"}))).len(), 1);
        assert_eq!(check(&ctx(&json!({"type": "story"}))).len(), 1);
    }

    #[test]
    fn test_date_format() {
        assert!(check(&ctx(&json!({"date": "2026-01-02T03:04:05Z"}))).is_empty());
        assert_eq!(check(&ctx(&json!({"date": "yesterday"}))).len(), 1);
    }

    #[test]
    fn test_manifest_id_pattern() {
        assert!(check(&ctx(&json!({"manifest": {"id": "T123-api-design"}}))).is_empty());
        assert_eq!(
            check(&ctx(&json!({"manifest": {"id": "T12-short"}}))).len(),
            1,
            "manifest ids need at least three digits"
        );
        assert_eq!(
            check(&ctx(&json!({"manifest": {"id": "T123-Bad_Slug"}}))).len(),
            1
        );
    }

    #[test]
    fn test_agent_type_enum() {
        assert!(check(&ctx(&json!({"agent_type": "research"}))).is_empty());
        assert_eq!(check(&ctx(&json!({"agent_type": "developer"}))).len(), 1);
    }
}
