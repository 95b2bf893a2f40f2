//! Append-only audit entries. One entry per dispatch start and one per
//! outcome; entries are never mutated after being written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{Gateway, Source};

/// One structured audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub ts: DateTime<Utc>,
    /// `dispatch.start` or `dispatch.finish`.
    pub action: String,
    pub gateway: Gateway,
    pub domain: String,
    pub operation: String,
    pub source: Source,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub exit_code: i32,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_field_names() {
        let entry = AuditEntry {
            ts: Utc::now(),
            action: "dispatch.finish".into(),
            gateway: Gateway::Mutate,
            domain: "tasks".into(),
            operation: "complete".into(),
            source: Source::Cli,
            request_id: "01ARZ3NDEKTSV4RRFFQ69G5FAV".into(),
            task_id: Some("T1".into()),
            session_id: None,
            exit_code: 0,
            duration_ms: 12,
            details: None,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["requestId"], "01ARZ3NDEKTSV4RRFFQ69G5FAV");
        assert_eq!(json["taskId"], "T1");
        assert_eq!(json["exitCode"], 0);
        assert_eq!(json["durationMs"], 12);
        assert!(json.get("sessionId").is_none());
    }

    #[test]
    fn test_roundtrip() {
        let entry = AuditEntry {
            ts: Utc::now(),
            action: "dispatch.start".into(),
            gateway: Gateway::Query,
            domain: "session".into(),
            operation: "status".into(),
            source: Source::Mcp,
            request_id: "01ARZ3NDEKTSV4RRFFQ69G5FAV".into(),
            task_id: None,
            session_id: Some("sess-e58ed763-928c-4155-bee9-fdbaaadc15f3".into()),
            exit_code: 0,
            duration_ms: 0,
            details: Some(serde_json::json!({"tier": "standard"})),
        };
        let text = serde_json::to_string(&entry).unwrap();
        let back: AuditEntry = serde_json::from_str(&text).unwrap();
        assert_eq!(back, entry);
    }
}
