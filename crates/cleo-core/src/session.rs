//! Session data model: a time-bounded work context bound to a scope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Suspended,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Ended => "ended",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One timestamped decision or assumption recorded during a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub ts: DateTime<Utc>,
    pub text: String,
}

/// A time-bounded work context. At most one session is `active` per project
/// at any time; that invariant is enforced by the session lifecycle, not
/// here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// `sess-<uuid>`.
    pub id: String,
    /// Scope binding, e.g. `epic:T1234`. Always `<kind>:<subject>`.
    pub scope: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decisions: Vec<SessionEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assumptions: Vec<SessionEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Session {
    /// A new active session for the given scope, with a fresh id.
    pub fn start(scope: impl Into<String>) -> Self {
        Self {
            id: format!("sess-{}", uuid::Uuid::new_v4()),
            scope: scope.into(),
            status: SessionStatus::Active,
            started_at: Utc::now(),
            ended_at: None,
            decisions: Vec::new(),
            assumptions: Vec::new(),
            notes: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_shape() {
        let session = Session::start("epic:T12");
        assert!(session.id.starts_with("sess-"));
        // "sess-" + 36-char hyphenated UUID
        assert_eq!(session.id.len(), 5 + 36);
        assert_eq!(session.status, SessionStatus::Active);
        assert!(session.ended_at.is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Session::start("epic:T1");
        let b = Session::start("epic:T1");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(SessionStatus::Active.to_string(), "active");
        assert_eq!(SessionStatus::Suspended.to_string(), "suspended");
        assert_eq!(SessionStatus::Ended.to_string(), "ended");
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut session = Session::start("feature:auth");
        session.decisions.push(SessionEntry {
            ts: Utc::now(),
            text: "use argon2".into(),
        });
        let text = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&text).unwrap();
        assert_eq!(back, session);
    }

    #[test]
    fn test_serde_field_names() {
        let session = Session::start("epic:T1");
        let json = serde_json::to_value(&session).unwrap();
        assert!(json.get("startedAt").is_some());
        assert!(json.get("started_at").is_none());
        // empty collections are skipped on the wire
        assert!(json.get("decisions").is_none());
    }
}
