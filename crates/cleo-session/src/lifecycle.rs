//! Session lifecycle: `none -> active <-> suspended -> ended`.

use chrono::Utc;
use cleo_core::session::{Session, SessionStatus};
use cleo_core::{CleoError, ErrorCode};

/// Events that drive session status transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Suspend,
    Resume,
    End,
}

/// Attempt a status transition.
///
/// ```text
///   Active    --Suspend--> Suspended
///   Active    --End------> Ended
///   Suspended --Resume---> Active
///   Suspended --End------> Ended
/// ```
///
/// All other combinations are invalid; `Ended` is terminal.
pub fn transition(
    status: SessionStatus,
    event: SessionEvent,
) -> Result<SessionStatus, CleoError> {
    match (status, event) {
        (SessionStatus::Active, SessionEvent::Suspend) => Ok(SessionStatus::Suspended),
        (SessionStatus::Active, SessionEvent::End) => Ok(SessionStatus::Ended),
        (SessionStatus::Suspended, SessionEvent::Resume) => Ok(SessionStatus::Active),
        (SessionStatus::Suspended, SessionEvent::End) => Ok(SessionStatus::Ended),
        (status, event) => Err(CleoError::new(
            ErrorCode::ValidationError,
            format!("Invalid session transition: {status} + {event:?}"),
        )),
    }
}

/// Start a new session. Fails while any session is active.
pub fn start(sessions: &[Session], scope: &str) -> Result<Session, CleoError> {
    if let Some(active) = sessions.iter().find(|s| s.status == SessionStatus::Active) {
        return Err(CleoError::new(
            ErrorCode::ValidationError,
            format!("Session {} is already active (scope {})", active.id, active.scope),
        )
        .with_fix("cleo session end")
        .with_alternatives(vec![
            "cleo session suspend".to_string(),
            format!("cleo session show {}", active.id),
        ]));
    }
    Ok(Session::start(scope))
}

/// Resume a suspended session. Fails if another session is active or the
/// target is not suspended.
pub fn resume(sessions: &mut [Session], id: &str) -> Result<(), CleoError> {
    if let Some(active) = sessions.iter().find(|s| s.status == SessionStatus::Active) {
        if active.id != id {
            return Err(CleoError::new(
                ErrorCode::ValidationError,
                format!("Cannot resume while session {} is active", active.id),
            ));
        }
    }

    let session = sessions
        .iter_mut()
        .find(|s| s.id == id)
        .ok_or_else(|| CleoError::not_found(format!("Session {id}")))?;

    session.status = transition(session.status, SessionEvent::Resume)?;
    Ok(())
}

/// End stale sessions: anything not yet ended whose start is older than
/// `max_age_hours`. Returns the ids that were ended.
pub fn gc(sessions: &mut [Session], max_age_hours: i64) -> Vec<String> {
    let cutoff = Utc::now() - chrono::Duration::hours(max_age_hours);
    let mut ended = Vec::new();
    for session in sessions.iter_mut() {
        if session.status != SessionStatus::Ended && session.started_at < cutoff {
            session.status = SessionStatus::Ended;
            session.ended_at = Some(Utc::now());
            ended.push(session.id.clone());
        }
    }
    if !ended.is_empty() {
        tracing::info!(count = ended.len(), "gc ended stale sessions");
    }
    ended
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(scope: &str, status: SessionStatus) -> Session {
        let mut s = Session::start(scope);
        s.status = status;
        s
    }

    // ── Transitions ─────────────────────────────────────────────────

    #[test]
    fn test_valid_transitions() {
        assert_eq!(
            transition(SessionStatus::Active, SessionEvent::Suspend).unwrap(),
            SessionStatus::Suspended
        );
        assert_eq!(
            transition(SessionStatus::Active, SessionEvent::End).unwrap(),
            SessionStatus::Ended
        );
        assert_eq!(
            transition(SessionStatus::Suspended, SessionEvent::Resume).unwrap(),
            SessionStatus::Active
        );
        assert_eq!(
            transition(SessionStatus::Suspended, SessionEvent::End).unwrap(),
            SessionStatus::Ended
        );
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(transition(SessionStatus::Active, SessionEvent::Resume).is_err());
        assert!(transition(SessionStatus::Suspended, SessionEvent::Suspend).is_err());
    }

    #[test]
    fn test_ended_is_terminal() {
        for event in [SessionEvent::Suspend, SessionEvent::Resume, SessionEvent::End] {
            assert!(transition(SessionStatus::Ended, event).is_err());
        }
    }

    // ── start ───────────────────────────────────────────────────────

    #[test]
    fn test_start_with_no_sessions() {
        let started = start(&[], "epic:T1").unwrap();
        assert_eq!(started.status, SessionStatus::Active);
        assert_eq!(started.scope, "epic:T1");
    }

    #[test]
    fn test_start_blocked_by_active() {
        let sessions = vec![session("epic:T1", SessionStatus::Active)];
        let err = start(&sessions, "epic:T2").unwrap_err();
        assert!(err.message.contains("already active"));
        assert!(err.fix.is_some());
    }

    #[test]
    fn test_start_allowed_after_suspend_or_end() {
        let sessions = vec![
            session("epic:T1", SessionStatus::Suspended),
            session("epic:T2", SessionStatus::Ended),
        ];
        assert!(start(&sessions, "epic:T3").is_ok());
    }

    // ── resume ──────────────────────────────────────────────────────

    #[test]
    fn test_resume_suspended() {
        let mut sessions = vec![session("epic:T1", SessionStatus::Suspended)];
        let id = sessions[0].id.clone();
        resume(&mut sessions, &id).unwrap();
        assert_eq!(sessions[0].status, SessionStatus::Active);
    }

    #[test]
    fn test_resume_blocked_by_other_active() {
        let mut sessions = vec![
            session("epic:T1", SessionStatus::Active),
            session("epic:T2", SessionStatus::Suspended),
        ];
        let id = sessions[1].id.clone();
        let err = resume(&mut sessions, &id).unwrap_err();
        assert!(err.message.contains("active"));
    }

    #[test]
    fn test_resume_unknown_session() {
        let mut sessions = vec![];
        let err = resume(&mut sessions, "sess-nope").unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[test]
    fn test_resume_ended_session_fails() {
        let mut sessions = vec![session("epic:T1", SessionStatus::Ended)];
        let id = sessions[0].id.clone();
        assert!(resume(&mut sessions, &id).is_err());
    }

    // ── gc ──────────────────────────────────────────────────────────

    #[test]
    fn test_gc_ends_only_stale_sessions() {
        let mut old = session("epic:T1", SessionStatus::Suspended);
        old.started_at = Utc::now() - chrono::Duration::hours(100);
        let fresh = session("epic:T2", SessionStatus::Suspended);

        let mut sessions = vec![old, fresh];
        let ended = gc(&mut sessions, 72);

        assert_eq!(ended.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Ended);
        assert!(sessions[0].ended_at.is_some());
        assert_eq!(sessions[1].status, SessionStatus::Suspended);
    }

    #[test]
    fn test_gc_skips_already_ended() {
        let mut done = session("epic:T1", SessionStatus::Ended);
        done.started_at = Utc::now() - chrono::Duration::hours(100);
        let mut sessions = vec![done];
        assert!(gc(&mut sessions, 72).is_empty());
    }
}
