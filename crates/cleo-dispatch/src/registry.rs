//! The canonical operation surface: one table, two-level lookup by
//! `(domain, operation)`, populated at startup and never mutated.

use cleo_core::envelope::Gateway;

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// One operation's contract.
#[derive(Debug, Clone, Copy)]
pub struct OpSpec {
    pub domain: &'static str,
    pub operation: &'static str,
    pub gateway: Gateway,
    /// Parameters that must be present.
    pub required: &'static [&'static str],
    /// Exit code returned when the desired state already held. `None`
    /// means the operation is not idempotent.
    pub idempotent_exit: Option<i32>,
    pub timeout_secs: u64,
}

const fn query(domain: &'static str, operation: &'static str, required: &'static [&'static str]) -> OpSpec {
    OpSpec {
        domain,
        operation,
        gateway: Gateway::Query,
        required,
        idempotent_exit: None,
        timeout_secs: DEFAULT_TIMEOUT_SECS,
    }
}

const fn mutate(domain: &'static str, operation: &'static str, required: &'static [&'static str]) -> OpSpec {
    OpSpec {
        domain,
        operation,
        gateway: Gateway::Mutate,
        required,
        idempotent_exit: None,
        timeout_secs: DEFAULT_TIMEOUT_SECS,
    }
}

const fn idempotent(spec: OpSpec, exit: i32) -> OpSpec {
    OpSpec {
        idempotent_exit: Some(exit),
        ..spec
    }
}

const fn with_timeout(spec: OpSpec, timeout_secs: u64) -> OpSpec {
    OpSpec {
        timeout_secs,
        ..spec
    }
}

/// The whole surface. Legacy names never appear here; the alias resolver
/// runs first.
pub const OPERATIONS: &[OpSpec] = &[
    // tasks: queries
    query("tasks", "show", &["taskId"]),
    query("tasks", "list", &[]),
    query("tasks", "find", &["query"]),
    query("tasks", "tree", &[]),
    query("tasks", "blockers", &["taskId"]),
    query("tasks", "deps", &["taskId"]),
    query("tasks", "stats", &[]),
    query("tasks", "export", &[]),
    query("tasks", "history", &[]),
    query("tasks", "lint", &[]),
    query("tasks", "batch-validate", &["tasks"]),
    with_timeout(query("tasks", "next", &[]), 60),
    query("tasks", "exists", &["taskId"]),
    // tasks: mutations
    mutate("tasks", "add", &["title", "description"]),
    mutate("tasks", "update", &["taskId"]),
    idempotent(mutate("tasks", "complete", &["taskId"]), 100),
    mutate("tasks", "delete", &["taskId"]),
    idempotent(mutate("tasks", "archive", &["taskId"]), 101),
    mutate("tasks", "restore", &["taskId"]),
    mutate("tasks", "reparent", &["taskId"]),
    mutate("tasks", "promote", &["taskId"]),
    mutate("tasks", "reorder", &["taskId", "position"]),
    mutate("tasks", "reopen", &["taskId"]),
    mutate("tasks", "relates.add", &["taskId", "relatedId"]),
    mutate("tasks", "start", &["taskId"]),
    mutate("tasks", "stop", &["taskId"]),
    mutate("tasks", "workflow.pass", &["taskId", "gate"]),
    mutate("tasks", "workflow.fail", &["taskId", "gate"]),
    // session
    query("session", "show", &[]),
    query("session", "list", &[]),
    query("session", "status", &[]),
    mutate("session", "start", &["scope"]),
    idempotent(mutate("session", "end", &[]), 102),
    mutate("session", "resume", &["sessionId"]),
    mutate("session", "suspend", &[]),
    mutate("session", "gc", &[]),
    mutate("session", "record.decision", &["text"]),
    mutate("session", "record.assumption", &["text"]),
    // memory
    mutate("memory", "inject", &["content"]),
    mutate("memory", "link", &["taskId", "target"]),
    mutate("memory", "manifest.append", &["manifest"]),
    mutate("memory", "manifest.archive", &["id"]),
    mutate("memory", "pattern.store", &["name", "content"]),
    mutate("memory", "learning.store", &["content"]),
    // check
    mutate("check", "compliance.record", &["rule", "status"]),
    mutate("check", "test.run", &[]),
    // pipeline
    idempotent(mutate("pipeline", "stage.record", &["taskId", "stage"]), 103),
    mutate("pipeline", "stage.skip", &["taskId", "stage"]),
    mutate("pipeline", "stage.reset", &["taskId", "stage"]),
    mutate("pipeline", "stage.gate.pass", &["taskId", "stage", "gate"]),
    mutate("pipeline", "stage.gate.fail", &["taskId", "stage", "gate"]),
    mutate("pipeline", "release.prepare", &["version"]),
    mutate("pipeline", "release.changelog", &[]),
    mutate("pipeline", "release.commit", &[]),
    idempotent(mutate("pipeline", "release.tag", &[]), 104),
    mutate("pipeline", "release.push", &[]),
    mutate("pipeline", "release.gates.run", &[]),
    mutate("pipeline", "release.rollback", &[]),
    // orchestrate
    mutate("orchestrate", "start", &["taskId"]),
    mutate("orchestrate", "spawn", &["taskId"]),
    mutate("orchestrate", "validate", &["taskId"]),
    mutate("orchestrate", "parallel.start", &["taskIds"]),
    mutate("orchestrate", "parallel.end", &["taskIds"]),
    // tools
    mutate("tools", "skill.install", &["name"]),
    mutate("tools", "skill.uninstall", &["name"]),
    mutate("tools", "skill.enable", &["name"]),
    mutate("tools", "skill.disable", &["name"]),
    mutate("tools", "skill.configure", &["name", "config"]),
    mutate("tools", "skill.refresh", &[]),
    mutate("tools", "issue.add.bug", &["title", "description"]),
    mutate("tools", "issue.add.feature", &["title", "description"]),
    mutate("tools", "issue.add.help", &["title", "description"]),
    mutate("tools", "provider.inject", &["provider"]),
    // admin
    idempotent(mutate("admin", "init", &[]), 105),
    mutate("admin", "config.set", &["key", "value"]),
    mutate("admin", "backup", &[]),
    mutate("admin", "restore", &["backup"]),
    mutate("admin", "migrate", &["to"]),
    mutate("admin", "sync", &[]),
    mutate("admin", "cleanup", &[]),
    mutate("admin", "job.cancel", &["jobId"]),
    mutate("admin", "safestop", &[]),
    mutate("admin", "inject.generate", &[]),
];

/// Canonical domains, in display order. `nexus` is a placeholder: it is a
/// valid domain whose every operation reports NOT_IMPLEMENTED.
pub const DOMAINS: &[&str] = &[
    "tasks",
    "session",
    "memory",
    "check",
    "pipeline",
    "orchestrate",
    "tools",
    "admin",
    "nexus",
];

pub fn is_domain(domain: &str) -> bool {
    DOMAINS.contains(&domain)
}

pub fn lookup(domain: &str, operation: &str) -> Option<&'static OpSpec> {
    OPERATIONS
        .iter()
        .find(|op| op.domain == domain && op.operation == operation)
}

/// All operation names within a domain, for `alternatives` hints.
pub fn operations_in(domain: &str) -> Vec<&'static str> {
    OPERATIONS
        .iter()
        .filter(|op| op.domain == domain)
        .map(|op| op.operation)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_duplicate_entries() {
        use std::collections::HashSet;
        let mut seen = HashSet::new();
        for op in OPERATIONS {
            assert!(
                seen.insert((op.domain, op.operation)),
                "duplicate: {}.{}",
                op.domain,
                op.operation
            );
        }
    }

    #[test]
    fn test_every_entry_domain_is_canonical() {
        for op in OPERATIONS {
            assert!(is_domain(op.domain), "unknown domain {}", op.domain);
        }
    }

    #[test]
    fn test_idempotent_exits_are_at_least_100() {
        for op in OPERATIONS {
            if let Some(exit) = op.idempotent_exit {
                assert!(exit >= 100, "{}.{}", op.domain, op.operation);
            }
        }
    }

    #[test]
    fn test_declared_idempotent_set() {
        for (domain, operation) in [
            ("tasks", "complete"),
            ("tasks", "archive"),
            ("session", "end"),
            ("pipeline", "stage.record"),
            ("pipeline", "release.tag"),
            ("admin", "init"),
        ] {
            assert!(
                lookup(domain, operation).unwrap().idempotent_exit.is_some(),
                "{domain}.{operation} must be idempotent"
            );
        }
    }

    #[test]
    fn test_restore_and_reopen_are_distinct() {
        let restore = lookup("tasks", "restore").unwrap();
        let reopen = lookup("tasks", "reopen").unwrap();
        assert_ne!(restore.operation, reopen.operation);
    }

    #[test]
    fn test_next_has_raised_timeout() {
        assert_eq!(lookup("tasks", "next").unwrap().timeout_secs, 60);
        assert_eq!(lookup("tasks", "list").unwrap().timeout_secs, 30);
    }

    #[test]
    fn test_lookup_unknown() {
        assert!(lookup("tasks", "explode").is_none());
        assert!(lookup("nexus", "anything").is_none());
    }

    #[test]
    fn test_operations_in_domain() {
        let ops = operations_in("session");
        assert!(ops.contains(&"start"));
        assert!(ops.contains(&"record.decision"));
        assert!(!ops.contains(&"add"));
    }
}
