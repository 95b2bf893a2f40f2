//! Layer 4 and the protocol enforcer: manifest entries, research outputs,
//! and provenance tags.

use cleo_core::ErrorCode;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

use crate::context::{OperationContext, ProtocolType};
use crate::report::{LayerName, Violation};
use crate::schema::manifest_id_re;

/// Research outputs must land between these bounds.
pub const KEY_FINDINGS_MIN: usize = 3;
pub const KEY_FINDINGS_MAX: usize = 7;

fn provenance_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@task T\d+").expect("valid pattern"))
}

/// Completion state of a manifest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestStatus {
    Complete,
    Partial,
    Blocked,
}

/// One record appended to a project manifest per research/implementation
/// deliverable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// `T<nnn>-<slug>`.
    pub id: String,
    pub file: String,
    pub title: String,
    /// ISO 8601.
    pub date: String,
    pub status: ManifestStatus,
    pub agent_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_findings: Vec<String>,
}

/// Stateless contract checks shared by the gate and the memory handlers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtocolEnforcer;

impl ProtocolEnforcer {
    /// Validate one manifest entry against its contract. Violations are
    /// attributed to `protocol_type`'s error code.
    pub fn check_manifest(
        &self,
        entry: &Value,
        protocol_type: ProtocolType,
    ) -> Vec<Violation> {
        let mut violations = Vec::new();
        let code = protocol_type.error_code();

        let blocking = |field: &str, message: String| {
            Violation::blocking(LayerName::Protocol, Some(field), code, message)
        };

        let id_ok = entry
            .get("id")
            .and_then(Value::as_str)
            .map(|s| manifest_id_re().is_match(s))
            .unwrap_or(false);
        if !id_ok {
            violations.push(blocking(
                "manifest.id",
                "Manifest entry requires an id matching T<nnn>-<slug>".into(),
            ));
        }

        for field in ["file", "title"] {
            let ok = entry
                .get(field)
                .and_then(Value::as_str)
                .map(|s| !s.trim().is_empty())
                .unwrap_or(false);
            if !ok {
                violations.push(blocking(
                    &format!("manifest.{field}"),
                    format!("Manifest entry requires a non-empty '{field}'"),
                ));
            }
        }

        let date_ok = entry
            .get("date")
            .and_then(Value::as_str)
            .map(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
            .unwrap_or(false);
        if !date_ok {
            violations.push(blocking(
                "manifest.date",
                "Manifest entry requires an ISO 8601 'date'".into(),
            ));
        }

        let status_ok = entry
            .get("status")
            .and_then(Value::as_str)
            .map(|s| matches!(s, "complete" | "partial" | "blocked"))
            .unwrap_or(false);
        if !status_ok {
            violations.push(blocking(
                "manifest.status",
                "Manifest status must be complete, partial, or blocked".into(),
            ));
        }

        let agent_ok = entry
            .get("agent_type")
            .and_then(Value::as_str)
            .map(|s| matches!(s, "research" | "implementation" | "testing" | "validation"))
            .unwrap_or(false);
        if !agent_ok {
            violations.push(blocking(
                "manifest.agent_type",
                "Manifest agent_type must be research, implementation, testing, or validation"
                    .into(),
            ));
        }

        if protocol_type == ProtocolType::Research {
            let count = entry
                .get("key_findings")
                .and_then(Value::as_array)
                .map(|a| a.len())
                .unwrap_or(0);
            if !(KEY_FINDINGS_MIN..=KEY_FINDINGS_MAX).contains(&count) {
                violations.push(blocking(
                    "manifest.key_findings",
                    format!(
                        "Research output requires {KEY_FINDINGS_MIN}-{KEY_FINDINGS_MAX} key findings, got {count}"
                    ),
                ));
            }
        }

        violations
    }

    /// Whether file content carries a `@task T<n>` provenance tag.
    pub fn has_provenance_tag(&self, content: &str) -> bool {
        provenance_re().is_match(content)
    }

    /// Implementation runs should tag the files they touch. Missing tags
    /// are warnings, never failures.
    pub fn check_provenance(&self, changed_files: &Value) -> Vec<Violation> {
        let Some(files) = changed_files.as_array() else {
            return Vec::new();
        };
        files
            .iter()
            .filter_map(|file| {
                let path = file.get("path").and_then(Value::as_str)?;
                let content = file.get("content").and_then(Value::as_str).unwrap_or("");
                if self.has_provenance_tag(content) {
                    None
                } else {
                    Some(Violation::warning(
                        LayerName::Protocol,
                        Some("changedFiles"),
                        format!("File '{path}' has no @task provenance tag"),
                    ))
                }
            })
            .collect()
    }
}

/// Layer 4 entry point: skip entirely unless the operation declared a
/// protocol type.
pub(crate) fn check(ctx: &OperationContext<'_>) -> Option<Vec<Violation>> {
    let protocol_type = ctx.protocol_type?;
    let enforcer = ProtocolEnforcer;
    let mut violations = Vec::new();

    match ctx.params.get("manifest") {
        Some(entry) => violations.extend(enforcer.check_manifest(entry, protocol_type)),
        None => violations.push(Violation::blocking(
            LayerName::Protocol,
            Some("manifest"),
            protocol_type.error_code(),
            format!(
                "Operations under the {} protocol require a manifest entry",
                protocol_type.as_str()
            ),
        )),
    }

    if protocol_type == ProtocolType::Implementation {
        if let Some(changed) = ctx.params.get("changedFiles") {
            violations.extend(enforcer.check_provenance(changed));
        }
    }

    Some(violations)
}
