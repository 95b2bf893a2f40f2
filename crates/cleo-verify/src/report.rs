//! Verification results: per-layer outcomes and the overall report.

use cleo_core::{CleoError, ErrorCode};
use serde::Serialize;

/// The four layers, in the order they always run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerName {
    Schema,
    Semantic,
    Referential,
    Protocol,
}

impl LayerName {
    pub const ALL: [Self; 4] = [Self::Schema, Self::Semantic, Self::Referential, Self::Protocol];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Semantic => "semantic",
            Self::Referential => "referential",
            Self::Protocol => "protocol",
        }
    }
}

impl std::fmt::Display for LayerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LayerStatus {
    Passed,
    Failed,
    Skipped,
}

/// One finding. Non-blocking violations are warnings: they are reported
/// but do not fail the layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub layer: LayerName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub code: ErrorCode,
    pub message: String,
    pub blocking: bool,
}

impl Violation {
    pub fn blocking(
        layer: LayerName,
        field: Option<&str>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            layer,
            field: field.map(String::from),
            code,
            message: message.into(),
            blocking: true,
        }
    }

    pub fn warning(layer: LayerName, field: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            layer,
            field: field.map(String::from),
            code: ErrorCode::ContextWarning,
            message: message.into(),
            blocking: false,
        }
    }
}

/// Outcome of one layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerResult {
    pub layer: LayerName,
    pub status: LayerStatus,
    pub violations: Vec<Violation>,
    pub duration_ms: u64,
}

impl LayerResult {
    pub fn from_violations(
        layer: LayerName,
        violations: Vec<Violation>,
        duration_ms: u64,
    ) -> Self {
        let status = if violations.iter().any(|v| v.blocking) {
            LayerStatus::Failed
        } else {
            LayerStatus::Passed
        };
        Self {
            layer,
            status,
            violations,
            duration_ms,
        }
    }

    pub fn skipped(layer: LayerName) -> Self {
        Self {
            layer,
            status: LayerStatus::Skipped,
            violations: Vec::new(),
            duration_ms: 0,
        }
    }
}

/// The whole gate run. In strict mode the pipeline stops at the first
/// failed layer; `blocked_at` names it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateReport {
    pub layers: Vec<LayerResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_at: Option<LayerName>,
}

impl GateReport {
    pub fn passed(&self) -> bool {
        self.blocked_at.is_none()
    }

    /// All warnings across layers, for surfacing on success.
    pub fn warnings(&self) -> Vec<&Violation> {
        self.layers
            .iter()
            .flat_map(|l| l.violations.iter())
            .filter(|v| !v.blocking)
            .collect()
    }

    /// The error to surface when the gate blocked: built from the first
    /// blocking violation of the failed layer.
    pub fn into_error(self) -> Option<CleoError> {
        let blocked_at = self.blocked_at?;
        let layer = self.layers.into_iter().find(|l| l.layer == blocked_at)?;
        let violation = layer.violations.iter().find(|v| v.blocking)?.clone();
        let mut details = serde_json::json!({
            "blockedAt": blocked_at.as_str(),
            "violations": layer.violations,
        });
        if let Some(field) = &violation.field {
            details["field"] = serde_json::Value::String(field.clone());
        }
        Some(CleoError::new(violation.code, violation.message).with_details(details))
    }
}
