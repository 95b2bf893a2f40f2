//! The dispatch envelope: the one request/response shape shared by the CLI
//! and MCP adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CleoError, EXIT_SUCCESS};

/// Coarse-grained entry point chosen by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gateway {
    Query,
    Mutate,
}

impl Gateway {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutate => "mutate",
        }
    }
}

impl std::fmt::Display for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which adapter originated the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Cli,
    Mcp,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "cli"),
            Self::Mcp => write!(f, "mcp"),
        }
    }
}

/// One external request, as handed to the dispatch pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub gateway: Gateway,
    pub domain: String,
    pub operation: String,
    #[serde(default)]
    pub params: Value,
    pub source: Source,
    #[serde(rename = "requestId")]
    pub request_id: String,
}

impl DispatchRequest {
    /// Build a request with a fresh ULID request id.
    pub fn new(
        gateway: Gateway,
        domain: impl Into<String>,
        operation: impl Into<String>,
        params: Value,
        source: Source,
    ) -> Self {
        Self {
            gateway,
            domain: domain.into(),
            operation: operation.into(),
            params,
            source,
            request_id: ulid::Ulid::new().to_string(),
        }
    }
}

/// Metadata block attached to every response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub gateway: Gateway,
    pub domain: String,
    pub operation: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub source: Source,
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub strict: bool,
}

/// Error block inside the envelope. Same shape as [`CleoError`] plus the
/// numeric exit code, so adapters never need the code table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: crate::error::ErrorCode,
    #[serde(rename = "exitCode")]
    pub exit_code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternatives: Option<Vec<String>>,
}

impl From<CleoError> for ErrorBody {
    fn from(err: CleoError) -> Self {
        Self {
            exit_code: err.exit_code(),
            code: err.code,
            message: err.message,
            details: err.details,
            fix: err.fix,
            alternatives: err.alternatives,
        }
    }
}

/// The uniform response returned by both adapters.
///
/// `exit_code` is not part of the wire shape: adapters read it to set the
/// process exit code (0 for plain success, >= 100 for idempotent success,
/// the error's code otherwise).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResponse {
    #[serde(rename = "_meta")]
    pub meta: ResponseMeta,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(skip)]
    pub exit_code: i32,
}

impl DispatchResponse {
    pub fn ok(meta: ResponseMeta, data: Value) -> Self {
        Self {
            meta,
            success: true,
            data: Some(data),
            partial: None,
            error: None,
            exit_code: EXIT_SUCCESS,
        }
    }

    /// Success for an operation whose desired state already held.
    pub fn ok_idempotent(meta: ResponseMeta, data: Value, exit_code: i32) -> Self {
        debug_assert!(exit_code >= 100);
        Self {
            meta,
            success: true,
            data: Some(data),
            partial: None,
            error: None,
            exit_code,
        }
    }

    pub fn fail(meta: ResponseMeta, err: CleoError) -> Self {
        let body = ErrorBody::from(err);
        Self {
            meta,
            success: false,
            data: None,
            partial: None,
            error: Some(body.clone()),
            exit_code: body.exit_code,
        }
    }
}
