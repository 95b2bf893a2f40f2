//! Stable error codes and the exit-code taxonomy.
//!
//! Every failure that crosses the dispatch boundary is one of these codes.
//! Exit numbers are assigned once and never reused; adapters map them to
//! the process exit code or a JSON-RPC error.

use serde::{Deserialize, Serialize};

/// Exit code returned for plain success.
pub const EXIT_SUCCESS: i32 = 0;

/// Closed set of machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InternalError,
    InvalidInput,
    InvalidDomain,
    InvalidOperation,
    ValidationFailed,
    FileError,
    NotFound,
    DependencyError,
    CircularReference,
    ValidationError,
    LockTimeout,
    ChecksumMismatch,
    ConcurrentModification,
    IdCollision,
    Timeout,
    NotImplemented,
    LifecycleGateFailed,
    LifecycleTransitionInvalid,
    ProvenanceRequired,
    VerificationLocked,
    CascadeFailed,
    ContextWarning,
    ContextCritical,
    ProtocolResearch,
    ProtocolImplementation,
    ProtocolTesting,
    ProtocolValidation,
}

impl ErrorCode {
    /// The stable numeric exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InternalError => 1,
            Self::InvalidInput
            | Self::InvalidDomain
            | Self::InvalidOperation
            | Self::ValidationFailed => 2,
            Self::FileError => 3,
            Self::NotFound => 4,
            Self::DependencyError | Self::CircularReference => 5,
            Self::ValidationError => 6,
            Self::LockTimeout => 10,
            Self::ChecksumMismatch => 11,
            Self::ConcurrentModification => 12,
            Self::IdCollision => 13,
            Self::Timeout => 14,
            Self::NotImplemented => 15,
            Self::LifecycleGateFailed => 20,
            Self::LifecycleTransitionInvalid => 21,
            Self::ProvenanceRequired => 22,
            Self::VerificationLocked => 23,
            Self::CascadeFailed => 24,
            Self::ContextWarning => 30,
            Self::ContextCritical => 31,
            Self::ProtocolResearch => 60,
            Self::ProtocolImplementation => 61,
            Self::ProtocolTesting => 62,
            Self::ProtocolValidation => 63,
        }
    }

    /// Canonical string form, e.g. `LOCK_TIMEOUT`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InternalError => "INTERNAL_ERROR",
            Self::InvalidInput => "INVALID_INPUT",
            Self::InvalidDomain => "INVALID_DOMAIN",
            Self::InvalidOperation => "INVALID_OPERATION",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::FileError => "FILE_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::DependencyError => "DEPENDENCY_ERROR",
            Self::CircularReference => "CIRCULAR_REFERENCE",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::LockTimeout => "LOCK_TIMEOUT",
            Self::ChecksumMismatch => "CHECKSUM_MISMATCH",
            Self::ConcurrentModification => "CONCURRENT_MODIFICATION",
            Self::IdCollision => "ID_COLLISION",
            Self::Timeout => "TIMEOUT",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::LifecycleGateFailed => "LIFECYCLE_GATE_FAILED",
            Self::LifecycleTransitionInvalid => "LIFECYCLE_TRANSITION_INVALID",
            Self::ProvenanceRequired => "PROVENANCE_REQUIRED",
            Self::VerificationLocked => "VERIFICATION_LOCKED",
            Self::CascadeFailed => "CASCADE_FAILED",
            Self::ContextWarning => "CONTEXT_WARNING",
            Self::ContextCritical => "CONTEXT_CRITICAL",
            Self::ProtocolResearch => "PROTOCOL_RESEARCH",
            Self::ProtocolImplementation => "PROTOCOL_IMPLEMENTATION",
            Self::ProtocolTesting => "PROTOCOL_TESTING",
            Self::ProtocolValidation => "PROTOCOL_VALIDATION",
        }
    }

    /// Whether a client-side retry with backoff can plausibly succeed.
    ///
    /// The retryable set is closed: transient storage contention and the
    /// protocol codes. Lifecycle, provenance, verification-lock, cascade,
    /// circular-reference, file, and context errors are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout
                | Self::ChecksumMismatch
                | Self::ConcurrentModification
                | Self::IdCollision
                | Self::ProtocolResearch
                | Self::ProtocolImplementation
                | Self::ProtocolTesting
                | Self::ProtocolValidation
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A failure surfaced through the dispatch envelope.
///
/// Carries the machine code plus everything an adapter needs to render a
/// useful message: what happened, one recommended fix, and other paths
/// forward.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct CleoError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternatives: Option<Vec<String>>,
}

impl CleoError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            fix: None,
            alternatives: None,
        }
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_alternatives(mut self, alternatives: Vec<String>) -> Self {
        self.alternatives = Some(alternatives);
        self
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::NotFound, format!("{what} not found"))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn exit_code(&self) -> i32 {
        self.code.exit_code()
    }
}
