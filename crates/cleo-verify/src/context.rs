//! Inputs to the verification gate.

use cleo_core::envelope::Gateway;
use cleo_core::task::Task;
use cleo_core::ErrorCode;
use serde_json::Value;

/// Protocol attached to an operation, when any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolType {
    Research,
    Implementation,
    Testing,
    Validation,
}

impl ProtocolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Implementation => "implementation",
            Self::Testing => "testing",
            Self::Validation => "validation",
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Research => ErrorCode::ProtocolResearch,
            Self::Implementation => ErrorCode::ProtocolImplementation,
            Self::Testing => ErrorCode::ProtocolTesting,
            Self::Validation => ErrorCode::ProtocolValidation,
        }
    }
}

impl std::str::FromStr for ProtocolType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "research" => Ok(Self::Research),
            "implementation" => Ok(Self::Implementation),
            "testing" => Ok(Self::Testing),
            "validation" => Ok(Self::Validation),
            _ => Err(format!(
                "Invalid protocol type: '{s}'. Valid: research, implementation, testing, validation"
            )),
        }
    }
}

/// One operation as seen by the gate.
#[derive(Debug, Clone)]
pub struct OperationContext<'a> {
    pub domain: &'a str,
    pub operation: &'a str,
    pub gateway: Gateway,
    pub params: &'a Value,
    pub protocol_type: Option<ProtocolType>,
}

/// Read-only view of the current task set plus the hierarchy limits, for
/// the referential layer.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotView<'a> {
    pub tasks: &'a [Task],
    /// Maximum hierarchy depth (default 3).
    pub max_depth: u32,
    /// Sibling limit; 0 means unlimited.
    pub max_siblings: u32,
}

impl<'a> SnapshotView<'a> {
    pub fn new(tasks: &'a [Task]) -> Self {
        Self {
            tasks,
            max_depth: 3,
            max_siblings: 0,
        }
    }

    pub fn find(&self, id: &str) -> Option<&'a Task> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_type_parse() {
        assert_eq!("research".parse::<ProtocolType>().unwrap(), ProtocolType::Research);
        assert!("reserch".parse::<ProtocolType>().is_err());
    }

    #[test]
    fn test_protocol_error_codes() {
        assert_eq!(ProtocolType::Research.error_code().exit_code(), 60);
        assert_eq!(ProtocolType::Implementation.error_code().exit_code(), 61);
        assert_eq!(ProtocolType::Testing.error_code().exit_code(), 62);
        assert_eq!(ProtocolType::Validation.error_code().exit_code(), 63);
    }
}
