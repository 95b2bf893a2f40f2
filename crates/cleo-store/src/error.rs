//! The closed set of storage failures. Nothing else escapes this crate.

use cleo_core::{CleoError, ErrorCode};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Lock on {path} not acquired after {waited_ms} ms")]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    #[error("File error: {message}")]
    FileError { message: String },

    #[error("Checksum mismatch: {message}")]
    ChecksumMismatch { message: String },

    #[error("{message}")]
    Validation { message: String },

    #[error("File {path} changed on disk since it was loaded")]
    ConcurrentModification { path: PathBuf },

    #[error("Task id '{id}' already exists")]
    IdCollision { id: String },
}

impl StoreError {
    pub fn file(message: impl Into<String>) -> Self {
        Self::FileError {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::LockTimeout { .. } => ErrorCode::LockTimeout,
            Self::FileError { .. } => ErrorCode::FileError,
            Self::ChecksumMismatch { .. } => ErrorCode::ChecksumMismatch,
            Self::Validation { .. } => ErrorCode::ValidationError,
            Self::ConcurrentModification { .. } => ErrorCode::ConcurrentModification,
            Self::IdCollision { .. } => ErrorCode::IdCollision,
        }
    }
}

impl From<StoreError> for CleoError {
    fn from(err: StoreError) -> Self {
        CleoError::new(err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_map_one_to_one() {
        assert_eq!(
            StoreError::LockTimeout {
                path: PathBuf::from("/x/todo.json"),
                waited_ms: 700,
            }
            .code(),
            ErrorCode::LockTimeout
        );
        assert_eq!(StoreError::file("broken").code(), ErrorCode::FileError);
        assert_eq!(
            StoreError::validation("empty source").code(),
            ErrorCode::ValidationError
        );
        assert_eq!(
            StoreError::IdCollision { id: "T4".into() }.code(),
            ErrorCode::IdCollision
        );
    }

    #[test]
    fn test_into_cleo_error_keeps_message() {
        let err: CleoError = StoreError::IdCollision { id: "T4".into() }.into();
        assert_eq!(err.code, ErrorCode::IdCollision);
        assert!(err.message.contains("T4"));
    }

    #[test]
    fn test_lock_timeout_display() {
        let err = StoreError::LockTimeout {
            path: PathBuf::from("/p/.cleo/todo.json"),
            waited_ms: 700,
        };
        let text = err.to_string();
        assert!(text.contains("todo.json"));
        assert!(text.contains("700"));
    }
}
