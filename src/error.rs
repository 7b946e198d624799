//! Error types for drift
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, bad config, unknown export format)
//! - 4: Operation failed (I/O, lock contention, git error)
//!
//! Storage and collaborator failures are normally absorbed where they occur
//! and replaced with empty values. Only caller-input errors are meant to
//! reach the CLI boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the drift CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for drift operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // Operation failures (exit code 4)
    #[error("Corrupt store at {path}: {reason}")]
    CorruptStore { path: PathBuf, reason: String },

    #[error("Collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidConfig(_)
            | Error::InvalidArgument(_)
            | Error::UnsupportedFormat(_)
            | Error::NotFound(_) => exit_codes::USER_ERROR,

            Error::CorruptStore { .. }
            | Error::CollaboratorUnavailable(_)
            | Error::Git(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Short machine-readable kind used in JSON error envelopes
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidConfig(_) => "configuration_error",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::UnsupportedFormat(_) => "unsupported_format",
            Error::NotFound(_) => "not_found",
            Error::CorruptStore { .. } => "corrupt_store",
            Error::CollaboratorUnavailable(_) => "collaborator_unavailable",
            _ => "operation_failed",
        }
    }

    /// Structured details attached to the JSON error envelope, if any
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::UnsupportedFormat(format) => Some(serde_json::json!({
                "format": format,
                "supported": ["json", "csv"],
            })),
            Error::CorruptStore { path, .. } => Some(serde_json::json!({
                "path": path.display().to_string(),
            })),
            _ => None,
        }
    }
}

/// Result type alias for drift operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_errors_map_to_exit_code_two() {
        assert_eq!(
            Error::UnsupportedFormat("xml".into()).exit_code(),
            exit_codes::USER_ERROR
        );
        assert_eq!(
            Error::InvalidConfig("x".into()).exit_code(),
            exit_codes::USER_ERROR
        );
    }

    #[test]
    fn unsupported_format_names_the_format() {
        let err = Error::UnsupportedFormat("xml".into());
        assert!(err.to_string().contains("xml"));
        let details = err.details().unwrap();
        assert_eq!(details["format"], "xml");
    }

    #[test]
    fn io_errors_are_operation_failures() {
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(err.exit_code(), exit_codes::OPERATION_FAILED);
        assert_eq!(err.kind(), "operation_failed");
    }
}
