//! Top-level error taxonomy for the engine (spec §7).
//!
//! Every fallible public operation returns `Result<T, AppError>`. The
//! `kind` is what callers branch on (the shim maps it to an exit code and
//! message line); `message` is the human-readable detail.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable discriminant, serialized to clients alongside `message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Duplicate,
    Conflict,
    PermissionDenied,
    IoFailed,
    Unsupported,
    Internal,
}

/// Structured error carrying a `ErrorKind` and a human-readable message.
///
/// Mirrors the teacher's `PtyError`/`GitError` shape: a small enum-like
/// error with constructor functions per kind, `Display`+`std::error::Error`
/// impls, and a custom `Serialize` so clients see a flat `{kind, message}`.
#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn duplicate(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Duplicate, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, msg)
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, msg)
    }

    pub fn io_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::IoFailed, msg)
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, msg)
    }

    /// Used by the panic-recover boundary (§4.4, §9) and any other
    /// "should never happen" branch.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for AppError {}

impl From<crate::core::terminal::TerminalError> for AppError {
    fn from(err: crate::core::terminal::TerminalError) -> Self {
        AppError::io_failed(err.to_string())
    }
}
