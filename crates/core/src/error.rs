//! Domain error model.

use thiserror::Error;

/// Error taxonomy shared by the evaluator, the repository and the API.
///
/// Cache failures are absent: they are logged where they occur
/// and the caller falls back to storage.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The caller could not be identified (missing, malformed, expired or
    /// wrong-type token). The message never says which check failed.
    #[error("unauthenticated")]
    Unauthenticated,

    /// The caller is identified but lacks the action on the doc type.
    #[error("forbidden: missing '{action}' permission on '{doc_type}'")]
    Forbidden { action: String, doc_type: String },

    /// A requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness or integrity rule was violated. `code` is machine readable.
    #[error("conflict ({code}): {message}")]
    Conflict { code: String, message: String },

    /// Input failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The persistence layer failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The request was cancelled or its deadline elapsed.
    #[error("canceled")]
    Canceled,
}

impl DomainError {
    pub fn forbidden(action: impl Into<String>, doc_type: impl Into<String>) -> Self {
        Self::Forbidden {
            action: action.into(),
            doc_type: doc_type.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Stable machine-readable code for the error kind.
    pub fn code(&self) -> &str {
        match self {
            DomainError::Unauthenticated => "UNAUTHORIZED",
            DomainError::Forbidden { .. } => "FORBIDDEN",
            DomainError::NotFound(_) => "NOT_FOUND",
            DomainError::Conflict { code, .. } => code,
            DomainError::Validation(_) => "VALIDATION_ERROR",
            DomainError::Storage(_) => "INTERNAL_ERROR",
            DomainError::Canceled => "CANCELED",
        }
    }
}
