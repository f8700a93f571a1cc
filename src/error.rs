//! Error types for the memory bank

use serde::Serialize;
use thiserror::Error;

/// Result type alias for memory bank operations
pub type Result<T> = std::result::Result<T, MembankError>;

/// External collaborator a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Embedding,
    VectorIndex,
    Persistence,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Embedding => "embedding",
            Service::VectorIndex => "vector_index",
            Service::Persistence => "persistence",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification surfaced to callers alongside the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    InvalidState,
    Conflict,
    Ambiguous,
    Unsupported,
    ServiceUnavailable,
    Cancelled,
    Internal,
}

/// Main error type for the memory bank
#[derive(Error, Debug)]
pub enum MembankError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Ambiguous reference: {0}")]
    Ambiguous(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("{service} unavailable: {message}")]
    ServiceUnavailable { service: Service, message: String },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MembankError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        MembankError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn unavailable(service: Service, message: impl std::fmt::Display) -> Self {
        MembankError::ServiceUnavailable {
            service,
            message: message.to_string(),
        }
    }

    /// Classify the error for callers
    pub fn kind(&self) -> ErrorKind {
        match self {
            MembankError::Validation(_) | MembankError::Serialization(_) => ErrorKind::Validation,
            MembankError::NotFound { .. } => ErrorKind::NotFound,
            MembankError::InvalidState(_) => ErrorKind::InvalidState,
            MembankError::Conflict(_) => ErrorKind::Conflict,
            MembankError::Ambiguous(_) => ErrorKind::Ambiguous,
            MembankError::Unsupported(_) => ErrorKind::Unsupported,
            MembankError::ServiceUnavailable { .. }
            | MembankError::Database(_)
            | MembankError::Io(_) => ErrorKind::ServiceUnavailable,
            MembankError::Cancelled => ErrorKind::Cancelled,
            MembankError::Config(_) | MembankError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The collaborator responsible, if the failure came from one
    pub fn service(&self) -> Option<Service> {
        match self {
            MembankError::ServiceUnavailable { service, .. } => Some(*service),
            MembankError::Database(_) | MembankError::Io(_) => Some(Service::Persistence),
            _ => None,
        }
    }

    /// Check if error is retryable by the caller
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::ServiceUnavailable
    }

    /// Get error code for MCP protocol
    pub fn code(&self) -> i64 {
        match self.kind() {
            ErrorKind::Validation => -32602,
            ErrorKind::NotFound => -32001,
            ErrorKind::InvalidState => -32002,
            ErrorKind::ServiceUnavailable => -32003,
            ErrorKind::Cancelled => -32800,
            ErrorKind::Conflict => -32005,
            ErrorKind::Ambiguous => -32006,
            ErrorKind::Unsupported => -32601,
            ErrorKind::Internal => -32000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_errors_are_unavailable() {
        let err = MembankError::from(rusqlite::Error::InvalidQuery);
        assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
        assert_eq!(err.service(), Some(Service::Persistence));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_deterministic_errors_not_retryable() {
        let errors = [
            MembankError::Validation("missing title".into()),
            MembankError::not_found("session", "abc"),
            MembankError::InvalidState("session is completed".into()),
            MembankError::Conflict("active session exists".into()),
        ];
        for err in errors {
            assert!(!err.is_retryable(), "{err} should not be retryable");
        }
    }

    #[test]
    fn test_messages() {
        let err = MembankError::unavailable(Service::Embedding, "connection refused");
        assert_eq!(err.to_string(), "embedding unavailable: connection refused");
        assert_eq!(
            MembankError::not_found("memory", "m-1").to_string(),
            "memory not found: m-1"
        );
    }
}
