//! Error taxonomy shared by every engine operation.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::model::{ProjectId, SessionId};

/// Errors returned by engine operations.
///
/// Cloneable so that a single compile failure can be handed to every caller
/// waiting on the same computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum EngineError {
    #[error("session '{0}' not found")]
    SessionNotFound(SessionId),

    #[error("project '{0}' not found")]
    ProjectNotFound(ProjectId),

    #[error("document '{}' is not part of the loaded project model", .0.display())]
    DocumentNotFound(PathBuf),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("backend failure: {0}")]
    Backend(String),

    #[error("{failed} of {total} operations failed: {message}")]
    PartialFailure {
        failed: usize,
        total: usize,
        message: String,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn invalid(message: impl Into<String>) -> Self {
        EngineError::InvalidInput(message.into())
    }

    /// Wrap a collaborator failure (model load, compile, IO).
    pub fn backend(error: impl fmt::Display) -> Self {
        EngineError::Backend(error.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::SessionNotFound(_)
            | EngineError::ProjectNotFound(_)
            | EngineError::DocumentNotFound(_) => ErrorKind::NotFound,
            EngineError::InvalidInput(_) => ErrorKind::InvalidInput,
            EngineError::Backend(_) => ErrorKind::BackendFailure,
            EngineError::PartialFailure { .. } => ErrorKind::PartialFailure,
            EngineError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Coarse classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    BackendFailure,
    PartialFailure,
    Cancelled,
}

/// Outcome of a batch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperationStatus {
    Success,
    PartialSuccess,
    Failure,
}

impl OperationStatus {
    pub fn from_counts(succeeded: usize, failed: usize) -> Self {
        match (succeeded, failed) {
            (_, 0) => OperationStatus::Success,
            (0, _) => OperationStatus::Failure,
            _ => OperationStatus::PartialSuccess,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = EngineError::SessionNotFound(SessionId::from("abc"));
        assert_eq!(err.to_string(), "session 'abc' not found");

        let err = EngineError::DocumentNotFound(PathBuf::from("src/lib.arb"));
        assert_eq!(
            err.to_string(),
            "document 'src/lib.arb' is not part of the loaded project model"
        );

        let err = EngineError::PartialFailure {
            failed: 1,
            total: 3,
            message: "disk full".to_string(),
        };
        assert_eq!(err.to_string(), "1 of 3 operations failed: disk full");
    }

    #[test]
    fn kinds() {
        assert_eq!(
            EngineError::ProjectNotFound(ProjectId::from("a")).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(EngineError::invalid("x").kind(), ErrorKind::InvalidInput);
        assert_eq!(EngineError::backend("boom").kind(), ErrorKind::BackendFailure);
        assert_eq!(EngineError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn status_from_counts() {
        assert_eq!(OperationStatus::from_counts(3, 0), OperationStatus::Success);
        assert_eq!(OperationStatus::from_counts(0, 0), OperationStatus::Success);
        assert_eq!(OperationStatus::from_counts(2, 1), OperationStatus::PartialSuccess);
        assert_eq!(OperationStatus::from_counts(0, 2), OperationStatus::Failure);
    }
}
