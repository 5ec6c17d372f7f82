use crate::core::types::RollbackConflict;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RollbackError {
    #[error("Rollback point '{0}' not found")]
    NotFound(String),

    #[error("Rollback point '{0}' has expired")]
    Expired(String),

    #[error("Rollback aborted: {} conflict(s) detected", .0.len())]
    Conflict(Vec<RollbackConflict>),

    #[error("Database is not ready for rollback operations")]
    DatabaseNotReady,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid operation state: {0}")]
    InvalidState(String),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RollbackError>;

impl RollbackError {
    /// Stable machine-readable code, used in operation records and logs.
    pub fn code(&self) -> &'static str {
        match self {
            RollbackError::NotFound(_) => "ROLLBACK_NOT_FOUND",
            RollbackError::Expired(_) => "ROLLBACK_EXPIRED",
            RollbackError::Conflict(_) => "ROLLBACK_CONFLICT",
            RollbackError::DatabaseNotReady => "DATABASE_NOT_READY",
            RollbackError::Validation(_) => "VALIDATION_FAILED",
            RollbackError::InvalidState(_) => "INVALID_STATE",
            RollbackError::Collaborator(_) => "COLLABORATOR_ERROR",
            RollbackError::Persistence(_) => "PERSISTENCE_ERROR",
            RollbackError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Domain failures resolve the surrounding operation as `Failed` instead
    /// of bubbling out of `rollback()`; unexpected faults propagate.
    pub fn is_domain_failure(&self) -> bool {
        matches!(
            self,
            RollbackError::Conflict(_) | RollbackError::Validation(_)
        )
    }
}

impl From<std::io::Error> for RollbackError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}
