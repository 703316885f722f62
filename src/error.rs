use thiserror::Error;

/// Error taxonomy for the manufacturing core.
///
/// Capacity shortfalls are not errors: a dispatch pass with no idle machine
/// reports `DispatchOutcome::NoCapacity` instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FabError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("transient failure during {operation}: {reason}")]
    Transient { operation: String, reason: String },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("job {job_id} at stage {stage} cannot transition: {reason}")]
    InvalidTransition {
        job_id: String,
        stage: String,
        reason: String,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("job store error: {0}")]
    Storage(String),
}

impl FabError {
    pub fn job_not_found(id: impl std::fmt::Display) -> Self {
        FabError::NotFound {
            kind: "job",
            id: id.to_string(),
        }
    }

    pub fn machine_not_found(id: impl std::fmt::Display) -> Self {
        FabError::NotFound {
            kind: "machine",
            id: id.to_string(),
        }
    }

    /// Whether the next scheduled pass may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FabError::Transient { .. } | FabError::Storage(_))
    }
}

pub type Result<T> = std::result::Result<T, FabError>;
