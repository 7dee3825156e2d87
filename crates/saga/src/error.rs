//! Saga error types.

use common::{SagaId, StepId};
use domain::{DomainError, SagaStatus};
use saga_store::StoreError;
use thiserror::Error;

/// Errors that can occur during saga orchestration.
///
/// Remote-call failures are not represented here: they are recorded on the
/// saga itself and drive it into the compensation path.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A saga with this business key already exists.
    #[error("Saga with business key '{0}' already exists")]
    DuplicateBusinessKey(String),

    /// A required request field is missing or blank.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// The saga failed pre-execution validation.
    #[error("Saga cannot be executed: {0}")]
    InvalidExecution(String),

    /// No workflow definition exists for this saga type.
    #[error("Unknown saga type: {0}")]
    UnknownSagaType(String),

    /// The saga is not in the status the operation requires.
    #[error("Invalid saga state: expected {expected}, actual {actual}")]
    InvalidState {
        expected: SagaStatus,
        actual: SagaStatus,
    },

    /// Saga not found.
    #[error("Saga not found: {0}")]
    NotFound(SagaId),

    /// Step not found within the saga.
    #[error("Step {step_id} not found in saga {saga_id}")]
    StepNotFound { saga_id: SagaId, step_id: StepId },

    /// A state machine guard rejected the operation.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Saga repository error.
    #[error("Saga store error: {0}")]
    Store(#[source] StoreError),
}

impl SagaError {
    /// Returns true if the saga was concurrently modified and the operation
    /// exhausted its reload budget.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SagaError::Store(e) if e.is_conflict())
    }
}

impl From<StoreError> for SagaError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::DuplicateBusinessKey(key) => SagaError::DuplicateBusinessKey(key),
            StoreError::SagaNotFound(id) => SagaError::NotFound(id),
            other => SagaError::Store(other),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
