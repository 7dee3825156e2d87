//! Domain error types.

use common::StepId;
use thiserror::Error;

use crate::saga::{SagaStatus, StepStatus};

/// Errors raised by the saga state machines.
///
/// Every variant is a rejection: the saga is left unchanged when one is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// The requested saga transition is not allowed from the current status.
    #[error("Cannot transition saga from {from} to {to}")]
    InvalidTransition { from: SagaStatus, to: SagaStatus },

    /// The saga is terminal and can no longer be modified.
    #[error("Saga is in terminal state {status} and cannot be modified")]
    SagaTerminal { status: SagaStatus },

    /// Completion requested while some steps are neither completed nor skipped.
    #[error("Cannot complete saga with incomplete steps: {}", .steps.join(", "))]
    StepsIncomplete { steps: Vec<String> },

    /// Compensation requested to finish while some steps are not yet compensated.
    #[error("Compensation incomplete for steps: {}", .steps.join(", "))]
    CompensationIncomplete { steps: Vec<String> },

    /// No step with the given ID exists in the saga.
    #[error("Step not found: {0}")]
    StepNotFound(StepId),

    /// The requested step transition is not allowed from the current status.
    #[error("Cannot transition step '{step}' from {from} to {to}")]
    InvalidStepTransition {
        step: String,
        from: StepStatus,
        to: StepStatus,
    },

    /// The retry budget is used up.
    #[error("Retry limit reached for {target}: {retry_count}/{max_retry_attempts}")]
    RetryExhausted {
        target: String,
        retry_count: u32,
        max_retry_attempts: u32,
    },

    /// A step with the same ID is already part of the saga.
    #[error("Duplicate step: {0}")]
    DuplicateStep(String),
}
